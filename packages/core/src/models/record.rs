//! Boundary Record Shapes
//!
//! `NodeRecord` is the flat shape persisted to and loaded from the backing
//! store. `NestedNode` is the plain nested-map shape accepted from and handed
//! back to callers that do not want the arena representation.
//!
//! Both shapes flatten domain attributes next to the tree columns:
//!
//! ```json
//! {
//!   "id": 12,
//!   "unique_id": "0190c3c2-...",
//!   "parent_id": null,
//!   "left": 1,
//!   "right": 4,
//!   "depth": 1,
//!   "tree_type": "catalog",
//!   "root_number": "0190c3c2-...",
//!   "title": "Shoes",
//!   "childNodes": [ ... ]
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Keys that describe in-memory linkage and must never reach a persisted payload
pub const TRANSIENT_KEYS: [&str; 4] = ["childNodes", "_root", "_parentNode", "_isBuild"];

/// Remove transient linkage keys from a domain attribute map
pub fn strip_transient_keys(attributes: &mut Map<String, Value>) {
    for key in TRANSIENT_KEYS {
        attributes.remove(key);
    }
}

/// Flat persisted record: tree columns plus flattened domain attributes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Backing-store primary key (absent until inserted)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_id"
    )]
    pub id: Option<i64>,

    #[serde(default, deserialize_with = "deserialize_optional_key")]
    pub unique_id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_optional_key")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub left: Option<i64>,

    #[serde(default)]
    pub right: Option<i64>,

    #[serde(default)]
    pub depth: Option<i64>,

    #[serde(default)]
    pub tree_type: String,

    #[serde(
        rename = "root_number",
        default,
        deserialize_with = "deserialize_optional_key"
    )]
    pub root_group: Option<String>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Plain nested-map tree shape.
///
/// `Clone`, `PartialEq` and `Drop` walk the tree with an explicit stack, so
/// a chain of any depth can be copied, compared and freed. Serde recurses
/// once per level; `serde_json` rejects input nested past its recursion
/// limit with an error.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NestedNode {
    #[serde(flatten)]
    pub record: NodeRecord,

    #[serde(rename = "childNodes", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NestedNode>,
}

impl NestedNode {
    pub fn new(record: NodeRecord) -> Self {
        Self {
            record,
            children: Vec::new(),
        }
    }

    /// Builder: append a child
    pub fn with_child(mut self, child: NestedNode) -> Self {
        self.children.push(child);
        self
    }

    /// Total number of nodes in this nested tree (iterative)
    pub fn count(&self) -> usize {
        let mut total = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            total += 1;
            stack.extend(node.children.iter());
        }
        total
    }
}

impl Clone for NestedNode {
    fn clone(&self) -> Self {
        // breadth-first, so every child sits after its parent
        let mut order: Vec<(&NestedNode, Option<usize>)> = vec![(self, None)];
        let mut next = 0;
        while next < order.len() {
            let (node, _) = order[next];
            order.extend(node.children.iter().map(|child| (child, Some(next))));
            next += 1;
        }

        let mut built: Vec<NestedNode> = order
            .iter()
            .map(|(node, _)| NestedNode::new(node.record.clone()))
            .collect();
        for index in (1..order.len()).rev() {
            let mut node = std::mem::take(&mut built[index]);
            node.children.reverse();
            if let Some(parent) = order[index].1 {
                built[parent].children.push(node);
            }
        }

        let mut root = std::mem::take(&mut built[0]);
        root.children.reverse();
        root
    }
}

impl PartialEq for NestedNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((left, right)) = stack.pop() {
            if left.record != right.record || left.children.len() != right.children.len() {
                return false;
            }
            stack.extend(left.children.iter().zip(right.children.iter()));
        }
        true
    }
}

impl Drop for NestedNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// Accept an integer or numeric string; `0`, `""` and `null` all mean "no id"
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Int(0)) => Ok(None),
        Some(RawId::Int(id)) => Ok(Some(id)),
        Some(RawId::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawId::Text(text)) => match text.trim().parse::<i64>() {
            Ok(0) => Ok(None),
            Ok(id) => Ok(Some(id)),
            Err(_) => Err(serde::de::Error::custom(format!(
                "invalid storage id: {}",
                text
            ))),
        },
    }
}

/// Accept a string or integer key; empty strings are treated as absent
fn deserialize_optional_key<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawKey {
        Int(i64),
        Text(String),
    }

    Ok(match Option::<RawKey>::deserialize(deserializer)? {
        None => None,
        Some(RawKey::Int(key)) => Some(key.to_string()),
        Some(RawKey::Text(text)) if text.is_empty() => None,
        Some(RawKey::Text(text)) => Some(text),
    })
}

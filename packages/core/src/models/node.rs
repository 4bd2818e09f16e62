//! Tree Node Data Structures
//!
//! This module defines `TreeNode`, the data half of a nested-set tree entry,
//! and `TreeAttributes`, the tracked tree columns used for change detection.
//!
//! # Architecture
//!
//! - **Data only**: Links (parent, root, children) and the build flag live in
//!   the [`Forest`](crate::tree::Forest) arena, never on the node itself, so a
//!   node can be cloned, compared, and serialized without walking cycles.
//! - **Lazy identity**: `unique_id` is assigned on first linkage so that
//!   nodes can be referenced before the backing store assigns a primary key.
//! - **Pure JSON attributes**: Domain data rides along in `attributes` and is
//!   flattened into the persisted record.
//!
//! # Examples
//!
//! ```rust
//! use nestindex_core::models::TreeNode;
//! use serde_json::json;
//!
//! let mut node = TreeNode::new("catalog").with_attribute("title", json!("Shoes"));
//! assert!(node.unique_id.is_none());
//!
//! let id = node.ensure_unique_id().to_string();
//! assert_eq!(node.unique_id.as_deref(), Some(id.as_str()));
//! ```

use crate::models::record::{strip_transient_keys, NodeRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Persisted tree columns tracked for change detection, in emission order
pub const TRACKED_COLUMNS: [&str; 6] = [
    "parent_id",
    "left",
    "right",
    "depth",
    "tree_type",
    "root_number",
];

/// Generate a new unique tree identifier (time-ordered UUIDv7)
pub fn generate_unique_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a new root group identifier for a freshly built tree
pub fn generate_root_group() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a tree type for nodes created without one
pub fn generate_tree_type() -> String {
    format!("tree_type_{}", Uuid::new_v4().simple())
}

/// Snapshot of the tree columns persisted for a node.
///
/// Two snapshots compare equal exactly when no tree column needs to be written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreeAttributes {
    pub parent_id: Option<String>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    pub depth: Option<i64>,
    pub tree_type: String,
    #[serde(rename = "root_number")]
    pub root_group: Option<String>,
}

impl TreeAttributes {
    /// Value of a tracked column as JSON (`None` for unknown columns)
    pub fn column_value(&self, column: &str) -> Option<Value> {
        let value = match column {
            "parent_id" => self.parent_id.clone().map(Value::from),
            "left" => self.left.map(Value::from),
            "right" => self.right.map(Value::from),
            "depth" => self.depth.map(Value::from),
            "tree_type" => Some(Value::from(self.tree_type.clone())),
            "root_number" => self.root_group.clone().map(Value::from),
            _ => return None,
        };
        Some(value.unwrap_or(Value::Null))
    }

    /// Tracked columns whose value differs from `previous`.
    ///
    /// With no previous snapshot every tracked column counts as changed.
    pub fn changed_columns(&self, previous: Option<&TreeAttributes>) -> Vec<&'static str> {
        let Some(previous) = previous else {
            return TRACKED_COLUMNS.to_vec();
        };

        TRACKED_COLUMNS
            .iter()
            .copied()
            .filter(|column| self.column_value(column) != previous.column_value(column))
            .collect()
    }
}

/// A single record in a nested-set tree.
///
/// # Fields
///
/// - `storage_id`: Backing-store primary key (`None` until inserted)
/// - `unique_id`: Surrogate key used for linkage and batching
/// - `parent_id`: Mirrors the parent's `unique_id` (`None` marks a root)
/// - `left`, `right`, `depth`: Nested-set indices (`None` until built)
/// - `tree_type`: Tree discriminator; indices never mix across tree types
/// - `root_group`: Distinguishes independent trees sharing a `tree_type`
/// - `attributes`: Domain attributes persisted alongside the tree columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeNode {
    pub storage_id: Option<i64>,
    pub unique_id: Option<String>,
    pub parent_id: Option<String>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    pub depth: Option<i64>,
    pub tree_type: String,
    pub root_group: Option<String>,
    pub attributes: Map<String, Value>,

    /// Tree columns as last written to (or read from) the backing store
    persisted: Option<TreeAttributes>,
}

impl TreeNode {
    /// Create a detached, never-persisted node of the given tree type
    pub fn new(tree_type: impl Into<String>) -> Self {
        Self {
            tree_type: tree_type.into(),
            ..Self::default()
        }
    }

    /// Builder: set a domain attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Builder: set an explicit unique id
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Builder: mark this node as already stored under `storage_id`.
    ///
    /// The current tree columns become the persisted snapshot.
    pub fn with_storage_id(mut self, storage_id: i64) -> Self {
        self.storage_id = Some(storage_id);
        self.persisted = Some(self.tree_attributes());
        self
    }

    /// Build a node from a flat record.
    ///
    /// Records carrying a storage id are treated as persisted: their tree
    /// columns become the snapshot so an unchanged reload emits no updates.
    pub fn from_record(record: NodeRecord) -> Self {
        let NodeRecord {
            id,
            unique_id,
            parent_id,
            left,
            right,
            depth,
            tree_type,
            root_group,
            mut attributes,
        } = record;
        strip_transient_keys(&mut attributes);

        let mut node = Self {
            storage_id: id,
            unique_id,
            parent_id,
            left,
            right,
            depth,
            tree_type,
            root_group,
            attributes,
            persisted: None,
        };
        if node.storage_id.is_some() {
            node.persisted = Some(node.tree_attributes());
        }
        node
    }

    /// Flat record for this node (transient state is never included)
    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            id: self.storage_id,
            unique_id: self.unique_id.clone(),
            parent_id: self.parent_id.clone(),
            left: self.left,
            right: self.right,
            depth: self.depth,
            tree_type: self.tree_type.clone(),
            root_group: self.root_group.clone(),
            attributes: self.attributes.clone(),
        }
    }

    /// Current tree columns
    pub fn tree_attributes(&self) -> TreeAttributes {
        TreeAttributes {
            parent_id: self.parent_id.clone(),
            left: self.left,
            right: self.right,
            depth: self.depth,
            tree_type: self.tree_type.clone(),
            root_group: self.root_group.clone(),
        }
    }

    /// Last persisted tree columns, if the node was ever stored
    pub fn persisted(&self) -> Option<&TreeAttributes> {
        self.persisted.as_ref()
    }

    /// Whether any tracked tree column differs from the persisted snapshot
    pub fn is_dirty(&self) -> bool {
        self.persisted.as_ref() != Some(&self.tree_attributes())
    }

    /// Assign a unique id if absent and return it
    pub fn ensure_unique_id(&mut self) -> &str {
        self.unique_id.get_or_insert_with(generate_unique_id)
    }

    /// Replace the persisted snapshot with the columns actually written
    pub(crate) fn set_persisted(&mut self, snapshot: TreeAttributes) {
        self.persisted = Some(snapshot);
    }

    /// Whether every entry of `subset` equals the field of the same persisted
    /// name. A field this node lacks matches only `null`.
    pub fn matches(&self, subset: &Map<String, Value>) -> bool {
        subset
            .iter()
            .all(|(name, expected)| self.field_matches(name, expected))
    }

    fn field_matches(&self, name: &str, expected: &Value) -> bool {
        fn int(actual: Option<i64>, expected: &Value) -> bool {
            match actual {
                Some(actual) => expected.as_i64() == Some(actual),
                None => expected.is_null(),
            }
        }
        fn text(actual: Option<&str>, expected: &Value) -> bool {
            match actual {
                Some(actual) => expected.as_str() == Some(actual),
                None => expected.is_null(),
            }
        }

        match name {
            "id" => int(self.storage_id, expected),
            "unique_id" => text(self.unique_id.as_deref(), expected),
            "parent_id" => text(self.parent_id.as_deref(), expected),
            "left" => int(self.left, expected),
            "right" => int(self.right, expected),
            "depth" => int(self.depth, expected),
            "tree_type" => text(Some(&self.tree_type), expected),
            "root_number" => text(self.root_group.as_deref(), expected),
            other => match self.attributes.get(other) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            },
        }
    }

    /// Identifier used in diagnostics: unique id, then storage id, then a placeholder
    pub(crate) fn display_id(&self) -> String {
        match (&self.unique_id, self.storage_id) {
            (Some(unique_id), _) => unique_id.clone(),
            (None, Some(id)) => format!("id:{}", id),
            (None, None) => "<unassigned>".to_string(),
        }
    }
}

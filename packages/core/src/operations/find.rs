//! Deterministic depth-first search inside one tree.
//!
//! Children are visited in sibling order, so the first match in document
//! order wins. The reported path names the match relative to the search
//! root: `.` for the root itself, otherwise `childNodes.1.childNodes.0`.

use crate::models::TreeNode;
use crate::tree::{Forest, NodeHandle};
use serde_json::{Map, Value};

/// A search hit: child-index path from the search root plus the live handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundNode {
    pub path: String,
    pub handle: NodeHandle,
}

/// First node under `root` (inclusive) satisfying `predicate`
pub fn find_by<F>(forest: &Forest, root: NodeHandle, predicate: F) -> Option<FoundNode>
where
    F: Fn(&TreeNode) -> bool,
{
    forest.get(root)?;

    let mut stack: Vec<(NodeHandle, String)> = vec![(root, ".".to_string())];
    while let Some((handle, path)) = stack.pop() {
        let Some(node) = forest.get(handle) else {
            continue;
        };
        if predicate(node) {
            return Some(FoundNode { path, handle });
        }

        let children = forest.children_of(handle);
        for (index, child) in children.iter().enumerate().rev() {
            let child_path = if path == "." {
                format!("childNodes.{}", index)
            } else {
                format!("{}.childNodes.{}", path, index)
            };
            stack.push((*child, child_path));
        }
    }
    None
}

/// First node whose fields contain every entry of `attributes`.
///
/// Keys may be tree columns (`id`, `unique_id`, `root_number`, ...) or
/// domain attributes.
pub fn find_by_attributes(
    forest: &Forest,
    root: NodeHandle,
    attributes: &Map<String, Value>,
) -> Option<FoundNode> {
    find_by(forest, root, |node| node.matches(attributes))
}

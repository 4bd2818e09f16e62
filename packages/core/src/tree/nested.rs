//! Boundary adapter between the arena and the plain nested-map shape.
//!
//! Both directions walk with an explicit stack, so a tree already held in
//! either shape converts at any depth. Parsing `NestedNode` from JSON is
//! bounded separately by `serde_json`'s recursion limit.

use crate::models::{NestedNode, TreeNode};
use crate::operations::TreeError;
use crate::tree::{Forest, NodeHandle};

/// Insert a nested structure into the forest as one linked tree.
///
/// Parent/child links come from the nesting itself; `parent_id` values in the
/// input are ignored until the next rebuild rewrites them.
pub fn import_nested(forest: &mut Forest, nested: &NestedNode) -> Result<NodeHandle, TreeError> {
    let root = forest.insert(TreeNode::from_record(nested.record.clone()));
    let mut stack: Vec<(&NestedNode, NodeHandle)> = nested
        .children
        .iter()
        .rev()
        .map(|child| (child, root))
        .collect();

    while let Some((current, parent)) = stack.pop() {
        let handle = forest.insert(TreeNode::from_record(current.record.clone()));
        forest.link(parent, handle, None)?;
        stack.extend(current.children.iter().rev().map(|child| (child, handle)));
    }

    forest.set_root_links(root, root)?;
    Ok(root)
}

/// Export the tree rooted at `root` as a nested structure
pub fn export_nested(forest: &Forest, root: NodeHandle) -> Result<NestedNode, TreeError> {
    forest.node(root)?;
    let order = forest.subtree(root);

    let position: std::collections::HashMap<NodeHandle, usize> = order
        .iter()
        .enumerate()
        .map(|(index, handle)| (*handle, index))
        .collect();

    let mut built: Vec<Option<NestedNode>> = order
        .iter()
        .map(|handle| forest.node(*handle).map(|node| Some(NestedNode::new(node.to_record()))))
        .collect::<Result<_, _>>()?;

    // Children follow their parent in pre-order, so walking backwards finishes
    // every child before its parent is taken.
    for index in (1..order.len()).rev() {
        let Some(mut node) = built[index].take() else {
            continue;
        };
        node.children.reverse();
        let parent_index = forest
            .parent_of(order[index])
            .and_then(|parent| position.get(&parent).copied());
        if let Some(Some(parent)) = parent_index.map(|p| built[p].as_mut()) {
            parent.children.push(node);
        }
    }

    let mut nested = built
        .first_mut()
        .and_then(Option::take)
        .ok_or_else(|| TreeError::stale_handle(root))?;
    nested.children.reverse();
    Ok(nested)
}

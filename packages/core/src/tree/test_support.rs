//! Shared helpers for tree unit tests

use crate::models::TreeNode;
use crate::tree::{Forest, NodeHandle};

pub(crate) fn node(unique_id: &str) -> TreeNode {
    TreeNode::new("catalog").with_unique_id(unique_id)
}

/// Insert `unique_id` as the last child of `parent` without rebuilding
pub(crate) fn add(forest: &mut Forest, parent: NodeHandle, unique_id: &str) -> NodeHandle {
    let child = forest.insert(node(unique_id));
    forest.link(parent, child, None).unwrap();
    forest.invalidate(parent).unwrap();
    let root = forest.root_of(parent).unwrap();
    forest.set_root_links(child, root).unwrap();
    child
}

/// `(left, right, depth)` of a node
pub(crate) fn lrd(forest: &Forest, handle: NodeHandle) -> (i64, i64, i64) {
    let node = forest.get(handle).unwrap();
    (
        node.left.unwrap(),
        node.right.unwrap(),
        node.depth.unwrap(),
    )
}

/// Check containment, sibling ordering, and depth for a built tree
pub(crate) fn assert_nested_set_invariants(forest: &Forest, root: NodeHandle) {
    assert!(forest.is_built(root), "tree must be built");
    let (root_left, root_right, root_depth) = lrd(forest, root);
    assert_eq!(root_left, 1);
    assert_eq!(root_depth, 1);
    assert_eq!(root_right, 2 * forest.subtree_size(root) as i64);

    for handle in forest.subtree(root) {
        let (left, right, depth) = lrd(forest, handle);
        assert!(left < right, "left < right for {}", handle);

        for descendant in forest.descendants(handle) {
            let (d_left, d_right, _) = lrd(forest, descendant);
            assert!(left < d_left && d_left < d_right && d_right < right);
        }

        let children = forest.children_of(handle);
        for pair in children.windows(2) {
            assert!(lrd(forest, pair[0]).1 < lrd(forest, pair[1]).0);
        }
        for child in children {
            assert_eq!(lrd(forest, *child).2, depth + 1);
            assert_eq!(
                forest.get(*child).unwrap().parent_id,
                forest.get(handle).unwrap().unique_id
            );
        }
    }
}

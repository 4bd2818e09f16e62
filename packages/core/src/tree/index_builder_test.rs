//! Tests for the iterative nested-set rebuild
//!
//! Covers index assignment for the documented scenarios, idempotence,
//! change detection against persisted snapshots, cycle detection, and
//! very deep trees.

#[cfg(test)]
mod rebuild_tests {
    use crate::operations::TreeError;
    use crate::tree::test_support::{add, assert_nested_set_invariants, lrd, node};
    use crate::tree::{force_rebuild, rebuild, Forest};

    #[test]
    fn test_single_root_gets_one_two() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));

        let changes = rebuild(&mut forest, root).unwrap();

        assert_eq!(lrd(&forest, root), (1, 2, 1));
        assert!(forest.is_built(root));
        assert_eq!(changes.len(), 1);
        assert!(changes.changes[0].is_insert());
        assert!(forest.get(root).unwrap().root_group.is_some());
    }

    #[test]
    fn test_root_with_one_child() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let child = add(&mut forest, root, "child");

        rebuild(&mut forest, root).unwrap();

        assert_eq!(lrd(&forest, root), (1, 4, 1));
        assert_eq!(lrd(&forest, child), (2, 3, 2));
        assert_eq!(
            forest.get(child).unwrap().parent_id.as_deref(),
            Some("root")
        );
    }

    #[test]
    fn test_grandchild_under_second_child() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let first = add(&mut forest, root, "first");
        let second = add(&mut forest, root, "second");
        let grandchild = add(&mut forest, second, "grandchild");

        rebuild(&mut forest, root).unwrap();

        assert_eq!(lrd(&forest, root), (1, 8, 1));
        assert_eq!(lrd(&forest, first), (2, 3, 2));
        assert_eq!(lrd(&forest, second), (4, 7, 2));
        assert_eq!(lrd(&forest, grandchild), (5, 6, 3));
        assert_nested_set_invariants(&forest, root);
    }

    #[test]
    fn test_children_numbered_in_sequence_order() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let handles: Vec<_> = (0..5)
            .map(|i| add(&mut forest, root, &format!("c{}", i)))
            .collect();

        let changes = rebuild(&mut forest, root).unwrap();

        let lefts: Vec<i64> = handles.iter().map(|h| lrd(&forest, *h).0).collect();
        assert_eq!(lefts, vec![2, 4, 6, 8, 10]);
        let change_order: Vec<&str> = changes.iter().map(|c| c.unique_id.as_str()).collect();
        assert_eq!(change_order, vec!["root", "c0", "c1", "c2", "c3", "c4"]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        add(&mut forest, root, "a");

        let first = rebuild(&mut forest, root).unwrap();
        let snapshot = forest.flatten(root);
        let second = rebuild(&mut forest, root).unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(forest.flatten(root), snapshot);
    }

    #[test]
    fn test_unchanged_persisted_nodes_are_not_reported() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = add(&mut forest, root, "a");
        rebuild(&mut forest, root).unwrap();

        // Pretend the tree was written as built.
        for handle in forest.subtree(root) {
            let n = forest.get_mut(handle).unwrap();
            let snapshot = n.tree_attributes();
            n.set_persisted(snapshot);
        }

        let changes = force_rebuild(&mut forest, root).unwrap();
        assert!(changes.is_empty());

        let b = add(&mut forest, a, "b");
        let changes = rebuild(&mut forest, root).unwrap();
        let reported: Vec<&str> = changes.iter().map(|c| c.unique_id.as_str()).collect();
        assert_eq!(reported, vec!["root", "a", "b"]);

        let root_change = &changes.changes[0];
        assert_eq!(root_change.changed_columns(), vec!["right"]);
        assert!(changes.changes[2].is_insert());
        assert_eq!(lrd(&forest, b), (3, 4, 3));
    }

    #[test]
    fn test_descendants_inherit_tree_type_and_root_group() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let child = forest.insert(crate::models::TreeNode::new("other").with_unique_id("child"));
        forest.link(root, child, None).unwrap();

        rebuild(&mut forest, root).unwrap();

        let root_node = forest.get(root).unwrap().clone();
        let child_node = forest.get(child).unwrap();
        assert_eq!(child_node.tree_type, "catalog");
        assert_eq!(child_node.root_group, root_node.root_group);
        assert_eq!(forest.root_of(child), Some(root));
    }

    #[test]
    fn test_missing_unique_ids_are_assigned() {
        let mut forest = Forest::new();
        let root = forest.insert(crate::models::TreeNode::new("catalog"));
        let child = forest.insert(crate::models::TreeNode::new("catalog"));
        forest.link(root, child, None).unwrap();

        rebuild(&mut forest, root).unwrap();

        let root_id = forest.get(root).unwrap().unique_id.clone();
        assert!(root_id.is_some());
        assert_eq!(forest.get(child).unwrap().parent_id, root_id);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = add(&mut forest, root, "a");
        // Bypass the public API to create a back edge.
        forest.link(a, root, None).unwrap();

        let err = rebuild(&mut forest, root).unwrap_err();
        match err {
            TreeError::InvalidTree {
                tree_type,
                unique_id,
                ..
            } => {
                assert_eq!(tree_type, "catalog");
                assert_eq!(unique_id, "root");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_stale_root_handle() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        forest.free(root).unwrap();
        assert!(matches!(
            rebuild(&mut forest, root),
            Err(TreeError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_very_deep_chain_does_not_overflow() {
        let mut forest = Forest::new();
        let root = forest.insert(node("n0"));
        let mut parent = root;
        for i in 1..100_000 {
            let child = forest.insert(node(&format!("n{}", i)));
            forest.link(parent, child, None).unwrap();
            parent = child;
        }

        let changes = rebuild(&mut forest, root).unwrap();

        assert_eq!(changes.len(), 100_000);
        assert_eq!(lrd(&forest, root), (1, 200_000, 1));
        assert_eq!(lrd(&forest, parent), (100_000, 100_001, 100_000));
    }

    #[test]
    fn test_subtree_rebuild_keeps_owner_root() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = add(&mut forest, root, "a");
        let a1 = add(&mut forest, a, "a1");
        rebuild(&mut forest, root).unwrap();

        forest.set_built(a, false).unwrap();
        rebuild(&mut forest, a).unwrap();

        assert_eq!(lrd(&forest, a), (1, 4, 1));
        assert_eq!(lrd(&forest, a1), (2, 3, 2));
        assert_eq!(forest.root_of(a1), Some(root));
        assert_eq!(forest.get(a).unwrap().parent_id.as_deref(), Some("root"));
        assert!(!forest.is_built(root));

        rebuild(&mut forest, root).unwrap();
        assert_eq!(lrd(&forest, a), (2, 5, 2));
        assert_nested_set_invariants(&forest, root);
    }
}

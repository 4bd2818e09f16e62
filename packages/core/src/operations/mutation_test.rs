//! Tests for structural tree mutations
//!
//! Covers attach/move/remove scenarios and the operations each one leaves
//! queued in the persistence session.

#[cfg(test)]
mod mutation_tests {
    use crate::db::{Batch, PersistenceSession};
    use crate::models::TreeNode;
    use crate::operations::{TreeError, TreeMutator};
    use crate::tree::test_support::{assert_nested_set_invariants, lrd, node};
    use crate::tree::{Forest, NodeHandle};
    use serde_json::json;

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Build `root -> children...` through the mutator
    fn tree(
        forest: &mut Forest,
        session: &mut PersistenceSession,
        children: &[&str],
    ) -> (NodeHandle, Vec<NodeHandle>) {
        let root = forest.insert(node("root"));
        let handles: Vec<NodeHandle> = children.iter().map(|id| forest.insert(node(id))).collect();
        TreeMutator::new(forest, session)
            .add_children(root, handles.clone())
            .unwrap();
        (root, handles)
    }

    /// Pretend every node of the tree was written, with storage ids in pre-order
    fn mark_stored(forest: &mut Forest, session: &mut PersistenceSession, root: NodeHandle) {
        for (offset, handle) in forest.subtree(root).into_iter().enumerate() {
            let n = forest.get_mut(handle).unwrap();
            n.storage_id = Some(offset as i64 + 1);
            let snapshot = n.tree_attributes();
            n.set_persisted(snapshot);
        }
        for tree_type in session.tree_types() {
            session.discard_tree_type(&tree_type);
        }
    }

    fn deleted_ids(session: &PersistenceSession) -> Vec<i64> {
        session
            .pending("catalog")
            .map(|pending| pending.deletes().to_vec())
            .unwrap_or_default()
    }

    fn child_ids(forest: &Forest, parent: NodeHandle) -> Vec<String> {
        forest
            .children_of(parent)
            .iter()
            .filter_map(|h| forest.get(*h).and_then(|n| n.unique_id.clone()))
            .collect()
    }

    // ========================================================================
    // Attach
    // ========================================================================

    #[test]
    fn test_attach_one_child_to_empty_root() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let root = forest.insert(node("root"));
        let child = forest.insert(node("child"));

        let rebuilt = TreeMutator::new(&mut forest, &mut session)
            .attach(root, child, None)
            .unwrap();

        assert_eq!(rebuilt, root);
        assert_eq!(lrd(&forest, root), (1, 4, 1));
        assert_eq!(lrd(&forest, child), (2, 3, 2));
        assert!(forest.is_built(root));
        assert_eq!(session.pending("catalog").unwrap().inserts().len(), 2);
    }

    #[test]
    fn test_attach_grandchild_to_second_child() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["first", "second"]);
        let grandchild = forest.insert(node("grandchild"));

        TreeMutator::new(&mut forest, &mut session)
            .attach(children[1], grandchild, None)
            .unwrap();

        assert_eq!(lrd(&forest, root), (1, 8, 1));
        assert_eq!(lrd(&forest, children[0]), (2, 3, 2));
        assert_eq!(lrd(&forest, children[1]), (4, 7, 2));
        assert_eq!(lrd(&forest, grandchild), (5, 6, 3));
        assert_nested_set_invariants(&forest, root);
    }

    #[test]
    fn test_attach_with_explicit_root() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a"]);
        let child = forest.insert(node("b"));

        let rebuilt = TreeMutator::new(&mut forest, &mut session)
            .attach(children[0], child, Some(root))
            .unwrap();

        assert_eq!(rebuilt, root);
        assert_eq!(forest.root_of(child), Some(root));
    }

    #[test]
    fn test_attach_with_intermediate_root_rebuilds_true_root() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b"]);
        let a1 = forest.insert(node("a1"));

        let rebuilt = TreeMutator::new(&mut forest, &mut session)
            .attach(children[0], a1, Some(children[0]))
            .unwrap();

        assert_eq!(rebuilt, root);
        assert!(forest.is_built(root));
        assert_eq!(lrd(&forest, root), (1, 8, 1));
        assert_eq!(lrd(&forest, children[0]), (2, 5, 2));
        assert_eq!(lrd(&forest, a1), (3, 4, 3));
        assert_eq!(lrd(&forest, children[1]), (6, 7, 2));
        assert_nested_set_invariants(&forest, root);

        let queued_a = session
            .pending("catalog")
            .and_then(|pending| pending.inserts().get("a").cloned())
            .unwrap();
        assert_eq!((queued_a.left, queued_a.depth), (Some(2), Some(2)));
    }

    #[test]
    fn test_attach_generates_missing_tree_type() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let root = forest.insert(TreeNode::new(""));
        let child = forest.insert(TreeNode::new(""));

        TreeMutator::new(&mut forest, &mut session)
            .attach(root, child, None)
            .unwrap();

        let tree_type = forest.get(root).unwrap().tree_type.clone();
        assert!(tree_type.starts_with("tree_type_"));
        assert_eq!(forest.get(child).unwrap().tree_type, tree_type);
        assert!(forest.get(child).unwrap().unique_id.is_some());
        assert_eq!(session.tree_types(), vec![tree_type]);
    }

    #[test]
    fn test_attach_replaces_sibling_with_same_unique_id() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b", "c"]);
        let b_child = forest.insert(node("b-child"));
        TreeMutator::new(&mut forest, &mut session)
            .attach(children[1], b_child, None)
            .unwrap();
        mark_stored(&mut forest, &mut session, root);

        let replacement = forest.insert(node("b").with_attribute("title", json!("new b")));
        TreeMutator::new(&mut forest, &mut session)
            .attach(root, replacement, None)
            .unwrap();

        assert_eq!(child_ids(&forest, root), vec!["a", "b", "c"]);
        assert_eq!(forest.children_of(root)[1], replacement);
        assert!(!forest.is_alive(children[1]));

        let stored = forest.get(replacement).unwrap();
        assert_eq!(stored.storage_id, Some(3));
        assert_eq!(stored.attributes.get("title"), Some(&json!("new b")));
        // the replaced node's child is gone and must be deleted
        assert_eq!(deleted_ids(&session), vec![4]);
        assert_nested_set_invariants(&forest, root);
    }

    #[test]
    fn test_replacement_keeps_stored_descendants() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b", "c"]);
        let b_child = forest.insert(node("b-child"));
        TreeMutator::new(&mut forest, &mut session)
            .attach(children[1], b_child, None)
            .unwrap();
        mark_stored(&mut forest, &mut session, root);

        let replacement = forest.insert(node("b"));
        let kept = forest.insert(node("b-child"));
        forest.link(replacement, kept, None).unwrap();
        forest.set_root_links(replacement, replacement).unwrap();

        TreeMutator::new(&mut forest, &mut session)
            .attach(root, replacement, None)
            .unwrap();

        assert_eq!(forest.get(kept).unwrap().storage_id, Some(4));
        assert!(deleted_ids(&session).is_empty());
        assert!(session
            .pending("catalog")
            .map(|pending| pending.inserts().is_empty())
            .unwrap_or(true));
        assert_nested_set_invariants(&forest, root);
    }

    #[test]
    fn test_attach_under_own_descendant_is_rejected() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a"]);

        let err = TreeMutator::new(&mut forest, &mut session)
            .attach(children[0], root, None)
            .unwrap_err();
        assert!(matches!(err, TreeError::CyclicMove { .. }));
    }

    // ========================================================================
    // Move
    // ========================================================================

    #[test]
    fn test_move_grandchild_up_to_root() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b"]);
        let g1 = forest.insert(node("g1"));
        let g2 = forest.insert(node("g2"));
        TreeMutator::new(&mut forest, &mut session)
            .add_children(children[1], [g1, g2])
            .unwrap();
        assert_eq!(lrd(&forest, root), (1, 10, 1));
        assert_eq!(lrd(&forest, children[1]), (4, 9, 2));

        TreeMutator::new(&mut forest, &mut session)
            .move_node(g1, root)
            .unwrap();

        assert_eq!(lrd(&forest, root), (1, 10, 1));
        assert_eq!(forest.subtree_size(root), 5);
        assert_eq!(lrd(&forest, children[1]), (4, 7, 2));
        assert_eq!(lrd(&forest, g2), (5, 6, 3));
        assert_eq!(lrd(&forest, g1), (8, 9, 2));
        assert_eq!(forest.get(g1).unwrap().parent_id.as_deref(), Some("root"));
        assert_nested_set_invariants(&forest, root);
    }

    #[test]
    fn test_move_away_and_back_leaves_nothing_queued() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b"]);
        mark_stored(&mut forest, &mut session, root);

        let mut mutator = TreeMutator::new(&mut forest, &mut session);
        mutator.move_node(children[1], children[0]).unwrap();
        mutator.move_node(children[1], root).unwrap();

        assert_eq!(lrd(&forest, children[1]), (4, 5, 2));
        assert!(!forest.get(children[1]).unwrap().is_dirty());
        let batches = session
            .pending("catalog")
            .map(|pending| pending.batches())
            .unwrap_or_default();
        assert!(batches.is_empty(), "stale batches queued: {:?}", batches);
        assert!(session
            .pending("catalog")
            .map(|pending| pending.written().is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn test_partial_return_keeps_only_remaining_columns() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b", "c"]);
        mark_stored(&mut forest, &mut session, root);

        let mut mutator = TreeMutator::new(&mut forest, &mut session);
        mutator.move_node(children[2], children[0]).unwrap();
        mutator.move_node(children[2], children[1]).unwrap();

        // c now sits under b: a is back to its stored columns
        let pending = session.pending("catalog").unwrap();
        assert!(!pending.updates().contains("a"));
        assert!(pending.updates().contains("c"));
        assert!(pending.updates().contains("b"));
    }

    #[test]
    fn test_move_emits_updates_for_stored_nodes() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b"]);
        mark_stored(&mut forest, &mut session, root);

        TreeMutator::new(&mut forest, &mut session)
            .move_node(children[1], children[0])
            .unwrap();

        let pending = session.pending("catalog").unwrap();
        assert!(pending.inserts().is_empty());
        let b_update = pending.updates().get("b").unwrap();
        assert_eq!(b_update.columns.get("parent_id"), Some(&json!("a")));
        assert_eq!(b_update.columns.get("depth"), Some(&json!(3)));
        assert!(pending
            .batches()
            .iter()
            .all(|batch| matches!(batch, Batch::Update(_))));
    }

    #[test]
    fn test_move_into_descendant_leaves_tree_unchanged() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a"]);
        let deep = forest.insert(node("deep"));
        TreeMutator::new(&mut forest, &mut session)
            .attach(children[0], deep, None)
            .unwrap();
        let before = forest.flatten(root);

        let err = TreeMutator::new(&mut forest, &mut session)
            .move_node(children[0], deep)
            .unwrap_err();

        match err {
            TreeError::CyclicMove {
                unique_id,
                target_id,
            } => {
                assert_eq!(unique_id, "a");
                assert_eq!(target_id, "deep");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(forest.flatten(root), before);
        assert!(forest.is_built(root));
    }

    #[test]
    fn test_move_onto_itself_is_rejected() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (_, children) = tree(&mut forest, &mut session, &["a"]);

        let err = TreeMutator::new(&mut forest, &mut session)
            .move_node(children[0], children[0])
            .unwrap_err();
        assert!(matches!(err, TreeError::CyclicMove { .. }));
    }

    #[test]
    fn test_move_across_trees_rebuilds_both() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (left_root, left_children) = tree(&mut forest, &mut session, &["a", "b"]);
        let right_root = forest.insert(node("other-root"));

        TreeMutator::new(&mut forest, &mut session)
            .move_node(left_children[0], right_root)
            .unwrap();

        assert!(forest.is_built(left_root));
        assert!(forest.is_built(right_root));
        assert_eq!(lrd(&forest, left_root), (1, 4, 1));
        assert_eq!(lrd(&forest, right_root), (1, 4, 1));
        assert_eq!(
            forest.get(left_children[0]).unwrap().root_group,
            forest.get(right_root).unwrap().root_group
        );
    }

    // ========================================================================
    // Remove
    // ========================================================================

    fn stored_tree_with_branch(
        forest: &mut Forest,
        session: &mut PersistenceSession,
    ) -> (NodeHandle, Vec<NodeHandle>, Vec<NodeHandle>) {
        let (root, children) = tree(forest, session, &["a", "b", "c"]);
        let b1 = forest.insert(node("b1"));
        let b2 = forest.insert(node("b2"));
        TreeMutator::new(forest, session)
            .add_children(children[1], [b1, b2])
            .unwrap();
        mark_stored(forest, session, root);
        (root, children, vec![b1, b2])
    }

    #[test]
    fn test_remove_with_promotion() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children, _) = stored_tree_with_branch(&mut forest, &mut session);
        let before = forest.subtree_size(root);

        let removed = TreeMutator::new(&mut forest, &mut session)
            .remove(children[1], false)
            .unwrap();

        assert!(removed);
        assert_eq!(child_ids(&forest, root), vec!["a", "b1", "b2", "c"]);
        assert_eq!(forest.subtree_size(root), before - 1);
        // pre-order ids: root=1, a=2, b=3, b1=4, b2=5, c=6
        assert_eq!(deleted_ids(&session), vec![3]);
        assert!(!forest.is_built(root));

        TreeMutator::new(&mut forest, &mut session)
            .rebuild(root)
            .unwrap();
        assert_nested_set_invariants(&forest, root);
        assert_eq!(lrd(&forest, root), (1, 10, 1));
    }

    #[test]
    fn test_remove_with_cascade() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children, grandchildren) = stored_tree_with_branch(&mut forest, &mut session);
        let before = forest.subtree_size(root);

        let removed = TreeMutator::new(&mut forest, &mut session)
            .remove(children[1], true)
            .unwrap();

        assert!(removed);
        assert_eq!(forest.subtree_size(root), before - 3);
        assert_eq!(deleted_ids(&session), vec![3, 4, 5]);
        assert!(grandchildren.iter().all(|h| !forest.is_alive(*h)));
        assert_eq!(child_ids(&forest, root), vec!["a", "c"]);
    }

    #[test]
    fn test_remove_stale_handle_is_noop() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (_, children) = tree(&mut forest, &mut session, &["a"]);
        let mut mutator = TreeMutator::new(&mut forest, &mut session);

        assert!(mutator.remove(children[0], true).unwrap());
        assert!(!mutator.remove(children[0], true).unwrap());
    }

    #[test]
    fn test_remove_root() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, _, _) = stored_tree_with_branch(&mut forest, &mut session);
        let mut mutator = TreeMutator::new(&mut forest, &mut session);

        assert!(!mutator.remove(root, false).unwrap());
        assert!(mutator.remove(root, true).unwrap());
        assert!(forest.is_empty());
        assert_eq!(deleted_ids(&session), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_remove_unsaved_node_only_purges() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a", "b"]);

        TreeMutator::new(&mut forest, &mut session)
            .remove(children[0], true)
            .unwrap();

        let pending = session.pending("catalog").unwrap();
        assert!(pending.deletes().is_empty());
        assert!(!pending.inserts().contains("a"));
        assert!(pending.inserts().contains("root"));
        assert!(forest.is_alive(root));
    }

    #[test]
    fn test_remove_by_attributes_and_storage_id() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, _, _) = stored_tree_with_branch(&mut forest, &mut session);
        let mut mutator = TreeMutator::new(&mut forest, &mut session);

        let by_attrs = json!({"unique_id": "b2"});
        assert!(mutator
            .remove_by_attributes(root, by_attrs.as_object().unwrap(), true)
            .unwrap());
        assert!(mutator.remove_by_storage_id(root, 6, true).unwrap());
        assert!(!mutator.remove_by_storage_id(root, 99, true).unwrap());

        assert_eq!(child_ids(&forest, root), vec!["a", "b"]);
        assert_eq!(deleted_ids(&session), vec![5, 6]);
    }

    // ========================================================================
    // Re-rooting and tree types
    // ========================================================================

    #[test]
    fn test_make_root_splits_tree() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children, grandchildren) = stored_tree_with_branch(&mut forest, &mut session);
        let old_group = forest.get(root).unwrap().root_group.clone();

        TreeMutator::new(&mut forest, &mut session)
            .make_root(children[1])
            .unwrap();

        assert_eq!(forest.parent_of(children[1]), None);
        assert_eq!(lrd(&forest, root), (1, 6, 1));
        assert_eq!(lrd(&forest, children[1]), (1, 6, 1));
        assert_eq!(lrd(&forest, grandchildren[0]), (2, 3, 2));

        let new_group = forest.get(children[1]).unwrap().root_group.clone();
        assert_ne!(new_group, old_group);
        assert_eq!(forest.get(grandchildren[1]).unwrap().root_group, new_group);
        assert_eq!(forest.get(children[1]).unwrap().parent_id, None);
        assert_eq!(forest.roots().len(), 2);
    }

    #[test]
    fn test_set_tree_type_moves_pending_operations() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, children) = tree(&mut forest, &mut session, &["a"]);

        TreeMutator::new(&mut forest, &mut session)
            .set_tree_type(root, "menu")
            .unwrap();

        assert_eq!(forest.get(children[0]).unwrap().tree_type, "menu");
        assert_eq!(session.tree_types(), vec!["menu"]);
        assert_eq!(session.pending("menu").unwrap().inserts().len(), 2);
    }

    #[test]
    fn test_set_tree_type_on_stored_tree_updates_column() {
        let mut forest = Forest::new();
        let mut session = PersistenceSession::default();
        let (root, _) = tree(&mut forest, &mut session, &["a"]);
        mark_stored(&mut forest, &mut session, root);

        TreeMutator::new(&mut forest, &mut session)
            .set_tree_type(root, "menu")
            .unwrap();

        let batches = session.pending("menu").unwrap().batches();
        assert_eq!(batches.len(), 1);
        match &batches[0] {
            Batch::Update(update) => {
                assert_eq!(update.column, "tree_type");
                assert_eq!(update.assignments.len(), 2);
            }
            other => panic!("unexpected batch: {other:?}"),
        }
    }
}

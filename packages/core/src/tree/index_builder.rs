//! Iterative nested-set index builder.
//!
//! Walks a tree once, depth-first in children order, using an explicit stack
//! of `(node, next_child)` frames so stack usage is bounded by the heap rather
//! than the call stack. Every node receives `left`, `right`, `depth`,
//! `parent_id`, `tree_type`, and `root_group`; nodes whose tracked columns now
//! differ from their persisted snapshot are reported in a [`ChangeSet`].

use crate::models::{generate_root_group, TreeAttributes};
use crate::operations::TreeError;
use crate::tree::{Forest, NodeHandle};
use std::collections::HashSet;

/// One node whose tracked tree columns differ from the persisted snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub handle: NodeHandle,
    pub unique_id: String,
    pub storage_id: Option<i64>,
    /// `None` for a node that was never persisted
    pub old: Option<TreeAttributes>,
    pub new: TreeAttributes,
}

impl Change {
    /// Tracked columns that need writing
    pub fn changed_columns(&self) -> Vec<&'static str> {
        self.new.changed_columns(self.old.as_ref())
    }

    pub fn is_insert(&self) -> bool {
        self.storage_id.is_none()
    }
}

/// Changes produced by one rebuild, in pre-order (ascending `left`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub tree_type: String,
    pub root_group: Option<String>,
    pub changes: Vec<Change>,
    /// Unique ids of visited stored nodes whose columns match their snapshot
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Rebuild indices for the tree rooted at `root`.
///
/// No-op returning an empty change set when the root is already built.
/// Rebuilding a node that still has a parent recomputes its subtree only,
/// numbering from `left = 1`, and leaves the owning root unbuilt so the next
/// rebuild from the true root corrects the whole tree.
pub fn rebuild(forest: &mut Forest, root: NodeHandle) -> Result<ChangeSet, TreeError> {
    let slot = forest.slot(root)?;
    if slot.is_built {
        return Ok(ChangeSet::default());
    }
    let parent = slot.parent;
    let owner = if parent.is_some() { slot.root } else { root };
    let parent_id = match parent {
        Some(parent) => forest.node(parent)?.unique_id.clone(),
        None => None,
    };

    let (tree_type, root_group) = {
        let node = forest.node_mut(root)?;
        node.ensure_unique_id();
        node.parent_id = parent_id;
        node.left = Some(1);
        node.right = None;
        node.depth = Some(1);
        let root_group = node
            .root_group
            .get_or_insert_with(generate_root_group)
            .clone();
        (node.tree_type.clone(), root_group)
    };
    forest.slot_mut(root)?.root = owner;
    if owner != root {
        forest.set_built(owner, false)?;
    }

    let mut counter: i64 = 1;
    let mut stack: Vec<(NodeHandle, usize)> = vec![(root, 0)];
    let mut visited: HashSet<NodeHandle> = HashSet::from([root]);
    let mut order: Vec<NodeHandle> = vec![root];

    while let Some(&(current, next)) = stack.last() {
        let child = forest.slot(current)?.children.get(next).copied();

        let Some(child) = child else {
            counter += 1;
            forest.node_mut(current)?.right = Some(counter);
            stack.pop();
            continue;
        };

        if let Some(frame) = stack.last_mut() {
            frame.1 += 1;
        }
        if !visited.insert(child) {
            return Err(TreeError::invalid_tree(
                tree_type,
                forest.node(child)?.display_id(),
                "node reached twice while rebuilding (cycle)",
            ));
        }

        counter += 1;
        let depth = stack.len() as i64 + 1;
        let parent_unique_id = forest.node(current)?.unique_id.clone();

        let slot = forest.slot_mut(child)?;
        slot.parent = Some(current);
        slot.root = owner;
        slot.is_built = false;

        let node = &mut slot.node;
        node.ensure_unique_id();
        node.parent_id = parent_unique_id;
        node.left = Some(counter);
        node.right = None;
        node.depth = Some(depth);
        node.tree_type = tree_type.clone();
        node.root_group = Some(root_group.clone());

        order.push(child);
        stack.push((child, 0));
    }

    let mut changes = Vec::new();
    let mut unchanged = Vec::new();
    for handle in &order {
        let node = forest.node(*handle)?;
        let new = node.tree_attributes();
        let old = node.persisted().cloned();
        if old.as_ref() == Some(&new) {
            if let Some(unique_id) = node.unique_id.clone() {
                unchanged.push(unique_id);
            }
        } else {
            changes.push(Change {
                handle: *handle,
                unique_id: node.unique_id.clone().unwrap_or_default(),
                storage_id: node.storage_id,
                old,
                new,
            });
        }
    }

    forest.set_built(root, true)?;

    tracing::debug!(
        tree_type = %tree_type,
        root_group = %root_group,
        nodes = order.len(),
        changed = changes.len(),
        "Rebuilt nested-set indices"
    );

    Ok(ChangeSet {
        tree_type,
        root_group: Some(root_group),
        changes,
        unchanged,
    })
}

/// Clear the build flag and rebuild unconditionally
pub fn force_rebuild(forest: &mut Forest, root: NodeHandle) -> Result<ChangeSet, TreeError> {
    forest.set_built(root, false)?;
    rebuild(forest, root)
}

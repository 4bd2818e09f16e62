//! Entity lifecycle hooks
//!
//! The surrounding entity layer calls these after its own create, update or
//! delete succeeds. Each hook keeps the affected tree indexed and queues the
//! resulting operations into the session; nothing is written until the
//! session is flushed.

use crate::db::PersistenceSession;
use crate::models::{generate_tree_type, TRACKED_COLUMNS};
use crate::operations::{TreeError, TreeMutator};
use crate::tree::{ChangeSet, Forest, NodeHandle};
use tracing::debug;

pub struct TreeLifecycle<'a> {
    forest: &'a mut Forest,
    session: &'a mut PersistenceSession,
}

impl<'a> TreeLifecycle<'a> {
    pub fn new(forest: &'a mut Forest, session: &'a mut PersistenceSession) -> Self {
        Self { forest, session }
    }

    fn mutator(&mut self) -> TreeMutator<'_> {
        TreeMutator::new(&mut *self.forest, &mut *self.session)
    }

    /// A node was created: give it an id and a tree type, then rebuild its tree
    pub fn on_created(&mut self, node: NodeHandle) -> Result<ChangeSet, TreeError> {
        let root = self
            .forest
            .root_of(node)
            .ok_or_else(|| TreeError::stale_handle(node))?;

        self.forest.node_mut(node)?.ensure_unique_id();
        if self.forest.node(root)?.tree_type.is_empty() {
            let own = self.forest.node(node)?.tree_type.clone();
            let tree_type = if own.is_empty() { generate_tree_type() } else { own };
            self.forest.set_tree_type(root, tree_type)?;
        }

        self.forest.invalidate(node)?;
        self.mutator().rebuild(root)
    }

    /// A node was updated.
    ///
    /// Does nothing unless one of the tracked tree columns is dirty. A dirty
    /// `parent_id` relinks the node under the named parent (or makes it a
    /// root); a dirty `tree_type` on a root moves the whole tree.
    pub fn on_updated(
        &mut self,
        node: NodeHandle,
        dirty: &[&str],
    ) -> Result<Option<ChangeSet>, TreeError> {
        if !dirty.iter().any(|column| TRACKED_COLUMNS.contains(column)) {
            return Ok(None);
        }

        let root = self
            .forest
            .root_of(node)
            .ok_or_else(|| TreeError::stale_handle(node))?;

        if dirty.contains(&"parent_id") {
            let wanted = self
                .forest
                .node(node)?
                .parent_id
                .clone()
                .filter(|id| !id.is_empty());
            let linked = self
                .forest
                .parent_of(node)
                .and_then(|parent| self.forest.get(parent))
                .and_then(|parent| parent.unique_id.clone());

            if wanted != linked {
                return match wanted {
                    Some(parent_id) => {
                        let Some(parent) = self.forest.find_unique(&parent_id) else {
                            let current = self.forest.node(node)?;
                            return Err(TreeError::invalid_tree(
                                current.tree_type.clone(),
                                current.display_id(),
                                format!("parent '{}' is not loaded", parent_id),
                            ));
                        };
                        self.mutator().move_node(node, parent)?;
                        debug!(node = %node, parent = %parent_id, "Relinked after parent_id update");
                        Ok(Some(ChangeSet::default()))
                    }
                    None => self.mutator().make_root(node).map(Some),
                };
            }
        }

        if dirty.contains(&"tree_type") && root == node {
            let current = self.forest.node(node)?.tree_type.clone();
            let stale_types: Vec<String> = self
                .session
                .tree_types()
                .into_iter()
                .filter(|tree_type| *tree_type != current)
                .collect();
            for handle in self.forest.subtree(root) {
                if let Some(unique_id) = self.forest.node(handle)?.unique_id.clone() {
                    for tree_type in &stale_types {
                        self.session.purge(tree_type, &unique_id);
                    }
                }
            }
            return self.mutator().set_tree_type(root, current).map(Some);
        }

        self.forest.invalidate(node)?;
        self.mutator().rebuild(root).map(Some)
    }

    /// A node was deleted: remove it (and its subtree with `cascade`) and
    /// rebuild what is left of its tree. Returns `false` when nothing was
    /// removed.
    pub fn on_deleted(&mut self, node: NodeHandle, cascade: bool) -> Result<bool, TreeError> {
        let Some(root) = self.forest.root_of(node) else {
            return Ok(false);
        };
        if !self.mutator().remove(node, cascade)? {
            return Ok(false);
        }
        if root != node && self.forest.is_alive(root) {
            self.mutator().rebuild(root)?;
        }
        Ok(true)
    }
}

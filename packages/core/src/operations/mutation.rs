//! Structural tree mutations.
//!
//! `TreeMutator` borrows a [`Forest`] together with the caller's
//! [`PersistenceSession`], so every structural change records its inserts,
//! updates, and deletes into the session that will later flush them.
//!
//! Attach and move rebuild the resolved root eagerly. Removal only relinks
//! and leaves the root unbuilt; the next rebuild or persist recomputes it.

use crate::db::PersistenceSession;
use crate::models::generate_tree_type;
use crate::operations::find::{find_by_attributes, FoundNode};
use crate::operations::TreeError;
use crate::tree::{rebuild, ChangeSet, Forest, NodeHandle};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

pub struct TreeMutator<'a> {
    forest: &'a mut Forest,
    session: &'a mut PersistenceSession,
}

impl<'a> TreeMutator<'a> {
    pub fn new(forest: &'a mut Forest, session: &'a mut PersistenceSession) -> Self {
        Self { forest, session }
    }

    pub fn forest(&self) -> &Forest {
        &*self.forest
    }

    /// Link `child` under `parent` and rebuild the tree owning `parent`.
    ///
    /// The owning tree is always rebuilt from its true root; an explicit
    /// `root` that is only an ancestor of `parent` is not numbered on its
    /// own. A sibling carrying the child's unique id is replaced in place;
    /// otherwise the child is appended. Returns the rebuilt root.
    pub fn attach(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
        root: Option<NodeHandle>,
    ) -> Result<NodeHandle, TreeError> {
        let resolved = self.link_child(parent, child, root)?;
        self.rebuild(resolved)?;
        Ok(resolved)
    }

    /// Attach several children in order with a single rebuild
    pub fn add_children<I>(&mut self, parent: NodeHandle, children: I) -> Result<NodeHandle, TreeError>
    where
        I: IntoIterator<Item = NodeHandle>,
    {
        let mut resolved = self
            .forest
            .root_of(parent)
            .ok_or_else(|| TreeError::stale_handle(parent))?;
        for child in children {
            resolved = self.link_child(parent, child, None)?;
        }
        self.rebuild(resolved)?;
        Ok(resolved)
    }

    /// Move `node` (with its subtree) under `new_parent`.
    ///
    /// Fails with `CyclicMove` before touching anything when `new_parent` is
    /// the node itself or one of its descendants. When the move crosses
    /// trees, the tree the node left is rebuilt as well.
    pub fn move_node(
        &mut self,
        node: NodeHandle,
        new_parent: NodeHandle,
    ) -> Result<NodeHandle, TreeError> {
        let old_root = self
            .forest
            .root_of(node)
            .ok_or_else(|| TreeError::stale_handle(node))?;

        let resolved = self.attach(new_parent, node, None)?;

        if old_root != resolved && old_root != node && self.forest.is_alive(old_root) {
            self.rebuild(old_root)?;
        }

        debug!(
            node = %node,
            new_parent = %new_parent,
            root = %resolved,
            "Moved node"
        );
        Ok(resolved)
    }

    /// Remove `node`.
    ///
    /// With `cascade`, the node and its whole subtree are removed. Without,
    /// the node's children take its place under its former parent in their
    /// existing order and only the node itself is removed. A parentless root
    /// can only be removed with `cascade`. Returns `false` when nothing was
    /// removed.
    pub fn remove(&mut self, node: NodeHandle, cascade: bool) -> Result<bool, TreeError> {
        if !self.forest.is_alive(node) {
            return Ok(false);
        }

        let Some(parent) = self.forest.parent_of(node) else {
            if !cascade {
                return Ok(false);
            }
            let removed = self.forest.free_subtree(node)?;
            for removed_node in &removed {
                self.session.record_delete(removed_node);
            }
            debug!(node = %node, removed = removed.len(), "Removed whole tree");
            return Ok(true);
        };

        let Some(position) = self
            .forest
            .children_of(parent)
            .iter()
            .position(|child| *child == node)
        else {
            return Ok(false);
        };

        self.forest.unlink(node)?;

        if cascade {
            let removed = self.forest.free_subtree(node)?;
            for removed_node in &removed {
                self.session.record_delete(removed_node);
            }
            debug!(node = %node, removed = removed.len(), "Removed subtree");
        } else {
            let children = self.forest.children_of(node).to_vec();
            for (offset, child) in children.iter().enumerate() {
                self.forest.unlink(*child)?;
                self.forest.link(parent, *child, Some(position + offset))?;
            }
            let removed = self.forest.free(node)?;
            self.session.record_delete(&removed);
            debug!(node = %node, promoted = children.len(), "Removed node, promoted children");
        }

        Ok(true)
    }

    /// Remove the first node under `root` matching `attributes`
    pub fn remove_by_attributes(
        &mut self,
        root: NodeHandle,
        attributes: &Map<String, Value>,
        cascade: bool,
    ) -> Result<bool, TreeError> {
        match find_by_attributes(self.forest, root, attributes) {
            Some(FoundNode { handle, .. }) => self.remove(handle, cascade),
            None => Ok(false),
        }
    }

    /// Remove the node stored under `storage_id`
    pub fn remove_by_storage_id(
        &mut self,
        root: NodeHandle,
        storage_id: i64,
        cascade: bool,
    ) -> Result<bool, TreeError> {
        let mut attributes = Map::new();
        attributes.insert("id".to_string(), json!(storage_id));
        self.remove_by_attributes(root, &attributes, cascade)
    }

    /// Detach `node` into an independent tree; both trees are rebuilt
    pub fn make_root(&mut self, node: NodeHandle) -> Result<ChangeSet, TreeError> {
        let old_root = self
            .forest
            .root_of(node)
            .ok_or_else(|| TreeError::stale_handle(node))?;
        if old_root == node {
            return self.rebuild(node);
        }

        self.forest.make_root(node)?;
        self.rebuild(old_root)?;
        self.rebuild(node)
    }

    /// Move a whole tree to another tree type.
    ///
    /// Operations still queued under the previous tree type are dropped and
    /// re-recorded under the new one.
    pub fn set_tree_type(
        &mut self,
        root: NodeHandle,
        tree_type: impl Into<String>,
    ) -> Result<ChangeSet, TreeError> {
        self.purge_pending(root)?;
        self.forest.set_tree_type(root, tree_type)?;
        self.rebuild(root)
    }

    /// Rebuild `root` and record its changes into the session
    pub fn rebuild(&mut self, root: NodeHandle) -> Result<ChangeSet, TreeError> {
        let changes = rebuild(self.forest, root)?;
        self.session.record(self.forest, &changes)?;
        Ok(changes)
    }

    fn link_child(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
        root: Option<NodeHandle>,
    ) -> Result<NodeHandle, TreeError> {
        self.forest.node(parent)?;
        self.forest.node(child)?;

        if parent == child || self.forest.is_ancestor(child, parent) {
            return Err(TreeError::cyclic_move(
                self.forest.node(child)?.display_id(),
                self.forest.node(parent)?.display_id(),
            ));
        }

        self.forest.node_mut(parent)?.ensure_unique_id();
        let child_unique_id = self.forest.node_mut(child)?.ensure_unique_id().to_string();

        let resolved = self
            .forest
            .root_of(parent)
            .ok_or_else(|| TreeError::stale_handle(parent))?;
        if let Some(hint) = root.filter(|hint| *hint != resolved) {
            debug!(hint = %hint, root = %resolved, "Attach root hint is not the owning root");
        }

        if self.forest.node(resolved)?.tree_type.is_empty() {
            let generated = generate_tree_type();
            debug!(tree_type = %generated, "Generated tree type");
            self.forest.set_tree_type(resolved, generated)?;
        }
        let tree_type = self.forest.node(resolved)?.tree_type.clone();

        for handle in self.forest.subtree(child) {
            let node = self.forest.node(handle)?;
            if node.tree_type != tree_type {
                if let Some(unique_id) = node.unique_id.as_deref() {
                    self.session.purge(&node.tree_type, unique_id);
                }
            }
        }

        self.forest.unlink(child)?;

        let existing = self.forest.children_of(parent).iter().position(|sibling| {
            self.forest
                .get(*sibling)
                .and_then(|n| n.unique_id.as_deref())
                == Some(child_unique_id.as_str())
        });
        if let Some(index) = existing {
            let replaced = self.forest.children_of(parent)[index];
            self.replace(replaced, child)?;
        }

        self.forest.link(parent, child, existing)?;
        self.forest.set_root_links(child, resolved)?;
        self.forest.set_built(child, false)?;
        self.forest.set_built(resolved, false)?;
        Ok(resolved)
    }

    /// Drop `replaced` in favour of `incoming`, which carries the same unique id.
    ///
    /// Nodes of the incoming subtree inherit the stored identity of the
    /// replaced node with the same unique id when they have none. Replaced
    /// descendants absent from the incoming subtree are deleted.
    fn replace(&mut self, replaced: NodeHandle, incoming: NodeHandle) -> Result<(), TreeError> {
        let incoming_handles: HashMap<String, NodeHandle> = self
            .forest
            .subtree(incoming)
            .into_iter()
            .filter_map(|h| {
                let unique_id = self.forest.get(h)?.unique_id.clone()?;
                Some((unique_id, h))
            })
            .collect();

        self.forest.unlink(replaced)?;
        for removed in self.forest.free_subtree(replaced)? {
            let kept = removed
                .unique_id
                .as_ref()
                .and_then(|id| incoming_handles.get(id).copied());
            let Some(handle) = kept else {
                self.session.record_delete(&removed);
                continue;
            };

            let node = self.forest.node_mut(handle)?;
            if node.storage_id.is_none() && removed.storage_id.is_some() {
                node.storage_id = removed.storage_id;
                if let Some(snapshot) = removed.persisted() {
                    node.set_persisted(snapshot.clone());
                }
                if let Some(unique_id) = node.unique_id.clone() {
                    let tree_type = node.tree_type.clone();
                    self.session.purge(&tree_type, &unique_id);
                }
            }
        }
        Ok(())
    }

    fn purge_pending(&mut self, root: NodeHandle) -> Result<(), TreeError> {
        for handle in self.forest.subtree(root) {
            let node = self.forest.node(handle)?;
            if let Some(unique_id) = node.unique_id.as_deref() {
                self.session.purge(&node.tree_type, unique_id);
            }
        }
        Ok(())
    }
}

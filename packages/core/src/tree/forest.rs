//! Arena of tree nodes addressed by generational handles.
//!
//! Parent, root, and child links are handles into the arena rather than
//! references, so back-references never own anything and a removed node can
//! never be reached through a stale link: freeing a slot bumps its generation
//! and every handle minted before that is rejected.

use crate::models::{NodeRecord, TreeAttributes, TreeNode};
use crate::operations::TreeError;
use std::collections::HashMap;
use std::fmt;

/// Identifier for a node in a [`Forest`] (generational).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the arena
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation the slot had when this handle was minted
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Arena slot: node data plus the links the node itself never carries
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) node: TreeNode,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) root: NodeHandle,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) is_built: bool,
}

/// Arena holding any number of independent trees.
///
/// A freshly inserted node is detached: it has no parent, is its own root,
/// and is not built.
#[derive(Default, Clone)]
pub struct Forest {
    slots: Vec<Option<Slot>>,
    /// last generation per slot (persists across frees)
    generations: Vec<u32>,
    free_list: Vec<usize>,
    len: usize,
}

impl fmt::Debug for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forest")
            .field("slots", &self.slots.len())
            .field("alive", &self.len)
            .field("free_list", &self.free_list.len())
            .finish()
    }
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a detached node and return its handle
    pub fn insert(&mut self, node: TreeNode) -> NodeHandle {
        let (index, generation) = if let Some(index) = self.free_list.pop() {
            let generation = self.generations[index].saturating_add(1);
            self.generations[index] = generation;
            (index, generation)
        } else {
            self.slots.push(None);
            self.generations.push(1);
            (self.slots.len() - 1, 1)
        };

        let handle = NodeHandle::new(index as u32, generation);
        self.slots[index] = Some(Slot {
            generation,
            node,
            parent: None,
            root: handle,
            children: Vec::new(),
            is_built: false,
        });
        self.len += 1;
        handle
    }

    /// A handle is live if its slot is occupied by the same generation
    pub fn is_alive(&self, handle: NodeHandle) -> bool {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .map(|slot| slot.generation == handle.generation)
            .unwrap_or(false)
    }

    pub(crate) fn slot(&self, handle: NodeHandle) -> Result<&Slot, TreeError> {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or_else(|| TreeError::stale_handle(handle))
    }

    pub(crate) fn slot_mut(&mut self, handle: NodeHandle) -> Result<&mut Slot, TreeError> {
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or_else(|| TreeError::stale_handle(handle))
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&TreeNode> {
        self.slot(handle).ok().map(|slot| &slot.node)
    }

    /// Mutable access for domain attributes.
    ///
    /// Tree columns edited here are overwritten by the next rebuild.
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut TreeNode> {
        self.slot_mut(handle).ok().map(|slot| &mut slot.node)
    }

    /// Like [`get`](Self::get) but reports a stale handle as an error
    pub fn node(&self, handle: NodeHandle) -> Result<&TreeNode, TreeError> {
        self.slot(handle).map(|slot| &slot.node)
    }

    pub(crate) fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut TreeNode, TreeError> {
        self.slot_mut(handle).map(|slot| &mut slot.node)
    }

    pub fn parent_of(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.slot(handle).ok().and_then(|slot| slot.parent)
    }

    pub fn root_of(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.slot(handle).ok().map(|slot| slot.root)
    }

    pub fn children_of(&self, handle: NodeHandle) -> &[NodeHandle] {
        self.slot(handle)
            .map(|slot| slot.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the tree rooted at `handle` currently has valid indices
    pub fn is_built(&self, handle: NodeHandle) -> bool {
        self.slot(handle).map(|slot| slot.is_built).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Parentless nodes in slot order
    pub fn roots(&self) -> Vec<NodeHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let slot = slot.as_ref()?;
                slot.parent
                    .is_none()
                    .then(|| NodeHandle::new(index as u32, slot.generation))
            })
            .collect()
    }

    /// Find a live node by unique id
    pub fn find_unique(&self, unique_id: &str) -> Option<NodeHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let slot = slot.as_ref()?;
            (slot.node.unique_id.as_deref() == Some(unique_id))
                .then(|| NodeHandle::new(index as u32, slot.generation))
        })
    }

    /// `handle` followed by all of its descendants in pre-order (children order)
    pub fn subtree(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut order = Vec::new();
        if !self.is_alive(handle) {
            return order;
        }

        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.children_of(current).iter().rev().copied());
        }
        order
    }

    /// All descendants of `handle` in pre-order, excluding `handle` itself
    pub fn descendants(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut order = self.subtree(handle);
        if !order.is_empty() {
            order.remove(0);
        }
        order
    }

    pub fn subtree_size(&self, handle: NodeHandle) -> usize {
        self.subtree(handle).len()
    }

    /// Flat records of a subtree in pre-order, which is ascending `left` once built
    pub fn flatten(&self, root: NodeHandle) -> Vec<NodeRecord> {
        self.subtree(root)
            .into_iter()
            .filter_map(|handle| self.get(handle).map(TreeNode::to_record))
            .collect()
    }

    /// Whether `ancestor` is a strict ancestor of `node` (walks parent links)
    pub fn is_ancestor(&self, ancestor: NodeHandle, node: NodeHandle) -> bool {
        let mut current = self.parent_of(node);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    /// Ancestors of `handle` by interval containment, outermost first.
    ///
    /// Reads the stored indices, so the result is only meaningful on a built tree.
    pub fn ancestors(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let Some((left, right)) = self.bounds(handle) else {
            return Vec::new();
        };
        let Some(root) = self.root_of(handle) else {
            return Vec::new();
        };

        self.subtree(root)
            .into_iter()
            .filter(|candidate| {
                self.bounds(*candidate)
                    .map(|(l, r)| l < left && r > right)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Nodes of the subtree whose interval holds no other node (`right == left + 1`)
    pub fn leaves(&self, root: NodeHandle) -> Vec<NodeHandle> {
        self.subtree(root)
            .into_iter()
            .filter(|candidate| {
                self.bounds(*candidate)
                    .map(|(l, r)| r == l + 1)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Node whose bound sits at `left - 1`: the previous sibling, or the parent
    /// for a first child
    pub fn prev_in_order(&self, handle: NodeHandle) -> Option<NodeHandle> {
        let (left, _) = self.bounds(handle)?;
        let target = left - 1;
        self.find_in_tree(handle, |l, r| l == target || r == target)
    }

    /// Node whose bound sits at `right + 1`: the next sibling, or the parent
    /// for a last child
    pub fn next_in_order(&self, handle: NodeHandle) -> Option<NodeHandle> {
        let (_, right) = self.bounds(handle)?;
        let target = right + 1;
        self.find_in_tree(handle, |l, r| l == target || r == target)
    }

    /// Other nodes sharing this node's depth and tree type across every tree
    /// in the forest
    pub fn siblings_at_depth(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let Some(node) = self.get(handle) else {
            return Vec::new();
        };
        let Some(depth) = node.depth else {
            return Vec::new();
        };
        let tree_type = node.tree_type.as_str();

        self.roots()
            .into_iter()
            .filter(|root| self.get(*root).map(|r| r.tree_type.as_str()) == Some(tree_type))
            .flat_map(|root| self.subtree(root))
            .filter(|candidate| {
                *candidate != handle
                    && self.get(*candidate).and_then(|n| n.depth) == Some(depth)
            })
            .collect()
    }

    /// Detach `handle` from its parent and make it the root of its own tree.
    ///
    /// Both the old tree and the new one are left unbuilt. The new tree drops
    /// its inherited root group so the next rebuild assigns a fresh one.
    pub fn make_root(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        self.unlink(handle)?;
        let node = self.node_mut(handle)?;
        node.parent_id = None;
        node.root_group = None;
        self.set_root_links(handle, handle)?;
        self.slot_mut(handle)?.is_built = false;
        Ok(())
    }

    /// Change the tree type of every node in the tree and mark it unbuilt
    pub fn set_tree_type(
        &mut self,
        root: NodeHandle,
        tree_type: impl Into<String>,
    ) -> Result<(), TreeError> {
        let tree_type = tree_type.into();
        for handle in self.subtree(root) {
            self.node_mut(handle)?.tree_type = tree_type.clone();
        }
        self.slot_mut(root)?.is_built = false;
        Ok(())
    }

    /// Record the columns a flush wrote as each node's persisted snapshot.
    ///
    /// Nodes are matched by unique id across the whole forest; freshly
    /// inserted nodes also pick up their storage id. Returns the number of
    /// nodes touched.
    pub fn mark_persisted(
        &mut self,
        written: &HashMap<String, TreeAttributes>,
        storage_ids: &HashMap<String, i64>,
    ) -> usize {
        let mut touched = 0;
        for slot in self.slots.iter_mut().flatten() {
            let Some(unique_id) = slot.node.unique_id.clone() else {
                continue;
            };
            let Some(snapshot) = written.get(&unique_id) else {
                continue;
            };
            if slot.node.storage_id.is_none() {
                slot.node.storage_id = storage_ids.get(&unique_id).copied();
            }
            slot.node.set_persisted(snapshot.clone());
            touched += 1;
        }
        touched
    }

    pub(crate) fn set_built(&mut self, handle: NodeHandle, built: bool) -> Result<(), TreeError> {
        self.slot_mut(handle)?.is_built = built;
        Ok(())
    }

    /// Clear the build flag on the root owning `handle`
    pub(crate) fn invalidate(&mut self, handle: NodeHandle) -> Result<(), TreeError> {
        let root = self.slot(handle)?.root;
        self.set_built(root, false)
    }

    /// Remove `child` from its parent's children; no-op for a root.
    ///
    /// The old tree is left unbuilt. Returns the former parent.
    pub(crate) fn unlink(&mut self, child: NodeHandle) -> Result<Option<NodeHandle>, TreeError> {
        let Some(parent) = self.slot(child)?.parent else {
            return Ok(None);
        };
        self.invalidate(parent)?;
        self.slot_mut(parent)?.children.retain(|c| *c != child);
        self.slot_mut(child)?.parent = None;
        Ok(Some(parent))
    }

    /// Link a detached `child` under `parent` at `position` (append when `None`)
    pub(crate) fn link(
        &mut self,
        parent: NodeHandle,
        child: NodeHandle,
        position: Option<usize>,
    ) -> Result<(), TreeError> {
        let children = &mut self.slot_mut(parent)?.children;
        match position {
            Some(index) if index <= children.len() => children.insert(index, child),
            _ => children.push(child),
        }
        self.slot_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Point the root link of every node in the subtree at `root`
    pub(crate) fn set_root_links(
        &mut self,
        subtree: NodeHandle,
        root: NodeHandle,
    ) -> Result<(), TreeError> {
        for handle in self.subtree(subtree) {
            self.slot_mut(handle)?.root = root;
        }
        Ok(())
    }

    /// Free a single slot, returning its node. Links are not touched.
    pub(crate) fn free(&mut self, handle: NodeHandle) -> Result<TreeNode, TreeError> {
        self.slot(handle)?;
        let slot = self.slots[handle.index()]
            .take()
            .ok_or_else(|| TreeError::stale_handle(handle))?;
        self.free_list.push(handle.index());
        self.len -= 1;
        Ok(slot.node)
    }

    /// Free a whole subtree (pre-order), returning the removed nodes
    pub(crate) fn free_subtree(&mut self, handle: NodeHandle) -> Result<Vec<TreeNode>, TreeError> {
        self.subtree(handle)
            .into_iter()
            .map(|h| self.free(h))
            .collect()
    }

    fn bounds(&self, handle: NodeHandle) -> Option<(i64, i64)> {
        let node = self.get(handle)?;
        Some((node.left?, node.right?))
    }

    fn find_in_tree(
        &self,
        handle: NodeHandle,
        predicate: impl Fn(i64, i64) -> bool,
    ) -> Option<NodeHandle> {
        let root = self.root_of(handle)?;
        self.subtree(root).into_iter().find(|candidate| {
            *candidate != handle
                && self
                    .bounds(*candidate)
                    .map(|(l, r)| predicate(l, r))
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> TreeNode {
        TreeNode::new("catalog").with_unique_id(id)
    }

    #[test]
    fn test_insert_creates_detached_root() {
        let mut forest = Forest::new();
        let h = forest.insert(node("a"));
        assert!(forest.is_alive(h));
        assert_eq!(forest.root_of(h), Some(h));
        assert_eq!(forest.parent_of(h), None);
        assert!(!forest.is_built(h));
        assert_eq!(forest.roots(), vec![h]);
    }

    #[test]
    fn test_freed_slot_reuse_bumps_generation() {
        let mut forest = Forest::new();
        let first = forest.insert(node("a"));
        forest.free(first).unwrap();
        assert!(!forest.is_alive(first));

        let second = forest.insert(node("b"));
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(forest.get(first).is_none());
        assert!(matches!(
            forest.node(first),
            Err(TreeError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_subtree_is_pre_order() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = forest.insert(node("a"));
        let b = forest.insert(node("b"));
        let a1 = forest.insert(node("a1"));
        forest.link(root, a, None).unwrap();
        forest.link(root, b, None).unwrap();
        forest.link(a, a1, None).unwrap();

        assert_eq!(forest.subtree(root), vec![root, a, a1, b]);
        assert_eq!(forest.descendants(root), vec![a, a1, b]);
        assert_eq!(forest.subtree_size(a), 2);
        assert!(forest.is_ancestor(root, a1));
        assert!(!forest.is_ancestor(b, a1));
        assert!(!forest.is_ancestor(a1, a1));
    }

    #[test]
    fn test_link_at_position() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = forest.insert(node("a"));
        let b = forest.insert(node("b"));
        forest.link(root, a, None).unwrap();
        forest.link(root, b, Some(0)).unwrap();
        assert_eq!(forest.children_of(root), &[b, a]);
    }

    #[test]
    fn test_unlink_invalidates_owning_root() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = forest.insert(node("a"));
        forest.link(root, a, None).unwrap();
        forest.set_root_links(root, root).unwrap();
        forest.set_built(root, true).unwrap();

        assert_eq!(forest.unlink(a).unwrap(), Some(root));
        assert!(!forest.is_built(root));
        assert!(forest.children_of(root).is_empty());
        assert_eq!(forest.unlink(root).unwrap(), None);
    }

    #[test]
    fn test_free_subtree_releases_all_slots() {
        let mut forest = Forest::new();
        let root = forest.insert(node("root"));
        let a = forest.insert(node("a"));
        forest.link(root, a, None).unwrap();

        let removed = forest.free_subtree(root).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(forest.is_empty());
        assert!(forest.roots().is_empty());
    }

    #[test]
    fn test_mark_persisted_assigns_storage_ids() {
        let mut forest = Forest::new();
        let h = forest.insert(node("a"));
        let written: HashMap<String, TreeAttributes> =
            [("a".to_string(), forest.get(h).unwrap().tree_attributes())].into();
        let ids: HashMap<String, i64> = [("a".to_string(), 11)].into();

        assert_eq!(forest.mark_persisted(&written, &ids), 1);
        let stored = forest.get(h).unwrap();
        assert_eq!(stored.storage_id, Some(11));
        assert!(!stored.is_dirty());
    }

    #[test]
    fn test_find_unique() {
        let mut forest = Forest::new();
        forest.insert(node("a"));
        let b = forest.insert(node("b"));
        assert_eq!(forest.find_unique("b"), Some(b));
        assert_eq!(forest.find_unique("missing"), None);
    }
}

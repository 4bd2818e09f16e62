//! Turn stored records into linked trees.
//!
//! Records are ordered by `(tree_type, left, right)` and linked in a single
//! forward pass. A child seen before its parent waits in a pending map keyed
//! by the parent's unique id until the parent shows up. Parents are only
//! looked up within the child's own tree type.
//!
//! A tree whose records all carry consistent indices is marked built, so an
//! unchanged reload rebuilds nothing and persists nothing.

use crate::models::{generate_root_group, NestedNode, NodeRecord, TreeNode};
use crate::operations::TreeError;
use crate::services::tree_cache::{CachedTree, RepresentationKind};
use crate::tree::{export_nested, import_nested, Forest, NodeHandle};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// One tree of a loaded forest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRoot {
    pub tree_type: String,
    pub root_group: String,
    pub handle: NodeHandle,
}

/// Loaded trees plus their roots in load order
#[derive(Debug, Default)]
pub struct LoadedForest {
    pub forest: Forest,
    pub roots: Vec<LoadedRoot>,
}

impl LoadedForest {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn root(&self, tree_type: &str, root_group: &str) -> Option<NodeHandle> {
        self.roots
            .iter()
            .find(|root| root.tree_type == tree_type && root.root_group == root_group)
            .map(|root| root.handle)
    }

    /// Roots of one tree type
    pub fn roots_of(&self, tree_type: &str) -> Vec<NodeHandle> {
        self.roots
            .iter()
            .filter(|root| root.tree_type == tree_type)
            .map(|root| root.handle)
            .collect()
    }

    /// Distinct tree types, in load order
    pub fn tree_types(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.roots
            .iter()
            .filter(|root| seen.insert(root.tree_type.as_str()))
            .map(|root| root.tree_type.clone())
            .collect()
    }

    pub fn to_nested(&self) -> Result<Vec<NestedNode>, TreeError> {
        self.roots
            .iter()
            .map(|root| export_nested(&self.forest, root.handle))
            .collect()
    }
}

pub struct TreeLoader;

impl TreeLoader {
    /// Link flat records into trees.
    ///
    /// Fails with `InvalidTree` when a record's parent never appears, when
    /// a unique id repeats within a tree type, when parent links form a cycle,
    /// or when two roots claim the same `(tree_type, root_number)`.
    pub fn load(mut records: Vec<NodeRecord>) -> Result<LoadedForest, TreeError> {
        records.sort_by(|a, b| {
            (a.tree_type.as_str(), a.left.unwrap_or(i64::MAX), a.right.unwrap_or(i64::MAX)).cmp(&(
                b.tree_type.as_str(),
                b.left.unwrap_or(i64::MAX),
                b.right.unwrap_or(i64::MAX),
            ))
        });

        let mut forest = Forest::new();
        let mut seen: HashMap<(String, String), NodeHandle> = HashMap::new();
        let mut waiting: HashMap<(String, String), Vec<NodeHandle>> = HashMap::new();
        let mut root_order: Vec<NodeHandle> = Vec::new();

        for record in records {
            let mut node = TreeNode::from_record(record);
            let unique_id = node.ensure_unique_id().to_string();
            let tree_type = node.tree_type.clone();
            let parent_id = node.parent_id.clone().filter(|id| !id.is_empty());

            let key = (tree_type.clone(), unique_id.clone());
            if seen.contains_key(&key) {
                return Err(TreeError::invalid_tree(
                    tree_type,
                    unique_id,
                    "unique id appears more than once",
                ));
            }
            let handle = forest.insert(node);
            seen.insert(key.clone(), handle);

            if let Some(children) = waiting.remove(&key) {
                for child in children {
                    link_loaded(&mut forest, handle, child)?;
                }
            }

            match parent_id {
                Some(parent_id) => {
                    let parent_key = (tree_type, parent_id);
                    match seen.get(&parent_key) {
                        Some(parent) => link_loaded(&mut forest, *parent, handle)?,
                        None => waiting.entry(parent_key).or_default().push(handle),
                    }
                }
                None => root_order.push(handle),
            }
        }

        if let Some(((tree_type, parent_id), children)) = waiting.into_iter().next() {
            let orphan = children
                .first()
                .and_then(|child| forest.get(*child))
                .map(TreeNode::display_id)
                .unwrap_or_default();
            warn!(tree_type = %tree_type, orphan = %orphan, parent = %parent_id, "Orphaned record");
            return Err(TreeError::invalid_tree(
                tree_type,
                orphan,
                format!("parent '{}' was not found", parent_id),
            ));
        }

        let mut loaded = LoadedForest {
            forest,
            roots: Vec::new(),
        };
        for root in root_order {
            register_root(&mut loaded, root)?;
        }

        debug!(
            nodes = loaded.forest.len(),
            roots = loaded.roots.len(),
            "Loaded trees from records"
        );
        Ok(loaded)
    }

    /// Load records into the requested representation
    pub fn load_as(
        records: Vec<NodeRecord>,
        kind: RepresentationKind,
    ) -> Result<CachedTree, TreeError> {
        let loaded = Self::load(records)?;
        Ok(match kind {
            RepresentationKind::Graph => CachedTree::Graph(Arc::new(loaded)),
            RepresentationKind::Nested => CachedTree::Nested(Arc::new(loaded.to_nested()?)),
        })
    }

    /// Load already-nested input; links come from the nesting, not `parent_id`
    pub fn load_nested(trees: &[NestedNode]) -> Result<LoadedForest, TreeError> {
        let mut loaded = LoadedForest::default();
        for tree in trees {
            let root = import_nested(&mut loaded.forest, tree)?;
            for handle in loaded.forest.subtree(root) {
                loaded.forest.node_mut(handle)?.ensure_unique_id();
            }
            register_root(&mut loaded, root)?;
        }
        Ok(loaded)
    }
}

fn link_loaded(forest: &mut Forest, parent: NodeHandle, child: NodeHandle) -> Result<(), TreeError> {
    if parent == child || forest.is_ancestor(child, parent) {
        let node = forest.node(child)?;
        return Err(TreeError::invalid_tree(
            node.tree_type.clone(),
            node.display_id(),
            "parent links form a cycle",
        ));
    }
    forest.link(parent, child, None)
}

/// Record a root, generating its root group when missing and marking the
/// tree built when its stored indices are already consistent
fn register_root(loaded: &mut LoadedForest, root: NodeHandle) -> Result<(), TreeError> {
    loaded.forest.set_root_links(root, root)?;

    let (tree_type, root_group, generated) = {
        let node = loaded.forest.node_mut(root)?;
        let generated = node.root_group.is_none();
        let root_group = node
            .root_group
            .get_or_insert_with(generate_root_group)
            .clone();
        (node.tree_type.clone(), root_group, generated)
    };

    if loaded.root(&tree_type, &root_group).is_some() {
        let unique_id = loaded.forest.node(root)?.display_id();
        warn!(tree_type = %tree_type, root_group = %root_group, root = %unique_id, "Duplicate root");
        return Err(TreeError::invalid_tree(
            tree_type,
            unique_id,
            format!("root group '{}' already has a root", root_group),
        ));
    }

    let built = !generated && has_consistent_indices(&loaded.forest, root, &root_group);
    loaded.forest.set_built(root, built)?;
    if generated {
        debug!(tree_type = %tree_type, root_group = %root_group, "Generated root group");
    }

    loaded.roots.push(LoadedRoot {
        tree_type,
        root_group,
        handle: root,
    });
    Ok(())
}

/// Stored indices match what a rebuild would assign
fn has_consistent_indices(forest: &Forest, root: NodeHandle, root_group: &str) -> bool {
    let Some(tree_type) = forest.get(root).map(|node| node.tree_type.clone()) else {
        return false;
    };

    // replay the numbering of a rebuild over the linked structure
    let mut expected: HashMap<NodeHandle, (i64, i64, i64)> = HashMap::new();
    let mut counter: i64 = 0;
    let mut open: Vec<NodeHandle> = Vec::new();
    for handle in forest.subtree(root) {
        let parent = forest.parent_of(handle);
        while let Some(&top) = open.last() {
            if Some(top) == parent {
                break;
            }
            counter += 1;
            if let Some(entry) = expected.get_mut(&top) {
                entry.1 = counter;
            }
            open.pop();
        }
        counter += 1;
        expected.insert(handle, (counter, 0, open.len() as i64 + 1));
        open.push(handle);
    }
    while let Some(top) = open.pop() {
        counter += 1;
        if let Some(entry) = expected.get_mut(&top) {
            entry.1 = counter;
        }
    }

    expected.iter().all(|(handle, (left, right, depth))| {
        let Some(node) = forest.get(*handle) else {
            return false;
        };
        let parent_id = forest
            .parent_of(*handle)
            .and_then(|parent| forest.get(parent))
            .and_then(|parent| parent.unique_id.clone());
        node.left == Some(*left)
            && node.right == Some(*right)
            && node.depth == Some(*depth)
            && node.tree_type == tree_type
            && node.root_group.as_deref() == Some(root_group)
            && node.parent_id == parent_id
    })
}

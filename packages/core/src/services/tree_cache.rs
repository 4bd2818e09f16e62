//! Cache of built trees keyed by tree type and representation
//!
//! Entries are shared via `Arc`, so a cached tree stays valid for readers
//! after it is evicted. There is no expiry policy: callers invalidate
//! explicitly after a structural change. The cache does no locking of its
//! own; wrap it in a lock when it is shared between tasks.

use crate::models::NestedNode;
use crate::operations::TreeError;
use crate::services::tree_loader::LoadedForest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RepresentationKind {
    /// Linked arena representation
    Graph,
    /// Plain nested records
    Nested,
}

impl fmt::Display for RepresentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => write!(f, "graph"),
            Self::Nested => write!(f, "nested"),
        }
    }
}

/// `tree_type == None` addresses every tree type at once
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tree_type: Option<String>,
    pub kind: RepresentationKind,
}

impl CacheKey {
    pub fn new(tree_type: Option<&str>, kind: RepresentationKind) -> Self {
        Self {
            tree_type: tree_type.map(str::to_string),
            kind,
        }
    }

    pub fn all(kind: RepresentationKind) -> Self {
        Self::new(None, kind)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tree_type {
            Some(tree_type) => write!(f, "{}/{}", tree_type, self.kind),
            None => write!(f, "all/{}", self.kind),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CachedTree {
    Graph(Arc<LoadedForest>),
    Nested(Arc<Vec<NestedNode>>),
}

impl CachedTree {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Self::Graph(_) => RepresentationKind::Graph,
            Self::Nested(_) => RepresentationKind::Nested,
        }
    }

    /// Number of trees (roots) held
    pub fn root_count(&self) -> usize {
        match self {
            Self::Graph(loaded) => loaded.roots.len(),
            Self::Nested(trees) => trees.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root_count() == 0
    }

    pub fn as_graph(&self) -> Option<&LoadedForest> {
        match self {
            Self::Graph(loaded) => Some(loaded),
            Self::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<&[NestedNode]> {
        match self {
            Self::Nested(trees) => Some(trees),
            Self::Graph(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TreeCache {
    entries: HashMap<CacheKey, CachedTree>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedTree> {
        self.entries.get(key).cloned()
    }

    /// Store `tree` under `key`, replacing any previous entry.
    ///
    /// Empty trees are rejected so a miss and an empty result stay distinct.
    pub fn put(&mut self, key: CacheKey, tree: CachedTree) -> Result<(), TreeError> {
        if tree.is_empty() {
            return Err(TreeError::empty_tree(key.to_string()));
        }
        tracing::debug!(key = %key, roots = tree.root_count(), "Cached tree");
        self.entries.insert(key, tree);
        Ok(())
    }

    pub fn evict(&mut self, key: &CacheKey) -> Option<CachedTree> {
        self.entries.remove(key)
    }

    /// Evict every entry that may contain trees of `tree_type`, including
    /// the all-tree-types entries
    pub fn invalidate_tree_type(&mut self, tree_type: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| match &key.tree_type {
            Some(cached) => cached != tree_type,
            None => false,
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn all(&self) -> &HashMap<CacheKey, CachedTree> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

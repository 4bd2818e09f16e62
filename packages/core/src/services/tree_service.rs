//! Tree Service - build and persist nested-set trees
//!
//! `TreeService` ties the synchronous tree core to a [`StorageGateway`]:
//! loading trees (cache first), and turning a mutated forest into one
//! transactional flush per tree type.
//!
//! # Persist Flow
//!
//! 1. Rebuild the owning root (no-op when already built) and queue its changes
//! 2. Require a tree type
//! 3. Flush the queued deletes, updates and inserts in one transaction
//! 4. Resolve storage ids for freshly inserted nodes
//! 5. Snapshot the written columns so the next rebuild diffs against them
//! 6. Evict cached trees of that tree type

use crate::config::TreeIndexConfig;
use crate::db::{FlushReport, LibsqlGateway, PersistenceSession, StorageGateway};
use crate::operations::{TreeError, TreeMutator};
use crate::services::tree_cache::{CacheKey, CachedTree, RepresentationKind, TreeCache};
use crate::services::tree_loader::{LoadedForest, TreeLoader};
use crate::tree::{Forest, NodeHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// # Examples
///
/// ```no_run
/// use nestindex_core::config::TreeIndexConfig;
/// use nestindex_core::models::TreeNode;
/// use nestindex_core::operations::TreeMutator;
/// use nestindex_core::services::TreeService;
/// use nestindex_core::tree::Forest;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut service = TreeService::from_config(TreeIndexConfig::default()).await?;
///     let mut session = service.new_session();
///     let mut forest = Forest::new();
///
///     let root = forest.insert(TreeNode::new("catalog"));
///     let child = forest.insert(TreeNode::new("catalog"));
///     TreeMutator::new(&mut forest, &mut session).attach(root, child, None)?;
///
///     let report = service.persist(&mut forest, &mut session, root).await?;
///     println!("inserted {}", report.inserted);
///     Ok(())
/// }
/// ```
pub struct TreeService {
    gateway: Arc<dyn StorageGateway>,
    cache: TreeCache,
    config: TreeIndexConfig,
}

impl TreeService {
    pub fn new(gateway: Arc<dyn StorageGateway>, config: TreeIndexConfig) -> Result<Self, TreeError> {
        config.validate()?;
        Ok(Self {
            gateway,
            cache: TreeCache::new(),
            config,
        })
    }

    /// Open a [`LibsqlGateway`] described by `config` and wrap it
    pub async fn from_config(config: TreeIndexConfig) -> Result<Self, TreeError> {
        config.validate()?;
        let gateway = LibsqlGateway::from_config(&config).await?;
        Self::new(Arc::new(gateway), config)
    }

    pub fn gateway(&self) -> &Arc<dyn StorageGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &TreeIndexConfig {
        &self.config
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    /// A session using the configured batch size
    pub fn new_session(&self) -> PersistenceSession {
        PersistenceSession::new(self.config.max_batch_size)
    }

    /// Trees of `tree_type` (every type when `None`) in the requested shape.
    ///
    /// Served from the cache when present. Non-empty results are cached;
    /// an empty result is returned as-is.
    pub async fn build_trees(
        &mut self,
        tree_type: Option<&str>,
        kind: RepresentationKind,
    ) -> Result<CachedTree, TreeError> {
        let key = CacheKey::new(tree_type, kind);
        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, "Tree cache hit");
            return Ok(cached);
        }

        let records = self.gateway.load_ordered(tree_type).await?;
        let tree = TreeLoader::load_as(records, kind)?;
        if !tree.is_empty() {
            self.cache.put(key, tree.clone())?;
        }
        Ok(tree)
    }

    /// Load an owned forest for mutation; never cached
    pub async fn load_forest(&self, tree_type: Option<&str>) -> Result<LoadedForest, TreeError> {
        let records = self.gateway.load_ordered(tree_type).await?;
        TreeLoader::load(records)
    }

    /// Rebuild the tree owning `node` and flush everything queued for its
    /// tree type.
    ///
    /// A handle inside a tree resolves to that tree's root, so a subtree is
    /// never numbered on its own before being written.
    pub async fn persist(
        &mut self,
        forest: &mut Forest,
        session: &mut PersistenceSession,
        node: NodeHandle,
    ) -> Result<FlushReport, TreeError> {
        let root = forest
            .root_of(node)
            .ok_or_else(|| TreeError::stale_handle(node))?;
        TreeMutator::new(forest, session).rebuild(root)?;

        let tree_type = forest.node(root)?.tree_type.clone();
        if tree_type.is_empty() {
            let root_node = forest.node(root)?;
            return Err(TreeError::invalid_tree(
                "",
                root_node.display_id(),
                "tree type is empty",
            ));
        }

        self.flush_tree_type(forest, session, &tree_type).await
    }

    /// Flush every tree type with queued operations, in sorted order.
    ///
    /// Unbuilt roots are not rebuilt here; call [`persist`](Self::persist)
    /// for trees that still need indexing.
    pub async fn persist_all(
        &mut self,
        forest: &mut Forest,
        session: &mut PersistenceSession,
    ) -> Result<Vec<FlushReport>, TreeError> {
        let mut reports = Vec::new();
        for tree_type in session.tree_types() {
            reports.push(self.flush_tree_type(forest, session, &tree_type).await?);
        }
        Ok(reports)
    }

    /// Drop cached trees for one tree type, or everything when `None`
    pub fn invalidate(&mut self, tree_type: Option<&str>) {
        match tree_type {
            Some(tree_type) => {
                let evicted = self.cache.invalidate_tree_type(tree_type);
                debug!(tree_type = %tree_type, evicted, "Invalidated cached trees");
            }
            None => self.cache.clear(),
        }
    }

    async fn flush_tree_type(
        &mut self,
        forest: &mut Forest,
        session: &mut PersistenceSession,
        tree_type: &str,
    ) -> Result<FlushReport, TreeError> {
        let report = session
            .flush(
                self.gateway.as_ref(),
                tree_type,
                self.config.relax_integrity_checks,
            )
            .await?;

        let storage_ids = if report.inserted_unique_ids.is_empty() {
            Default::default()
        } else {
            self.gateway
                .lookup_storage_ids(&report.inserted_unique_ids)
                .await?
        };
        let touched = forest.mark_persisted(&report.written, &storage_ids);

        self.invalidate(Some(tree_type));

        info!(
            tree_type = %tree_type,
            statements = report.statements,
            touched,
            "Persisted tree"
        );
        Ok(report)
    }
}

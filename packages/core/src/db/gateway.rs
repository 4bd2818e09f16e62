//! StorageGateway Trait - Backing Store Abstraction
//!
//! The tree core never talks to a database directly. Everything it needs from
//! the backing store goes through this trait: executing bounded batches,
//! transaction control, relaxing integrity checks for bulk writes, and reading
//! records back in nested-set order.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: Gateways may be embedded or networked; the synchronous
//!    tree algorithms only await the gateway during a flush.
//! 2. **Single Unit of Work**: A flush calls `begin_transaction`, then
//!    `execute` for every batch, then `commit` (or `rollback`), sequentially on
//!    the same gateway. Implementations must route those calls to the same
//!    underlying connection.
//! 3. **Typed Errors**: Every method returns [`StorageError`] so the flush can
//!    roll back and re-raise the originating failure unchanged.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nestindex_core::db::{LibsqlGateway, StorageGateway};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway: Arc<dyn StorageGateway> =
//!         Arc::new(LibsqlGateway::new_in_memory("tree_nodes").await?);
//!
//!     let records = gateway.load_ordered(Some("catalog")).await?;
//!     println!("{} records", records.len());
//!     Ok(())
//! }
//! ```

use crate::db::{Batch, StorageError};
use crate::models::NodeRecord;
use async_trait::async_trait;
use std::collections::HashMap;

/// Abstraction over the tabular store holding nested-set rows
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a gateway can be shared behind an
/// `Arc` by services running on a multi-threaded runtime.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Execute one batch, returning the number of affected rows
    async fn execute(&self, batch: &Batch) -> Result<u64, StorageError>;

    async fn begin_transaction(&self) -> Result<(), StorageError>;

    async fn commit(&self) -> Result<(), StorageError>;

    async fn rollback(&self) -> Result<(), StorageError>;

    /// Enable or disable key/constraint checking.
    ///
    /// Callers disabling checks must re-enable them on every exit path.
    async fn toggle_integrity_checks(&self, enabled: bool) -> Result<(), StorageError>;

    /// Load records ordered by `(tree_type, left, right)`, optionally for one tree type
    async fn load_ordered(&self, tree_type: Option<&str>) -> Result<Vec<NodeRecord>, StorageError>;

    /// Resolve storage ids for the given unique ids (missing ids are omitted)
    async fn lookup_storage_ids(
        &self,
        unique_ids: &[String],
    ) -> Result<HashMap<String, i64>, StorageError>;
}

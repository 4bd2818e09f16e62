//! Storage Layer
//!
//! This module handles everything between the tree core and the backing store:
//!
//! - `StorageGateway` - The async interface the core persists through
//! - `Batch` - Bounded delete/update/insert units handed to a gateway
//! - `PersistenceSession` - Per-tree-type accumulator and transactional flush
//! - `LibsqlGateway` - Embedded libsql implementation of the gateway
//!
//! The core algorithms stay synchronous; only a flush awaits the gateway.

mod batch;
mod error;
mod gateway;
mod libsql_gateway;
mod session;

pub use batch::{Batch, DeleteBatch, InsertBatch, UpdateBatch};
pub use error::StorageError;
pub use gateway::StorageGateway;
pub use libsql_gateway::LibsqlGateway;
pub use session::{
    flush_pending, FlushReport, Paged, PendingOperations, PersistenceSession, UpdateEntry,
    DEFAULT_MAX_BATCH_SIZE,
};

//! NestIndex Core - nested-set tree index
//!
//! Keeps `(left, right, depth, parent_id, tree_type, root_number)` columns of
//! hierarchical records consistent under mutation, and turns each rebuild into
//! a minimal set of batched storage operations.
//!
//! # Architecture
//!
//! - **Arena trees**: nodes live in a [`tree::Forest`] addressed by generational
//!   handles; parent/root back-references are handle lookups
//! - **Iterative rebuild**: indices are assigned with an explicit stack, so
//!   tree depth never touches the call stack
//! - **Explicit sessions**: pending inserts/updates/deletes live in a
//!   [`db::PersistenceSession`] owned by the caller
//! - **libsql**: the bundled gateway stores rows in an embedded database
//!
//! # Modules
//!
//! - [`models`] - Tree nodes and flat/nested record shapes
//! - [`tree`] - Arena, index builder, nested adapters
//! - [`operations`] - Attach/move/remove and search
//! - [`db`] - Batching, flush, storage gateway
//! - [`services`] - Loader, cache, lifecycle hooks, tree service
//! - [`config`] - Configuration

pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;
pub mod tree;

// Re-export commonly used types
pub use config::TreeIndexConfig;
pub use db::{FlushReport, LibsqlGateway, PersistenceSession, StorageError, StorageGateway};
pub use models::{NestedNode, NodeRecord, TreeNode};
pub use operations::{TreeError, TreeMutator};
pub use services::{TreeLifecycle, TreeLoader, TreeService};
pub use tree::{Forest, NodeHandle};

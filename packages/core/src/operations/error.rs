//! Error types for tree operations
//!
//! This module defines the errors raised while rebuilding, mutating, caching,
//! and persisting nested-set trees. Every variant names the tree type or the
//! offending node so the failure can be located without re-running.

use crate::db::StorageError;
use crate::tree::NodeHandle;
use thiserror::Error;

/// Errors that can occur during tree operations
///
/// Structural no-ops (removing a node that is not present) are not errors;
/// those operations report a boolean instead.
///
/// # Examples
///
/// ```rust
/// use nestindex_core::operations::TreeError;
///
/// let err = TreeError::invalid_tree("catalog", "node-7", "node visited twice");
/// assert_eq!(
///     err.to_string(),
///     "Invalid tree 'catalog' at node 'node-7': node visited twice"
/// );
/// ```
#[derive(Error, Debug)]
pub enum TreeError {
    /// Cyclic structure, orphaned record, duplicate root, or missing tree type
    ///
    /// Fatal to the current rebuild or load; not retried.
    #[error("Invalid tree '{tree_type}' at node '{unique_id}': {reason}")]
    InvalidTree {
        tree_type: String,
        unique_id: String,
        reason: String,
    },

    /// Move target is the node itself or one of its descendants
    ///
    /// Rejected before any mutation; the tree is left unchanged.
    #[error("Cannot move node '{unique_id}' under '{target_id}': target is the node or its descendant")]
    CyclicMove { unique_id: String, target_id: String },

    /// Attempt to cache an empty tree
    #[error("Refusing to cache empty tree for key '{key}'")]
    EmptyTree { key: String },

    /// Handle refers to a slot that has been freed or reused
    #[error("Stale node handle {handle}")]
    StaleHandle { handle: NodeHandle },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage gateway failure (already rolled back)
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TreeError {
    /// Create an InvalidTree error
    pub fn invalid_tree(
        tree_type: impl Into<String>,
        unique_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTree {
            tree_type: tree_type.into(),
            unique_id: unique_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a CyclicMove error
    pub fn cyclic_move(unique_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self::CyclicMove {
            unique_id: unique_id.into(),
            target_id: target_id.into(),
        }
    }

    /// Create an EmptyTree error
    pub fn empty_tree(key: impl Into<String>) -> Self {
        Self::EmptyTree { key: key.into() }
    }

    /// Create a StaleHandle error
    pub fn stale_handle(handle: NodeHandle) -> Self {
        Self::StaleHandle { handle }
    }
}

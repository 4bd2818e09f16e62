//! Persistence batches handed to a [`StorageGateway`](crate::db::StorageGateway).
//!
//! Each batch targets one tree type and is bounded by the session's
//! `max_batch_size`, so the statement a gateway generates from it stays small.

use crate::models::NodeRecord;
use serde_json::Value;

/// Delete the listed rows
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteBatch {
    pub tree_type: String,
    pub storage_ids: Vec<i64>,
}

/// Set one tracked column on many rows (`SET column = CASE id WHEN .. THEN .. END`)
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    pub tree_type: String,
    pub column: &'static str,
    /// `(storage_id, new value)` pairs
    pub assignments: Vec<(i64, Value)>,
}

/// Bulk insert of never-persisted records
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub tree_type: String,
    pub records: Vec<NodeRecord>,
}

/// One statement's worth of work
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Delete(DeleteBatch),
    Update(UpdateBatch),
    Insert(InsertBatch),
}

impl Batch {
    /// Rows addressed by this batch
    pub fn len(&self) -> usize {
        match self {
            Batch::Delete(batch) => batch.storage_ids.len(),
            Batch::Update(batch) => batch.assignments.len(),
            Batch::Insert(batch) => batch.records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tree_type(&self) -> &str {
        match self {
            Batch::Delete(batch) => &batch.tree_type,
            Batch::Update(batch) => &batch.tree_type,
            Batch::Insert(batch) => &batch.tree_type,
        }
    }

    /// Short label used in logs and error context
    pub fn kind(&self) -> &'static str {
        match self {
            Batch::Delete(_) => "delete",
            Batch::Update(_) => "update",
            Batch::Insert(_) => "insert",
        }
    }
}

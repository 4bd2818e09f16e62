//! Persistence Session
//!
//! Accumulates insert, update, and delete operations produced by rebuilds and
//! removals, grouped per tree type, and flushes them to a
//! [`StorageGateway`] inside a single transaction.
//!
//! # Batching Rules
//!
//! - Inserts are keyed by unique id, updates by unique id (carrying the
//!   storage id), deletes are a flat list of storage ids.
//! - Each collection is split into pages of at most `max_batch_size` entries;
//!   a new page starts once the current one is full.
//! - Recording the same unique id twice replaces the earlier entry in place.
//! - Deleting a node purges any insert or update still queued for it.
//!
//! # Emission Order
//!
//! Deletes first, then updates (one statement per tracked column per page),
//! then inserts (one bulk statement per page).

use crate::db::{Batch, DeleteBatch, InsertBatch, StorageError, StorageGateway, UpdateBatch};
use crate::models::{NodeRecord, TreeAttributes, TreeNode, TRACKED_COLUMNS};
use crate::operations::TreeError;
use crate::tree::{ChangeSet, Forest};
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

/// Default page cap for every batch kind
pub const DEFAULT_MAX_BATCH_SIZE: usize = 150;

/// Queued update for one stored row: only the tracked columns that changed
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    pub storage_id: i64,
    pub columns: BTreeMap<&'static str, Value>,
}

/// Keyed entries split into bounded pages.
///
/// Replacing a key keeps its original position.
#[derive(Debug, Clone)]
pub struct Paged<T> {
    max_page_size: usize,
    pages: Vec<Vec<(String, T)>>,
    locator: HashMap<String, (usize, usize)>,
}

impl<T> Paged<T> {
    pub fn new(max_page_size: usize) -> Self {
        Self {
            max_page_size: max_page_size.max(1),
            pages: Vec::new(),
            locator: HashMap::new(),
        }
    }

    /// Insert or replace the entry for `key`
    pub fn upsert(&mut self, key: String, value: T) {
        if let Some(&(page, slot)) = self.locator.get(&key) {
            self.pages[page][slot].1 = value;
            return;
        }

        let needs_page = self
            .pages
            .last()
            .map(|page| page.len() >= self.max_page_size)
            .unwrap_or(true);
        if needs_page {
            self.pages.push(Vec::new());
        }

        let page = self.pages.len() - 1;
        let slot = self.pages[page].len();
        self.pages[page].push((key.clone(), value));
        self.locator.insert(key, (page, slot));
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let (page, slot) = self.locator.remove(key)?;
        let (_, value) = self.pages[page].remove(slot);
        for (offset, (moved, _)) in self.pages[page].iter().enumerate().skip(slot) {
            self.locator.insert(moved.clone(), (page, offset));
        }
        Some(value)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        let &(page, slot) = self.locator.get(key)?;
        self.pages.get(page)?.get(slot).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locator.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locator.is_empty()
    }

    /// Non-empty pages in order
    pub fn pages(&self) -> impl Iterator<Item = &[(String, T)]> {
        self.pages
            .iter()
            .filter(|page| !page.is_empty())
            .map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pages
            .iter()
            .flat_map(|page| page.iter().map(|(key, _)| key.as_str()))
    }
}

/// Operations queued for one tree type
#[derive(Debug, Clone)]
pub struct PendingOperations {
    tree_type: String,
    max_batch_size: usize,
    inserts: Paged<NodeRecord>,
    updates: Paged<UpdateEntry>,
    deletes: Vec<i64>,
    delete_set: HashSet<i64>,
    /// Tree columns each recorded node will hold once flushed
    written: HashMap<String, TreeAttributes>,
}

impl PendingOperations {
    pub fn new(tree_type: impl Into<String>, max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            tree_type: tree_type.into(),
            max_batch_size,
            inserts: Paged::new(max_batch_size),
            updates: Paged::new(max_batch_size),
            deletes: Vec::new(),
            delete_set: HashSet::new(),
            written: HashMap::new(),
        }
    }

    pub fn tree_type(&self) -> &str {
        &self.tree_type
    }

    pub fn inserts(&self) -> &Paged<NodeRecord> {
        &self.inserts
    }

    pub fn updates(&self) -> &Paged<UpdateEntry> {
        &self.updates
    }

    pub fn deletes(&self) -> &[i64] {
        &self.deletes
    }

    pub fn written(&self) -> &HashMap<String, TreeAttributes> {
        &self.written
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Ordered batches: deletes, then per-column updates, then inserts
    pub fn batches(&self) -> Vec<Batch> {
        let mut batches = Vec::new();

        for page in self.deletes.chunks(self.max_batch_size) {
            batches.push(Batch::Delete(DeleteBatch {
                tree_type: self.tree_type.clone(),
                storage_ids: page.to_vec(),
            }));
        }

        for page in self.updates.pages() {
            for column in TRACKED_COLUMNS {
                let assignments: Vec<(i64, Value)> = page
                    .iter()
                    .filter_map(|(_, entry)| {
                        entry
                            .columns
                            .get(column)
                            .map(|value| (entry.storage_id, value.clone()))
                    })
                    .collect();
                if !assignments.is_empty() {
                    batches.push(Batch::Update(UpdateBatch {
                        tree_type: self.tree_type.clone(),
                        column,
                        assignments,
                    }));
                }
            }
        }

        for page in self.inserts.pages() {
            batches.push(Batch::Insert(InsertBatch {
                tree_type: self.tree_type.clone(),
                records: page.iter().map(|(_, record)| record.clone()).collect(),
            }));
        }

        batches
    }

    fn purge(&mut self, unique_id: &str) {
        self.inserts.remove(unique_id);
        self.updates.remove(unique_id);
        self.written.remove(unique_id);
    }

    fn push_delete(&mut self, storage_id: i64) {
        if self.delete_set.insert(storage_id) {
            self.deletes.push(storage_id);
        }
    }
}

/// Accumulator for one build-then-persist cycle.
///
/// Owned by the caller and passed to mutations explicitly; nothing here is
/// process-wide.
#[derive(Debug, Clone)]
pub struct PersistenceSession {
    max_batch_size: usize,
    pending: BTreeMap<String, PendingOperations>,
}

impl Default for PersistenceSession {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl PersistenceSession {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            pending: BTreeMap::new(),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Queue the inserts and updates described by a rebuild's change set.
    ///
    /// Stored nodes the rebuild found unchanged drop any update still queued
    /// for them.
    pub fn record(&mut self, forest: &Forest, changes: &ChangeSet) -> Result<(), TreeError> {
        for change in changes {
            if change.new.tree_type.is_empty() {
                return Err(TreeError::invalid_tree(
                    "",
                    change.unique_id.clone(),
                    "tree type is required before persisting",
                ));
            }

            let record = match change.storage_id {
                None => Some(forest.node(change.handle)?.to_record()),
                Some(_) => None,
            };

            let pending = self.entry(&change.new.tree_type);
            match (change.storage_id, record) {
                (Some(storage_id), _) => {
                    let columns = change
                        .changed_columns()
                        .into_iter()
                        .filter_map(|column| {
                            change.new.column_value(column).map(|value| (column, value))
                        })
                        .collect();
                    pending.updates.upsert(
                        change.unique_id.clone(),
                        UpdateEntry {
                            storage_id,
                            columns,
                        },
                    );
                }
                (None, Some(record)) => {
                    pending.inserts.upsert(change.unique_id.clone(), record);
                }
                (None, None) => {}
            }
            pending
                .written
                .insert(change.unique_id.clone(), change.new.clone());
        }

        // nodes back at their stored columns must not flush an older update
        if let Some(pending) = self.pending.get_mut(&changes.tree_type) {
            for unique_id in &changes.unchanged {
                pending.purge(unique_id);
            }
        }

        debug!(
            tree_type = %changes.tree_type,
            recorded = changes.len(),
            "Recorded rebuild changes"
        );
        Ok(())
    }

    /// Queue deletion of a removed node.
    ///
    /// Pending inserts/updates for the node are purged; a node that was never
    /// stored only has its pending entries dropped.
    pub fn record_delete(&mut self, node: &TreeNode) {
        let persisted_type = node.persisted().map(|snapshot| snapshot.tree_type.clone());

        if let Some(unique_id) = node.unique_id.as_deref() {
            self.purge(&node.tree_type, unique_id);
            if let Some(previous) = persisted_type.as_deref() {
                if previous != node.tree_type {
                    self.purge(previous, unique_id);
                }
            }
        }

        if let Some(storage_id) = node.storage_id {
            let tree_type = persisted_type.unwrap_or_else(|| node.tree_type.clone());
            self.entry(&tree_type).push_delete(storage_id);
        }
    }

    /// Drop any insert/update queued for `unique_id` under `tree_type`
    pub fn purge(&mut self, tree_type: &str, unique_id: &str) {
        if let Some(pending) = self.pending.get_mut(tree_type) {
            pending.purge(unique_id);
        }
    }

    /// Drop everything queued for a tree type
    pub fn discard_tree_type(&mut self, tree_type: &str) -> Option<PendingOperations> {
        self.pending.remove(tree_type)
    }

    pub fn pending(&self, tree_type: &str) -> Option<&PendingOperations> {
        self.pending.get(tree_type)
    }

    /// Tree types with queued operations, in sorted order
    pub fn tree_types(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|(_, pending)| !pending.is_empty())
            .map(|(tree_type, _)| tree_type.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(PendingOperations::is_empty)
    }

    /// Flush the operations queued for `tree_type`.
    ///
    /// They are dropped from the session only when the flush commits, so a
    /// failed flush can be retried.
    pub async fn flush(
        &mut self,
        gateway: &dyn StorageGateway,
        tree_type: &str,
        relax_integrity: bool,
    ) -> Result<FlushReport, StorageError> {
        let Some(pending) = self.pending.get(tree_type) else {
            return Ok(FlushReport::empty(tree_type));
        };
        let report = flush_pending(gateway, pending, relax_integrity).await?;
        self.pending.remove(tree_type);
        Ok(report)
    }

    fn entry(&mut self, tree_type: &str) -> &mut PendingOperations {
        let max_batch_size = self.max_batch_size;
        self.pending
            .entry(tree_type.to_string())
            .or_insert_with(|| PendingOperations::new(tree_type, max_batch_size))
    }
}

/// Outcome of a committed flush
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub tree_type: String,
    pub deleted: u64,
    pub updated: u64,
    pub inserted: u64,
    pub statements: usize,
    /// Unique ids of the inserted records, for storage id lookup
    pub inserted_unique_ids: Vec<String>,
    /// Tree columns now stored for every flushed node
    pub written: HashMap<String, TreeAttributes>,
}

impl FlushReport {
    fn empty(tree_type: &str) -> Self {
        Self {
            tree_type: tree_type.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Counts {
    deleted: u64,
    inserted: u64,
    statements: usize,
}

/// Execute `pending` in one transaction.
///
/// With `relax_integrity`, key checking is disabled before the transaction
/// and re-enabled after commit or rollback, including when the body panics.
/// Any batch failure rolls back and returns the originating error.
pub async fn flush_pending(
    gateway: &dyn StorageGateway,
    pending: &PendingOperations,
    relax_integrity: bool,
) -> Result<FlushReport, StorageError> {
    let mut report = FlushReport::empty(&pending.tree_type);
    if pending.is_empty() {
        debug!(tree_type = %pending.tree_type, "Nothing to flush");
        return Ok(report);
    }

    let batches = pending.batches();

    if relax_integrity {
        gateway.toggle_integrity_checks(false).await?;
    }

    let outcome = AssertUnwindSafe(execute_in_transaction(gateway, &batches))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => {
            if let Err(error) = gateway.rollback().await {
                warn!(%error, "Rollback after panic failed");
            }
            if relax_integrity {
                if let Err(error) = gateway.toggle_integrity_checks(true).await {
                    warn!(%error, "Failed to restore integrity checks after panic");
                }
            }
            std::panic::resume_unwind(panic);
        }
    };

    if relax_integrity {
        if let Err(restore_error) = gateway.toggle_integrity_checks(true).await {
            if result.is_ok() {
                return Err(restore_error);
            }
            warn!(error = %restore_error, "Failed to restore integrity checks");
        }
    }

    let counts = result?;
    report.deleted = counts.deleted;
    report.inserted = counts.inserted;
    report.updated = pending.updates.len() as u64;
    report.statements = counts.statements;
    report.inserted_unique_ids = pending.inserts.keys().map(str::to_string).collect();
    report.written = pending.written.clone();

    info!(
        tree_type = %report.tree_type,
        deleted = report.deleted,
        updated = report.updated,
        inserted = report.inserted,
        statements = report.statements,
        "Flushed tree operations"
    );
    Ok(report)
}

async fn execute_in_transaction(
    gateway: &dyn StorageGateway,
    batches: &[Batch],
) -> Result<Counts, StorageError> {
    gateway.begin_transaction().await?;

    let mut counts = Counts::default();
    for batch in batches {
        match gateway.execute(batch).await {
            Ok(affected) => {
                match batch {
                    Batch::Delete(_) => counts.deleted += affected,
                    Batch::Insert(_) => counts.inserted += affected,
                    Batch::Update(_) => {}
                }
                counts.statements += 1;
            }
            Err(error) => {
                warn!(
                    kind = batch.kind(),
                    tree_type = batch.tree_type(),
                    rows = batch.len(),
                    %error,
                    "Batch failed, rolling back"
                );
                if let Err(rollback_error) = gateway.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                return Err(error);
            }
        }
    }

    if let Err(error) = gateway.commit().await {
        warn!(%error, "Commit failed, rolling back");
        if let Err(rollback_error) = gateway.rollback().await {
            warn!(error = %rollback_error, "Rollback failed");
        }
        return Err(error);
    }

    Ok(counts)
}

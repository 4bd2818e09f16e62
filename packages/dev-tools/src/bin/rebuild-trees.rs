//! Offline Index Rebuild Binary
//!
//! Loads every stored tree (or the trees of one tree type), recomputes the
//! nested-set columns from the parent links, and writes back only the rows
//! whose indices changed.
//!
//! # Usage
//!
//! ```bash
//! # Rebuild all tree types
//! NESTINDEX_DB_PATH=/tmp/trees.db cargo run --bin rebuild-trees
//!
//! # Rebuild one tree type
//! NESTINDEX_DB_PATH=/tmp/trees.db cargo run --bin rebuild-trees -- catalog
//! ```
//!
//! # Environment Variables
//!
//! - `NESTINDEX_DB_PATH`: Database file (required)
//! - `NESTINDEX_TABLE`: Table holding the tree rows
//! - `NESTINDEX_MAX_BATCH_SIZE`: Rows per write statement
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use std::env;

use anyhow::Context;
use nestindex_core::tree::force_rebuild;
use nestindex_core::{TreeIndexConfig, TreeService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let tree_type = env::args().nth(1);

    let config = TreeIndexConfig::from_env().context("Invalid NESTINDEX_* configuration")?;
    if config.database_path.is_none() {
        anyhow::bail!("NESTINDEX_DB_PATH must point at the database to rebuild");
    }
    let mut service = TreeService::from_config(config)
        .await
        .context("Failed to open tree storage")?;

    let mut loaded = service
        .load_forest(tree_type.as_deref())
        .await
        .context("Failed to load stored trees")?;

    tracing::info!(
        roots = loaded.roots.len(),
        tree_type = tree_type.as_deref().unwrap_or("all"),
        "Loaded trees"
    );

    let mut session = service.new_session();
    let mut changed_rows = 0;
    for root in &loaded.roots {
        let changes = force_rebuild(&mut loaded.forest, root.handle).with_context(|| {
            format!(
                "Failed to rebuild tree {}/{}",
                root.tree_type, root.root_group
            )
        })?;
        changed_rows += changes.len();
        session.record(&loaded.forest, &changes)?;
    }

    let reports = service
        .persist_all(&mut loaded.forest, &mut session)
        .await
        .context("Failed to write rebuilt indices")?;

    for report in &reports {
        tracing::info!(
            tree_type = %report.tree_type,
            updated = report.updated,
            inserted = report.inserted,
            statements = report.statements,
            "Flushed tree type"
        );
    }
    tracing::info!(changed_rows, tree_types = reports.len(), "Rebuild complete");

    Ok(())
}

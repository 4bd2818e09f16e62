//! Data Models
//!
//! This module contains the data structures shared by every tree component:
//!
//! - `TreeNode` - Tree columns, identity, and domain attributes of one node
//! - `TreeAttributes` - Tracked tree columns used for change detection
//! - `NodeRecord` / `NestedNode` - Flat and nested boundary shapes
//!
//! Domain attributes are pure JSON and are persisted in the `properties`
//! column of the backing table.

mod node;
mod record;

pub use node::{
    generate_root_group, generate_tree_type, generate_unique_id, TreeAttributes, TreeNode,
    TRACKED_COLUMNS,
};
pub use record::{strip_transient_keys, NestedNode, NodeRecord, TRANSIENT_KEYS};

//! Services
//!
//! - `TreeService` - load trees from storage and persist mutated forests
//! - `TreeLoader` - link flat records (or nested input) into trees
//! - `TreeCache` - built trees keyed by tree type and representation
//! - `TreeLifecycle` - hooks the entity layer calls after create/update/delete

pub mod lifecycle;
pub mod tree_cache;
pub mod tree_loader;
pub mod tree_service;

pub use lifecycle::TreeLifecycle;
pub use tree_cache::{CacheKey, CachedTree, RepresentationKind, TreeCache};
pub use tree_loader::{LoadedForest, LoadedRoot, TreeLoader};
pub use tree_service::TreeService;

//! Canonical Tree Representation
//!
//! - `Forest` - Generational arena holding node data and parent/root/child links
//! - `index_builder` - Iterative nested-set rebuild producing a `ChangeSet`
//! - `nested` - Adapter to and from the plain nested-map shape

mod forest;
pub mod index_builder;
pub mod nested;

pub use forest::{Forest, NodeHandle};
pub use index_builder::{force_rebuild, rebuild, Change, ChangeSet};
pub use nested::{export_nested, import_nested};

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod index_builder_test;

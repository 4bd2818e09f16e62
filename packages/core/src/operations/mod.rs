//! Tree Operations
//!
//! This module provides the structural operations on nested-set trees:
//!
//! - `TreeMutator` - attach, move, remove (cascade or promote), re-root
//! - `find_by` / `find_by_attributes` - deterministic depth-first search
//! - `TreeError` - errors raised by tree operations

mod error;
pub mod find;
pub mod mutation;

pub use error::TreeError;
pub use find::{find_by, find_by_attributes, FoundNode};
pub use mutation::TreeMutator;

#[cfg(test)]
mod mutation_test;

//! Board models: descriptors, catalog and matcher
//!
//! A model is identified on a live board by register predicates. Type 1
//! archive segments carry their predicates and flash geometry inline;
//! Type 2 segments and raw images rely on the [`ModelCatalog`].

mod catalog;
mod matcher;
mod types;

pub use catalog::*;
pub use matcher::*;
pub use types::*;

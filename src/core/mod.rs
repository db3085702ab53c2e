//! Core traits and vector kernels.

pub mod traits;
pub mod vector;
pub mod wrappers;

pub use traits::{Indexing, InnerProduct, MatVec};

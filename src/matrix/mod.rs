//! Matrix module: sparse CSR storage and the Stokes block operator.

pub mod block;
pub mod sparse;

pub use block::{BlockOperator, BlockVector};
pub use sparse::CsrMatrix;

//! Solver and preconditioner factories.
//!
//! - [`ksp_context`]: `KspContext`, a configured Krylov method plus its
//!   preconditioner, reused across solves.
//! - [`pc_context`]: builds a velocity-block preconditioner from `PcType`.

pub mod ksp_context;
pub mod pc_context;

pub use ksp_context::KspContext;
pub use pc_context::build_preconditioner;

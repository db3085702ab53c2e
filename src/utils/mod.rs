//! Utilities shared by the solvers: convergence tests and reasons.

pub mod convergence;

pub use convergence::{ConvergedReason, Convergence, ConvergenceTest, MinIterations, SolveStats};

//! Krylov & direct solver interfaces.

use crate::error::StokesError;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::SolveStats;

/// Common interface for any direct or iterative solver.
///
/// Numerical failure (stagnation, breakdown, an indefinite operator) is
/// reported through `SolveStats::reason`; `Err` is reserved for structural
/// problems such as mismatched dimensions or a preconditioner that cannot
/// be applied.
pub trait LinearSolver<M: ?Sized> {
    /// Solve A·x = b, starting from and writing the result into `x`.
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner>,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats, StokesError>;
}

pub mod cg;
pub mod direct_lu;
pub mod fgmres;

pub use cg::{CgNormType, PcgSolver};
pub use direct_lu::LuSolver;
pub use fgmres::FgmresSolver;

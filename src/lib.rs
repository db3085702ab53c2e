//! bsscr: block Stokes Schur-complement reduction over sparse CSR operators.
//!
//! Solves the saddle-point system produced by a mixed finite-element Stokes
//! discretisation,
//!
//! ```text
//! [K G] [u]   [f]
//! [D C] [p] = [h]
//! ```
//!
//! by reducing it to the pressure Schur complement and solving that with a
//! nested Krylov iteration. The solver optionally augments K with a penalty
//! term, rescales the blocks, preconditions S with a weighted GᵗKG operator,
//! projects out pressure null-space modes and adapts the multigrid smoothing
//! of the inner velocity solves.
//!
//! ```no_run
//! use bsscr::{BlockOperator, BsscrOptions, BsscrSolver, CsrMatrix, StokesSystem};
//!
//! # fn main() -> Result<(), bsscr::StokesError> {
//! let k = CsrMatrix::from_diagonal(&[2.0, 3.0, 4.0]);
//! let g = CsrMatrix::from_triplets(3, 2, &[(0, 0, 1.0), (1, 0, -1.0), (1, 1, 1.0), (2, 1, 2.0)])?;
//! let op = BlockOperator::with_transposed_coupling(k, g, None);
//! let system = StokesSystem::new(op, vec![3.0, 4.0, 10.0], vec![-1.0, 8.0]);
//! let solution = BsscrSolver::new(BsscrOptions::default()).solve(&system)?;
//! println!("{}", solution.stats);
//! # Ok(())
//! # }
//! ```

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod stokes;
pub mod utils;

pub use config::{BsscrOptions, K2Type, KspOptions, KspType, NullSpaceMode, PcType, ScalingMode, SchurPcType};
pub use error::StokesError;
pub use matrix::{BlockOperator, BlockVector, CsrMatrix};
pub use stokes::{BsscrSolver, StokesSolution, StokesSystem};
pub use utils::convergence::{ConvergedReason, SolveStats};

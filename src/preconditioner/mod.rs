//! Preconditioners for the inner and outer Krylov solves.
//!
//! Velocity-block preconditioners (`Jacobi`, `Sor`, `Amg`) are set up from a
//! sparse matrix; the Schur-complement preconditioner (`GtkgPc`) is set up
//! from the block operators and drives its own inner solves.

use crate::error::StokesError;
use crate::matrix::CsrMatrix;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), StokesError>;
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &CsrMatrix) -> Result<(), StokesError> {
        Ok(())
    }
}

/// z = r.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Preconditioner for Identity {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), StokesError> {
        z.copy_from_slice(r);
        Ok(())
    }
}

pub mod amg;
pub mod gtkg;
pub mod jacobi;
pub mod mg_smoothing;
pub mod sor;

pub use amg::Amg;
pub use gtkg::{GtkgPc, GtkgState};
pub use jacobi::Jacobi;
pub use mg_smoothing::{SharedSchedule, SmoothingSchedule, smoothing_monitor};
pub use sor::{MatSorType, Sor};

// Jacobi preconditioner implementation

use crate::error::StokesError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;

/// Jacobi preconditioner: M⁻¹ = D⁻¹
#[derive(Debug, Clone, Default)]
pub struct Jacobi {
    pub(crate) inv_diag: Vec<f64>,
}

impl Jacobi {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self { inv_diag: Vec::new() }
    }

    /// Build directly from a diagonal (e.g. of an approximate Schur matrix).
    /// Zero entries are passed through unscaled.
    pub fn from_diagonal(diag: &[f64]) -> Self {
        let inv_diag = diag
            .iter()
            .map(|&d| if d != 0.0 { 1.0 / d } else { 1.0 })
            .collect();
        Self { inv_diag }
    }

    pub fn inv_diag(&self) -> &[f64] {
        &self.inv_diag
    }
}

impl Preconditioner for Jacobi {
    fn setup(&mut self, a: &CsrMatrix) -> Result<(), StokesError> {
        if !a.is_square() {
            return Err(StokesError::Unsupported("Jacobi requires a square matrix"));
        }
        *self = Jacobi::from_diagonal(&a.diagonal());
        Ok(())
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), StokesError> {
        if self.inv_diag.len() != x.len() {
            return Err(StokesError::dims("Jacobi apply", self.inv_diag.len(), x.len()));
        }
        for ((yi, &xi), &di) in y.iter_mut().zip(x).zip(&self.inv_diag) {
            *yi = di * xi;
        }
        Ok(())
    }
}

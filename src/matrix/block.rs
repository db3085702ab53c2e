//! The 2×2 Stokes block operator and its paired vectors.

use crate::error::{StokesError, check_dim};
use crate::matrix::sparse::CsrMatrix;

/// `[[K, G], [D, C]]`.
///
/// K and G always exist. D is optional only so that an incomplete operator
/// handed over by the assembly layer can be reported instead of assumed;
/// a solve without D fails with `MissingOperator("D")`. An absent C is zero.
#[derive(Debug, Clone)]
pub struct BlockOperator {
    pub k: CsrMatrix,
    pub g: CsrMatrix,
    pub d: Option<CsrMatrix>,
    pub c: Option<CsrMatrix>,
}

impl BlockOperator {
    pub fn new(k: CsrMatrix, g: CsrMatrix, d: Option<CsrMatrix>, c: Option<CsrMatrix>) -> Self {
        Self { k, g, d, c }
    }

    /// D = Gᵗ.
    pub fn with_transposed_coupling(k: CsrMatrix, g: CsrMatrix, c: Option<CsrMatrix>) -> Self {
        let d = g.transpose();
        Self { k, g, d: Some(d), c }
    }

    pub fn velocity_dim(&self) -> usize {
        self.k.nrows()
    }

    pub fn pressure_dim(&self) -> usize {
        self.g.ncols()
    }

    pub fn d(&self) -> Result<&CsrMatrix, StokesError> {
        self.d.as_ref().ok_or(StokesError::MissingOperator("D"))
    }

    /// Checks shapes: K n×n, G n×m, D m×n, C m×m, and that D exists.
    pub fn validate(&self) -> Result<(), StokesError> {
        let n = self.velocity_dim();
        let m = self.pressure_dim();
        check_dim("K columns", n, self.k.ncols())?;
        check_dim("G rows", n, self.g.nrows())?;
        let d = self.d()?;
        check_dim("D rows", m, d.nrows())?;
        check_dim("D columns", n, d.ncols())?;
        if let Some(c) = &self.c {
            check_dim("C rows", m, c.nrows())?;
            check_dim("C columns", m, c.ncols())?;
        }
        Ok(())
    }

    /// y ← C x, or zero when C is absent.
    pub fn apply_c(&self, x: &[f64], y: &mut [f64]) {
        match &self.c {
            Some(c) => c.spmv(x, y),
            None => y.fill(0.0),
        }
    }
}

/// Unknowns and right-hand sides of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVector {
    pub u: Vec<f64>,
    pub p: Vec<f64>,
    pub f: Vec<f64>,
    pub h: Vec<f64>,
}

impl BlockVector {
    /// Zero initial guess for the given right-hand sides.
    pub fn new(f: Vec<f64>, h: Vec<f64>) -> Self {
        Self { u: vec![0.0; f.len()], p: vec![0.0; h.len()], f, h }
    }

    pub fn validate(&self, op: &BlockOperator) -> Result<(), StokesError> {
        let n = op.velocity_dim();
        let m = op.pressure_dim();
        check_dim("u", n, self.u.len())?;
        check_dim("f", n, self.f.len())?;
        check_dim("p", m, self.p.len())?;
        check_dim("h", m, self.h.len())?;
        Ok(())
    }
}

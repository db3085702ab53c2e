use crate::error::StokesError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MatSorType: u32 {
        const FORWARD_SWEEP   = 0b0001; // forward Gauss–Seidel
        const BACKWARD_SWEEP  = 0b0010; // backward
        const SYMMETRIC_SWEEP = Self::FORWARD_SWEEP.bits() | Self::BACKWARD_SWEEP.bits();
    }
}

/// One relaxation pass over `x` for A x = b, in the directions selected by
/// `sweep`. `inv_diag` holds 1/(a_ii + shift).
pub(crate) fn relax(a: &CsrMatrix, inv_diag: &[f64], omega: f64, sweep: MatSorType, b: &[f64], x: &mut [f64]) {
    let update = |i: usize, x: &mut [f64]| {
        let (cols, vals) = a.row(i);
        let mut sigma = 0.0;
        for (&j, &v) in cols.iter().zip(vals) {
            if j != i {
                sigma += v * x[j];
            }
        }
        x[i] = (1.0 - omega) * x[i] + omega * (b[i] - sigma) * inv_diag[i];
    };
    if sweep.contains(MatSorType::FORWARD_SWEEP) {
        for i in 0..x.len() {
            update(i, x);
        }
    }
    if sweep.contains(MatSorType::BACKWARD_SWEEP) {
        for i in (0..x.len()).rev() {
            update(i, x);
        }
    }
}

/// Inverse of `diag + shift`, failing on a zero pivot.
pub(crate) fn shifted_inv_diag(a: &CsrMatrix, fshift: f64) -> Result<Vec<f64>, StokesError> {
    a.diagonal()
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let aii = d + fshift;
            if aii == 0.0 { Err(StokesError::ZeroPivot(i)) } else { Ok(1.0 / aii) }
        })
        .collect()
}

/// (S)SOR preconditioner with a zero initial guess.
#[derive(Debug, Clone)]
pub struct Sor {
    pub its: usize,
    pub sym: MatSorType,
    pub omega: f64,
    pub fshift: f64,
    inv_diag: Vec<f64>,
    a: Option<CsrMatrix>,
}

impl Sor {
    pub fn new(omega: f64, its: usize, sym: MatSorType) -> Self {
        Self { its, sym, omega, fshift: 0.0, inv_diag: Vec::new(), a: None }
    }
    /// Symmetric sweep, one iteration: SPD whenever A is, so usable inside CG.
    pub fn ssor(omega: f64) -> Self {
        Self::new(omega, 1, MatSorType::SYMMETRIC_SWEEP)
    }
    pub fn with_fshift(mut self, fshift: f64) -> Self {
        self.fshift = fshift;
        self
    }
}

impl fmt::Display for Sor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOR(omega={}, its={}, sym={:?}, fshift={})", self.omega, self.its, self.sym, self.fshift)
    }
}

impl Preconditioner for Sor {
    fn setup(&mut self, a: &CsrMatrix) -> Result<(), StokesError> {
        if !a.is_square() {
            return Err(StokesError::Unsupported("SOR requires a square matrix"));
        }
        self.inv_diag = shifted_inv_diag(a, self.fshift)?;
        self.a = Some(a.clone());
        Ok(())
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), StokesError> {
        let a = self.a.as_ref().ok_or(StokesError::InvalidState("SOR applied before setup"))?;
        if a.nrows() != x.len() {
            return Err(StokesError::dims("SOR apply", a.nrows(), x.len()));
        }
        y.fill(0.0);
        for _ in 0..self.its {
            relax(a, &self.inv_diag, self.omega, self.sym, x, y);
        }
        Ok(())
    }
}

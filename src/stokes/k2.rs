//! Augmented-Lagrangian penalty term.
//!
//! The velocity block is replaced by K + γ·K2 and the momentum right-hand
//! side by f + γ·f2. Adding γ·G M⁻¹ (Gᵗu − h) to the momentum equation does
//! not change the discrete solution but makes the Schur complement much
//! better conditioned for large γ.
//!
//! The orchestrator works on a copy of K; [`Augmentation`] records the delta
//! so it can be taken off again (exactly once) before the velocity
//! back-solve or the diagnostics.

use crate::config::K2Type;
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::{BlockOperator, CsrMatrix};

/// Penalties at or below this are treated as no augmentation.
pub const MIN_PENALTY: f64 = 1e-10;

/// Caller-supplied K2 and optional f2.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalK2 {
    pub k2: CsrMatrix,
    pub f2: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedTerm {
    pub kind: K2Type,
    pub k2: CsrMatrix,
    pub f2: Option<Vec<f64>>,
}

/// Whether `kind` with `penalty` augments anything at all.
pub fn is_augmented(kind: K2Type, penalty: f64) -> bool {
    kind != K2Type::None && penalty > MIN_PENALTY
}

/// diag(M)⁻¹, zero where the mass diagonal is zero.
fn inverse_mass_diagonal(mass: &CsrMatrix, m: usize) -> Result<Vec<f64>, StokesError> {
    check_dim("pressure mass rows", m, mass.nrows())?;
    check_dim("pressure mass columns", m, mass.ncols())?;
    let mut d = mass.diagonal();
    vector::reciprocal(&mut d);
    Ok(d)
}

/// G · diag(w) · Gᵗ
fn weighted_ggt(g: &CsrMatrix, w: Option<&[f64]>) -> Result<CsrMatrix, StokesError> {
    let gt = g.transpose();
    match w {
        Some(w) => {
            let mut gw = g.clone();
            gw.scale_cols(w)?;
            gw.matmul(&gt)
        }
        None => g.matmul(&gt),
    }
}

/// Build K2 of the requested kind. `Ok(None)` for `K2Type::None`.
///
/// Missing inputs (the pressure mass for GMG/DGMGD, the operator for
/// `External`) are `Configuration` errors; the caller decides whether to
/// fall back to an unaugmented solve.
pub fn build_k2(
    kind: K2Type,
    op: &BlockOperator,
    pressure_mass: Option<&CsrMatrix>,
    external: Option<&ExternalK2>,
) -> Result<Option<AugmentedTerm>, StokesError> {
    let n = op.velocity_dim();
    let m = op.pressure_dim();
    let missing_mass = || StokesError::Configuration(format!("K2 type {kind:?} needs a pressure mass matrix"));
    let (k2, f2) = match kind {
        K2Type::None => return Ok(None),
        K2Type::Gg => (weighted_ggt(&op.g, None)?, None),
        K2Type::Gmg => {
            let minv = inverse_mass_diagonal(pressure_mass.ok_or_else(missing_mass)?, m)?;
            (weighted_ggt(&op.g, Some(&minv))?, None)
        }
        K2Type::Dgmgd => {
            let minv = inverse_mass_diagonal(pressure_mass.ok_or_else(missing_mass)?, m)?;
            let mut k2 = weighted_ggt(&op.g, Some(&minv))?;
            let sqrt_diag: Vec<f64> = op.k.diagonal().into_iter().map(|d| d.abs().sqrt()).collect();
            k2.diagonal_scale(Some(&sqrt_diag), Some(&sqrt_diag))?;
            (k2, None)
        }
        K2Type::External => {
            let ext = external.ok_or_else(|| StokesError::Configuration("K2 type External needs an external K2 operator".into()))?;
            check_dim("external K2 rows", n, ext.k2.nrows())?;
            check_dim("external K2 columns", n, ext.k2.ncols())?;
            if let Some(f2) = &ext.f2 {
                check_dim("external f2", n, f2.len())?;
            }
            (ext.k2.clone(), ext.f2.clone())
        }
    };
    Ok(Some(AugmentedTerm { kind, k2, f2 }))
}

/// Right-hand-side correction matching a built K2: G·h for GG,
/// G·(diag(M)⁻¹ ∘ h) for GMG and DGMGD. External terms get none.
pub fn force_correction(
    kind: K2Type,
    g: &CsrMatrix,
    h: &[f64],
    pressure_mass: Option<&CsrMatrix>,
) -> Result<Option<Vec<f64>>, StokesError> {
    check_dim("force correction h", g.ncols(), h.len())?;
    let weighted = match kind {
        K2Type::None | K2Type::External => return Ok(None),
        K2Type::Gg => h.to_vec(),
        K2Type::Gmg | K2Type::Dgmgd => {
            let mass = pressure_mass.ok_or_else(|| StokesError::Configuration(format!("K2 type {kind:?} needs a pressure mass matrix")))?;
            let mut w = h.to_vec();
            vector::pointwise_mult(&mut w, &inverse_mass_diagonal(mass, g.ncols())?);
            w
        }
    };
    let mut f3 = vec![0.0; g.nrows()];
    g.spmv(&weighted, &mut f3);
    Ok(Some(f3))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentationState {
    Prepared,
    Applied,
    Restored,
}

/// A penalty term together with the bookkeeping to add and remove it.
#[derive(Debug, Clone)]
pub struct Augmentation {
    term: AugmentedTerm,
    penalty: f64,
    state: AugmentationState,
}

impl Augmentation {
    pub fn new(term: AugmentedTerm, penalty: f64) -> Self {
        Self { term, penalty, state: AugmentationState::Prepared }
    }

    pub fn state(&self) -> AugmentationState {
        self.state
    }

    pub fn term(&self) -> &AugmentedTerm {
        &self.term
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    fn shift(&self, sign: f64, k: &mut CsrMatrix, f: &mut [f64]) -> Result<(), StokesError> {
        k.axpy(sign * self.penalty, &self.term.k2)?;
        if let Some(f2) = &self.term.f2 {
            check_dim("augmentation f", f2.len(), f.len())?;
            vector::axpy(sign * self.penalty, f2, f);
        }
        Ok(())
    }

    /// K ← K + γ·K2, f ← f + γ·f2.
    pub fn apply(&mut self, k: &mut CsrMatrix, f: &mut [f64]) -> Result<(), StokesError> {
        if self.state != AugmentationState::Prepared {
            return Err(StokesError::InvalidState("augmentation can only be applied once"));
        }
        self.shift(1.0, k, f)?;
        self.state = AugmentationState::Applied;
        Ok(())
    }

    /// K ← K − γ·K2, f ← f − γ·f2.
    pub fn restore(&mut self, k: &mut CsrMatrix, f: &mut [f64]) -> Result<(), StokesError> {
        if self.state != AugmentationState::Applied {
            return Err(StokesError::InvalidState("augmentation restored without being applied"));
        }
        self.shift(-1.0, k, f)?;
        self.state = AugmentationState::Restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> BlockOperator {
        let k = CsrMatrix::from_diagonal(&[4.0, 1.0, 9.0]);
        let g = CsrMatrix::from_triplets(3, 2, &[(0, 0, 1.0), (1, 0, -1.0), (1, 1, 1.0), (2, 1, 2.0)]).unwrap();
        BlockOperator::with_transposed_coupling(k, g, None)
    }

    #[test]
    fn gg_and_gmg_terms() {
        let op = op();
        let gg = build_k2(K2Type::Gg, &op, None, None).unwrap().unwrap();
        // (G Gᵗ)[1][1] = 1 + 1
        assert_eq!(gg.k2.get(1, 1), 2.0);
        assert_eq!(gg.k2.get(0, 2), 0.0);
        let mass = CsrMatrix::from_diagonal(&[2.0, 4.0]);
        let gmg = build_k2(K2Type::Gmg, &op, Some(&mass), None).unwrap().unwrap();
        assert!((gmg.k2.get(1, 1) - (0.5 + 0.25)).abs() < 1e-15);
        let dgmgd = build_k2(K2Type::Dgmgd, &op, Some(&mass), None).unwrap().unwrap();
        // scaled by sqrt(4)·sqrt(4) on (0,0)
        assert!((dgmgd.k2.get(0, 0) - 4.0 * 0.5).abs() < 1e-15);
        assert!(build_k2(K2Type::None, &op, None, None).unwrap().is_none());
    }

    #[test]
    fn missing_inputs_are_configuration_errors() {
        let op = op();
        assert!(matches!(build_k2(K2Type::Gmg, &op, None, None), Err(StokesError::Configuration(_))));
        assert!(matches!(build_k2(K2Type::External, &op, None, None), Err(StokesError::Configuration(_))));
        let bad = ExternalK2 { k2: CsrMatrix::identity(2), f2: None };
        assert!(matches!(build_k2(K2Type::External, &op, None, Some(&bad)), Err(StokesError::DimensionMismatch { .. })));
    }

    #[test]
    fn force_corrections() {
        let op = op();
        let h = [1.0, 2.0];
        assert_eq!(force_correction(K2Type::Gg, &op.g, &h, None).unwrap(), Some(vec![1.0, 1.0, 4.0]));
        let mass = CsrMatrix::from_diagonal(&[2.0, 4.0]);
        assert_eq!(force_correction(K2Type::Gmg, &op.g, &h, Some(&mass)).unwrap(), Some(vec![0.5, 0.0, 1.0]));
        assert_eq!(force_correction(K2Type::External, &op.g, &h, None).unwrap(), None);
    }

    #[test]
    fn apply_restore_round_trip_and_state_machine() {
        let op = op();
        let mut term = build_k2(K2Type::Gg, &op, None, None).unwrap().unwrap();
        term.f2 = force_correction(K2Type::Gg, &op.g, &[1.0, 2.0], None).unwrap();
        let mut aug = Augmentation::new(term, 10.0);
        let mut k = op.k.clone();
        let mut f = vec![1.0, 1.0, 1.0];
        assert!(aug.restore(&mut k, &mut f).is_err());
        aug.apply(&mut k, &mut f).unwrap();
        assert_eq!(aug.state(), AugmentationState::Applied);
        assert_eq!(k.get(1, 1), 1.0 + 20.0);
        assert_eq!(f, vec![11.0, 11.0, 41.0]);
        assert!(aug.apply(&mut k, &mut f).is_err());
        aug.restore(&mut k, &mut f).unwrap();
        assert!((k.get(1, 1) - 1.0).abs() < 1e-12);
        assert!(f.iter().all(|v| (v - 1.0).abs() < 1e-12));
        assert!(matches!(aug.restore(&mut k, &mut f), Err(StokesError::InvalidState(_))));
    }

    #[test]
    fn tiny_penalty_is_not_an_augmentation() {
        assert!(!is_augmented(K2Type::Gg, 1e-12));
        assert!(!is_augmented(K2Type::None, 1e3));
        assert!(is_augmented(K2Type::Gmg, 1.0));
    }
}

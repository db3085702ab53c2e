//! Diagonal rescaling of the block system.
//!
//! The scaled system is
//!
//! ```text
//! [L1 K R1   L1 G R2] [R1⁻¹ u]   [L1 f]
//! [L2 D R1   L2 C R2] [R2⁻¹ p] = [L2 h]
//! ```
//!
//! Unscaling re-applies the same formulas with the reciprocal factors, so the
//! factors carry an `inverted` flag that `scale_system` and `unscale_system`
//! flip as needed.

use crate::config::ScalingMode;
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::{BlockOperator, BlockVector, CsrMatrix};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BlockScaling {
    mode: ScalingMode,
    l1: Vec<f64>,
    r1: Vec<f64>,
    l2: Vec<f64>,
    r2: Vec<f64>,
    inverted: bool,
    scaled: bool,
}

/// 1/sqrt(v), leaving a unit scale where v is zero or not finite.
fn inv_sqrt(v: f64) -> f64 {
    let s = v.abs().sqrt();
    if s > 0.0 && s.is_finite() { 1.0 / s } else { 1.0 }
}

impl BlockScaling {
    pub fn build(op: &BlockOperator, mode: ScalingMode) -> Result<Self, StokesError> {
        let n = op.velocity_dim();
        let m = op.pressure_dim();
        check_dim("scaling: K columns", n, op.k.ncols())?;
        check_dim("scaling: G rows", n, op.g.nrows())?;
        let (l1, l2) = match mode {
            ScalingMode::Full => {
                let l1: Vec<f64> = op.k.row_max_abs().into_iter().map(inv_sqrt).collect();
                let ra = vector::rms(&l1);
                let rg = vector::rms(&op.g.row_max_abs());
                let c = if ra * rg > 0.0 { 1.0 / (rg * ra) } else { 1.0 };
                (l1, vec![c; m])
            }
            ScalingMode::VelocityOnly => (op.k.diagonal().into_iter().map(inv_sqrt).collect(), vec![1.0; m]),
        };
        Ok(Self { mode, r1: l1.clone(), r2: l2.clone(), l1, l2, inverted: false, scaled: false })
    }

    pub fn mode(&self) -> ScalingMode {
        self.mode
    }
    pub fn l1(&self) -> &[f64] {
        &self.l1
    }
    pub fn r1(&self) -> &[f64] {
        &self.r1
    }
    pub fn l2(&self) -> &[f64] {
        &self.l2
    }
    pub fn r2(&self) -> &[f64] {
        &self.r2
    }
    pub fn is_scaled(&self) -> bool {
        self.scaled
    }
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Replace every factor by its reciprocal.
    pub fn invert(&mut self) {
        for v in [&mut self.l1, &mut self.r1, &mut self.l2, &mut self.r2] {
            vector::reciprocal(v);
        }
        self.inverted = !self.inverted;
    }

    fn check(&self, op: &BlockOperator, vec: &BlockVector) -> Result<(), StokesError> {
        check_dim("scaling: velocity size", self.l1.len(), op.velocity_dim())?;
        check_dim("scaling: pressure size", self.l2.len(), op.pressure_dim())?;
        vec.validate(op)
    }

    fn apply(&self, op: &mut BlockOperator, vec: &mut BlockVector) -> Result<(), StokesError> {
        op.k.diagonal_scale(Some(&self.l1), Some(&self.r1))?;
        op.g.diagonal_scale(Some(&self.l1), Some(&self.r2))?;
        if let Some(d) = op.d.as_mut() {
            d.diagonal_scale(Some(&self.l2), Some(&self.r1))?;
        }
        if let Some(c) = op.c.as_mut() {
            c.diagonal_scale(Some(&self.l2), Some(&self.r2))?;
        }
        vector::pointwise_divide(&mut vec.u, &self.r1);
        vector::pointwise_divide(&mut vec.p, &self.r2);
        vector::pointwise_mult(&mut vec.f, &self.l1);
        vector::pointwise_mult(&mut vec.h, &self.l2);
        Ok(())
    }

    pub fn scale_system(&mut self, op: &mut BlockOperator, vec: &mut BlockVector) -> Result<(), StokesError> {
        if self.scaled {
            return Err(StokesError::InvalidState("system is already scaled"));
        }
        self.check(op, vec)?;
        if self.inverted {
            self.invert();
        }
        self.apply(op, vec)?;
        self.scaled = true;
        Ok(())
    }

    pub fn unscale_system(&mut self, op: &mut BlockOperator, vec: &mut BlockVector) -> Result<(), StokesError> {
        if !self.scaled {
            warn!("unscale requested on a system that is not scaled; ignoring");
            return Ok(());
        }
        self.check(op, vec)?;
        if !self.inverted {
            self.invert();
        }
        self.apply(op, vec)?;
        self.scaled = false;
        Ok(())
    }

    /// a ← L1 a R1 with the factors currently held.
    pub fn scale_velocity_operator(&self, a: &mut CsrMatrix) -> Result<(), StokesError> {
        a.diagonal_scale(Some(&self.l1), Some(&self.r1))
    }

    /// a ← L2 a R2 with the factors currently held.
    pub fn scale_pressure_operator(&self, a: &mut CsrMatrix) -> Result<(), StokesError> {
        a.diagonal_scale(Some(&self.l2), Some(&self.r2))
    }

    /// f ← L1 ∘ f
    pub fn scale_velocity_rhs(&self, f: &mut [f64]) -> Result<(), StokesError> {
        check_dim("scale_velocity_rhs", self.l1.len(), f.len())?;
        vector::pointwise_mult(f, &self.l1);
        Ok(())
    }
}

/// Log the range of row magnitudes of every block.
pub fn report_operator_scales(op: &BlockOperator) {
    let blocks = [("K", Some(&op.k)), ("G", Some(&op.g)), ("D", op.d.as_ref()), ("C", op.c.as_ref())];
    for (name, a) in blocks {
        let Some(a) = a else { continue };
        let max = a.row_max_abs();
        let min = a.row_min_abs();
        let hi = vector::max_with_index(&max).map_or(0.0, |(_, v)| v);
        let lo = vector::min_with_index(&min).map_or(0.0, |(_, v)| v);
        debug!(block = name, max_row_abs = hi, min_row_abs = lo, "operator scale");
    }
}

//! Preconditioned Conjugate Gradient (PCG) per Saad §9.2
//!
//! Requires a symmetric positive definite operator and preconditioner. Loss
//! of definiteness is detected (pᵗAp ≤ 0, rᵗz < 0) and reported as a
//! divergence reason rather than an error, so the caller can decide whether
//! a failed inner solve is fatal.

use crate::core::traits::{Indexing, InnerProduct, MatVec};
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::parallel::Reduction;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{ConvergedReason, Convergence, ConvergenceTest, SolveStats};
use tracing::debug;

/// Which residual norm drives the convergence test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CgNormType {
    /// ‖M⁻¹r‖
    Preconditioned,
    /// ‖r‖
    #[default]
    Unpreconditioned,
    /// sqrt(rᵗM⁻¹r)
    Natural,
}

pub struct PcgSolver {
    pub conv: Box<dyn ConvergenceTest>,
    pub norm_type: CgNormType,
    pub monitor: Option<Box<dyn FnMut(usize, f64)>>,
    pub residual_history: Vec<f64>,
    /// Emit a debug event per iteration under this label.
    pub trace: Option<&'static str>,
    ip: Reduction,
}

impl PcgSolver {
    pub fn new(rtol: f64, max_iters: usize) -> Self {
        Self {
            conv: Box::new(Convergence::new(rtol, max_iters)),
            norm_type: CgNormType::default(),
            monitor: None,
            residual_history: Vec::new(),
            trace: None,
            ip: Reduction::default(),
        }
    }
    pub fn with_convergence_test(mut self, conv: Box<dyn ConvergenceTest>) -> Self {
        self.conv = conv;
        self
    }
    pub fn with_norm(mut self, norm_type: CgNormType) -> Self {
        self.norm_type = norm_type;
        self
    }
    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, f64) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }
    pub fn with_boxed_monitor(mut self, monitor: Option<Box<dyn FnMut(usize, f64)>>) -> Self {
        self.monitor = monitor;
        self
    }
    pub fn with_reduction(mut self, ip: Reduction) -> Self {
        self.ip = ip;
        self
    }
    pub fn with_trace(mut self, label: &'static str) -> Self {
        self.trace = Some(label);
        self
    }
    /// Hand the monitor back, e.g. to reuse it in the next solve.
    pub fn take_monitor(&mut self) -> Option<Box<dyn FnMut(usize, f64)>> {
        self.monitor.take()
    }
    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }

    fn residual_norm(&self, r: &[f64], z: &[f64], rz: f64) -> f64 {
        match self.norm_type {
            CgNormType::Preconditioned => self.ip.norm(z),
            CgNormType::Unpreconditioned => self.ip.norm(r),
            CgNormType::Natural => rz.abs().sqrt(),
        }
    }

    fn record(&mut self, it: usize, rnorm: f64) {
        if let Some(label) = self.trace {
            debug!(solver = label, it, rnorm, "cg");
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor(it, rnorm);
        }
        self.residual_history.push(rnorm);
    }
}

fn precondition(pc: Option<&dyn Preconditioner>, r: &[f64], z: &mut [f64]) -> Result<(), StokesError> {
    match pc {
        Some(pc) => pc.apply(r, z),
        None => {
            z.copy_from_slice(r);
            Ok(())
        }
    }
}

impl<M: MatVec + Indexing + ?Sized> LinearSolver<M> for PcgSolver {
    fn solve(&mut self, a: &M, pc: Option<&dyn Preconditioner>, b: &[f64], x: &mut [f64]) -> Result<SolveStats, StokesError> {
        let n = b.len();
        check_dim("CG operator rows", a.nrows(), n)?;
        check_dim("CG operator columns", a.ncols(), n)?;
        check_dim("CG solution vector", n, x.len())?;

        let mut r = vec![0.0; n];
        a.matvec(x, &mut r);
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let mut z = vec![0.0; n];
        precondition(pc, &r, &mut z)?;
        let mut rz = self.ip.dot(&r, &z);
        let rnorm0 = self.residual_norm(&r, &z, rz);
        self.record(0, rnorm0);

        let mut stats = SolveStats { iterations: 0, initial_residual: rnorm0, final_residual: rnorm0, reason: ConvergedReason::Iterating };
        stats.reason = self.conv.test(0, rnorm0, rnorm0);
        if stats.reason != ConvergedReason::Iterating {
            return Ok(stats);
        }
        if rz < 0.0 {
            stats.reason = ConvergedReason::DivergedIndefinitePc;
            return Ok(stats);
        }

        let mut p = z.clone();
        let mut ap = vec![0.0; n];
        for it in 1..=self.conv.max_iters() {
            a.matvec(&p, &mut ap);
            let p_ap = self.ip.dot(&p, &ap);
            if !(p_ap > 0.0) {
                stats.iterations = it - 1;
                stats.reason = if p_ap.is_nan() {
                    ConvergedReason::DivergedNanOrInf
                } else if rz == 0.0 {
                    // r is already zero in the M-inner product
                    ConvergedReason::ConvergedHappyBreakdown
                } else {
                    ConvergedReason::DivergedIndefiniteMat
                };
                return Ok(stats);
            }
            let alpha = rz / p_ap;
            vector::axpy(alpha, &p, x);
            vector::axpy(-alpha, &ap, &mut r);
            precondition(pc, &r, &mut z)?;
            let rz_new = self.ip.dot(&r, &z);
            let rnorm = self.residual_norm(&r, &z, rz_new);
            self.record(it, rnorm);
            stats.iterations = it;
            stats.final_residual = rnorm;
            stats.reason = self.conv.test(it, rnorm, rnorm0);
            if stats.reason != ConvergedReason::Iterating {
                return Ok(stats);
            }
            if rz_new < 0.0 {
                stats.reason = ConvergedReason::DivergedIndefinitePc;
                return Ok(stats);
            }
            let beta = rz_new / rz;
            vector::aypx(beta, &z, &mut p);
            rz = rz_new;
        }
        stats.reason = ConvergedReason::DivergedIts;
        Ok(stats)
    }
}

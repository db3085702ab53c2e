//! Flexible GMRES (FGMRES) solver (Saad §9.4)
//!
//! Right-preconditioned restarted GMRES that stores the preconditioned
//! directions z_j = M⁻¹v_j explicitly, so the preconditioner may change
//! from one iteration to the next. That is the case for a multigrid cycle
//! whose smoothing count is raised while the solve runs.
//!
//! Arnoldi uses modified Gram-Schmidt; the least-squares problem is updated
//! with Givens rotations so the residual norm is available every iteration
//! without forming x.

use crate::core::traits::{Indexing, InnerProduct, MatVec};
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::parallel::Reduction;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{ConvergedReason, Convergence, ConvergenceTest, SolveStats};
use tracing::debug;

/// Flexible GMRES solver struct.
pub struct FgmresSolver {
    /// Convergence criteria
    pub conv: Box<dyn ConvergenceTest>,
    /// Restart parameter (number of Arnoldi vectors before restart)
    pub restart: usize,
    /// Happy breakdown tolerance, relative to the norm of the new direction
    pub haptol: f64,
    /// Optional callback to monitor residuals during solve
    pub monitor: Option<Box<dyn FnMut(usize, f64)>>,
    /// History of residual norms for each iteration
    pub residual_history: Vec<f64>,
    pub trace: Option<&'static str>,
    ip: Reduction,
}

impl FgmresSolver {
    pub fn new(rtol: f64, max_iters: usize, restart: usize) -> Self {
        Self {
            conv: Box::new(Convergence::new(rtol, max_iters)),
            restart: restart.max(1),
            haptol: 1e-12,
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
    pub fn with_haptol(mut self, haptol: f64) -> Self {
        self.haptol = haptol;
        self
    }
    /// Set a callback to monitor residuals during the solve.
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
    pub fn take_monitor(&mut self) -> Option<Box<dyn FnMut(usize, f64)>> {
        self.monitor.take()
    }

    fn record(&mut self, it: usize, rnorm: f64) {
        if let Some(label) = self.trace {
            debug!(solver = label, it, rnorm, "fgmres");
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor(it, rnorm);
        }
        self.residual_history.push(rnorm);
    }
}

/// r = b − A x; returns ‖r‖.
fn residual<M: MatVec + ?Sized>(a: &M, b: &[f64], x: &[f64], r: &mut [f64], ip: &Reduction) -> f64 {
    a.matvec(x, r);
    for (ri, &bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
    ip.norm(r)
}

/// x += Z y where H[..k, ..k] y = g[..k] (upper triangular).
fn update_solution(h: &[Vec<f64>], g: &[f64], z_basis: &[Vec<f64>], k: usize, x: &mut [f64]) {
    let mut y = vec![0.0; k];
    for i in (0..k).rev() {
        let mut s = g[i];
        for j in (i + 1)..k {
            s -= h[i][j] * y[j];
        }
        y[i] = s / h[i][i];
    }
    for (zj, &yj) in z_basis.iter().zip(&y) {
        vector::axpy(yj, zj, x);
    }
}

impl<M: MatVec + Indexing + ?Sized> LinearSolver<M> for FgmresSolver {
    fn solve(&mut self, a: &M, pc: Option<&dyn Preconditioner>, b: &[f64], x: &mut [f64]) -> Result<SolveStats, StokesError> {
        let n = b.len();
        check_dim("FGMRES operator rows", a.nrows(), n)?;
        check_dim("FGMRES operator columns", a.ncols(), n)?;
        check_dim("FGMRES solution vector", n, x.len())?;
        let m = self.restart;
        let max_iters = self.conv.max_iters();

        let mut r = vec![0.0; n];
        let mut beta = residual(a, b, x, &mut r, &self.ip);
        let rnorm0 = beta;
        self.record(0, rnorm0);
        let mut stats = SolveStats {
            iterations: 0,
            initial_residual: rnorm0,
            final_residual: rnorm0,
            reason: self.conv.test(0, rnorm0, rnorm0),
        };
        if stats.reason != ConvergedReason::Iterating {
            return Ok(stats);
        }

        let mut v_basis = vec![vec![0.0; n]; m + 1];
        let mut z_basis = vec![vec![0.0; n]; m];
        let mut h = vec![vec![0.0; m]; m + 1];
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];
        let mut g = vec![0.0; m + 1];
        let mut w = vec![0.0; n];
        let mut total = 0;

        while total < max_iters {
            g.iter_mut().for_each(|v| *v = 0.0);
            g[0] = beta;
            for (vi, &ri) in v_basis[0].iter_mut().zip(&r) {
                *vi = ri / beta;
            }
            let mut k = 0;
            let mut done = false;
            while k < m && total < max_iters {
                match pc {
                    Some(pc) => pc.apply(&v_basis[k], &mut z_basis[k])?,
                    None => z_basis[k].copy_from_slice(&v_basis[k]),
                }
                a.matvec(&z_basis[k], &mut w);
                let wnorm = self.ip.norm(&w);
                for i in 0..=k {
                    let hik = self.ip.dot(&w, &v_basis[i]);
                    h[i][k] = hik;
                    vector::axpy(-hik, &v_basis[i], &mut w);
                }
                let hnext = self.ip.norm(&w);
                let happy = hnext <= self.haptol * wnorm.max(f64::MIN_POSITIVE);
                if !happy {
                    for (vi, &wi) in v_basis[k + 1].iter_mut().zip(&w) {
                        *vi = wi / hnext;
                    }
                }
                // previous rotations, then a new one zeroing h[k+1][k]
                for i in 0..k {
                    let t = cs[i] * h[i][k] + sn[i] * h[i + 1][k];
                    h[i + 1][k] = -sn[i] * h[i][k] + cs[i] * h[i + 1][k];
                    h[i][k] = t;
                }
                let denom = h[k][k].hypot(hnext);
                if denom == 0.0 {
                    stats.reason = ConvergedReason::DivergedBreakdown;
                    update_solution(&h, &g, &z_basis, k, x);
                    return Ok(stats);
                }
                cs[k] = h[k][k] / denom;
                sn[k] = hnext / denom;
                h[k][k] = denom;
                g[k + 1] = -sn[k] * g[k];
                g[k] *= cs[k];

                k += 1;
                total += 1;
                let rnorm = g[k].abs();
                self.record(total, rnorm);
                stats.iterations = total;
                stats.final_residual = rnorm;
                stats.reason = self.conv.test(total, rnorm, rnorm0);
                if happy && !stats.reason.is_diverged() {
                    stats.reason = ConvergedReason::ConvergedHappyBreakdown;
                }
                if stats.reason != ConvergedReason::Iterating {
                    done = true;
                    break;
                }
            }
            update_solution(&h, &g, &z_basis, k, x);
            if done {
                return Ok(stats);
            }
            // restart from the true residual
            beta = residual(a, b, x, &mut r, &self.ip);
            if beta == 0.0 {
                stats.final_residual = 0.0;
                stats.reason = ConvergedReason::ConvergedAtol;
                return Ok(stats);
            }
        }
        stats.reason = ConvergedReason::DivergedIts;
        Ok(stats)
    }
}

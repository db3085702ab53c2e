//! Smoothed-aggregation algebraic multigrid, applied as one V-cycle.
//!
//! Setup builds a hierarchy by greedy aggregation on the strength graph
//! |a_ij| ≥ θ·sqrt(|a_ii a_jj|), a piecewise-constant tentative prolongation
//! smoothed once with damped Jacobi, and Galerkin coarse operators
//! A_c = Pᵗ A P. The coarsest level is solved exactly with faer's LU.
//!
//! The smoothing count per cycle is either fixed (`nu_pre`, `nu_post`) or
//! read from a [`SharedSchedule`] that a Krylov monitor adjusts while the
//! outer solve runs.

use crate::config::{MgOptions, MgSmoother};
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use crate::preconditioner::mg_smoothing::SharedSchedule;
use crate::preconditioner::sor::{self, MatSorType};
use crate::solver::LuSolver;
use tracing::debug;

const UNASSIGNED: usize = usize::MAX;

struct Level {
    a: CsrMatrix,
    p: CsrMatrix,
    r: CsrMatrix,
    inv_diag: Vec<f64>,
}

pub struct Amg {
    opts: MgOptions,
    levels: Vec<Level>,
    coarse: LuSolver,
    coarse_n: usize,
    schedule: Option<SharedSchedule>,
}

impl Amg {
    pub fn new(opts: MgOptions) -> Self {
        Self { opts, levels: Vec::new(), coarse: LuSolver::new(), coarse_n: 0, schedule: None }
    }

    pub fn with_schedule(mut self, schedule: SharedSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Levels including the coarse one.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.a.nrows()).chain(std::iter::once(self.coarse_n)).collect()
    }

    fn smoother_diag(&self, a: &CsrMatrix) -> Result<Vec<f64>, StokesError> {
        match self.opts.smoother {
            MgSmoother::Sor => sor::shifted_inv_diag(a, 0.0),
            MgSmoother::Jacobi => {
                let mut d = a.diagonal();
                vector::reciprocal(&mut d);
                Ok(d)
            }
        }
    }

    fn smooth(&self, level: &Level, b: &[f64], x: &mut [f64], sweeps: usize, sweep: MatSorType) {
        match self.opts.smoother {
            MgSmoother::Sor => {
                for _ in 0..sweeps {
                    sor::relax(&level.a, &level.inv_diag, self.opts.sor_omega, sweep, b, x);
                }
            }
            MgSmoother::Jacobi => {
                let mut r = vec![0.0; x.len()];
                for _ in 0..sweeps {
                    level.a.spmv(x, &mut r);
                    for ((xi, &bi), (&ri, &di)) in x.iter_mut().zip(b).zip(r.iter().zip(&level.inv_diag)) {
                        *xi += self.opts.jacobi_omega * di * (bi - ri);
                    }
                }
            }
        }
    }

    fn cycle(&self, lvl: usize, b: &[f64], x: &mut [f64], pre: usize, post: usize) -> Result<(), StokesError> {
        let Some(level) = self.levels.get(lvl) else {
            return self.coarse.solve_cached(b, x);
        };
        x.fill(0.0);
        // forward sweeps down, backward sweeps up: the cycle stays symmetric
        self.smooth(level, b, x, pre, MatSorType::FORWARD_SWEEP);
        let mut r = vec![0.0; b.len()];
        level.a.spmv(x, &mut r);
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let mut rc = vec![0.0; level.r.nrows()];
        level.r.spmv(&r, &mut rc);
        let mut xc = vec![0.0; rc.len()];
        self.cycle(lvl + 1, &rc, &mut xc, pre, post)?;
        let mut correction = vec![0.0; x.len()];
        level.p.spmv(&xc, &mut correction);
        vector::axpy(1.0, &correction, x);
        self.smooth(level, b, x, post, MatSorType::BACKWARD_SWEEP);
        Ok(())
    }
}

/// Strong off-diagonal neighbours of every row.
fn strength_graph(a: &CsrMatrix, theta: f64) -> Vec<Vec<usize>> {
    let diag = a.diagonal();
    (0..a.nrows())
        .map(|i| {
            let (cols, vals) = a.row(i);
            cols.iter()
                .zip(vals)
                .filter(|&(&j, &v)| j != i && v != 0.0 && v.abs() >= theta * (diag[i] * diag[j]).abs().sqrt())
                .map(|(&j, _)| j)
                .collect()
        })
        .collect()
}

/// Three-pass greedy aggregation; returns the aggregate of every node and
/// the number of aggregates.
fn aggregate(strong: &[Vec<usize>]) -> (Vec<usize>, usize) {
    let n = strong.len();
    let mut agg = vec![UNASSIGNED; n];
    let mut count = 0;
    // 1: roots whose whole neighbourhood is free
    for i in 0..n {
        if agg[i] == UNASSIGNED && strong[i].iter().all(|&j| agg[j] == UNASSIGNED) {
            agg[i] = count;
            for &j in &strong[i] {
                agg[j] = count;
            }
            count += 1;
        }
    }
    // 2: attach leftovers to a neighbouring aggregate
    let pass1 = agg.clone();
    for i in 0..n {
        if agg[i] == UNASSIGNED {
            if let Some(&j) = strong[i].iter().find(|&&j| pass1[j] != UNASSIGNED) {
                agg[i] = pass1[j];
            }
        }
    }
    // 3: whatever is left forms its own aggregates
    for i in 0..n {
        if agg[i] == UNASSIGNED {
            agg[i] = count;
            for &j in &strong[i] {
                if agg[j] == UNASSIGNED {
                    agg[j] = count;
                }
            }
            count += 1;
        }
    }
    (agg, count)
}

/// Piecewise-constant prolongation with unit-norm columns.
fn tentative_prolongation(agg: &[usize], n_agg: usize) -> Result<CsrMatrix, StokesError> {
    let mut sizes = vec![0usize; n_agg];
    for &g in agg {
        sizes[g] += 1;
    }
    let triplets: Vec<(usize, usize, f64)> =
        agg.iter().enumerate().map(|(i, &g)| (i, g, 1.0 / (sizes[g] as f64).sqrt())).collect();
    CsrMatrix::from_triplets(agg.len(), n_agg, &triplets)
}

impl Preconditioner for Amg {
    fn setup(&mut self, a: &CsrMatrix) -> Result<(), StokesError> {
        if !a.is_square() {
            return Err(StokesError::Unsupported("AMG requires a square matrix"));
        }
        self.levels.clear();
        let mut current = a.clone();
        while self.levels.len() + 1 < self.opts.max_levels && current.nrows() > self.opts.coarse_size {
            let strong = strength_graph(&current, self.opts.strength_threshold);
            let (agg, n_agg) = aggregate(&strong);
            if n_agg == 0 || n_agg >= current.nrows() {
                break;
            }
            let p0 = tentative_prolongation(&agg, n_agg)?;
            // P = (I − ω D⁻¹ A) P0
            let mut jacobi = current.diagonal();
            vector::reciprocal(&mut jacobi);
            vector::scale(self.opts.prolongation_omega, &mut jacobi);
            let mut ap0 = current.matmul(&p0)?;
            ap0.scale_rows(&jacobi)?;
            let p = p0.add_scaled(-1.0, &ap0)?;
            let r = p.transpose();
            let coarse = r.matmul(&current)?.matmul(&p)?;
            let inv_diag = self.smoother_diag(&current)?;
            self.levels.push(Level { a: current, p, r, inv_diag });
            current = coarse;
        }
        self.coarse_n = current.nrows();
        self.coarse.factor_csr(&current)?;
        debug!(levels = self.num_levels(), sizes = ?self.level_sizes(), "AMG hierarchy");
        Ok(())
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), StokesError> {
        let n = self.levels.first().map_or(self.coarse_n, |l| l.a.nrows());
        check_dim("AMG apply", n, r.len())?;
        if !self.coarse.is_factored() {
            return Err(StokesError::InvalidState("AMG applied before setup"));
        }
        let (pre, post) = match &self.schedule {
            Some(shared) => {
                let current = shared
                    .lock()
                    .map(|s| s.current)
                    .map_err(|_| StokesError::InvalidState("smoothing schedule lock poisoned"))?;
                (current, current)
            }
            None => (self.opts.nu_pre, self.opts.nu_post),
        };
        self.cycle(0, r, z, pre, post)?;
        if let Some(shared) = &self.schedule {
            if let Ok(mut s) = shared.lock() {
                s.record_cycle(pre + post);
            }
        }
        Ok(())
    }
}

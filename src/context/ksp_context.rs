//! Factory for Krylov Subspace Methods (KSP).
//!
//! A `KspContext` bundles a Krylov method, its preconditioner and its
//! tolerances, builds a fresh solver for every `solve` call and keeps
//! cumulative statistics across calls. The same context serves every velocity
//! solve performed inside one outer iteration, so the totals it reports are
//! what the BSSCR summary prints.

use crate::config::{KspOptions, KspType};
use crate::core::traits::{Indexing, MatVec};
use crate::error::StokesError;
use crate::parallel::Reduction;
use crate::preconditioner::Preconditioner;
use crate::solver::{FgmresSolver, LinearSolver, PcgSolver};
use crate::utils::convergence::{Convergence, ConvergenceTest, MinIterations, SolveStats};

pub type Monitor = Box<dyn FnMut(usize, f64)>;

/// Context and configuration for a Krylov subspace solver.
pub struct KspContext {
    pub kind: KspType,
    pc: Box<dyn Preconditioner>,
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub max_it: usize,
    /// Restart parameter (FGMRES)
    pub restart: usize,
    /// Minimum iterations before convergence is accepted.
    pub min_its: usize,
    /// Label used for per-iteration debug events; `None` keeps quiet.
    trace: Option<&'static str>,
    monitor: Option<Monitor>,
    ip: Reduction,
    total_iterations: usize,
    solves: usize,
    last_stats: Option<SolveStats>,
}

impl KspContext {
    pub fn new(kind: KspType, pc: Box<dyn Preconditioner>, rtol: f64, max_it: usize) -> Self {
        Self {
            kind,
            pc,
            rtol,
            atol: 1e-50,
            dtol: 1e5,
            max_it,
            restart: 30,
            min_its: 0,
            trace: None,
            monitor: None,
            ip: Reduction::default(),
            total_iterations: 0,
            solves: 0,
            last_stats: None,
        }
    }

    pub fn from_options(opts: &KspOptions, pc: Box<dyn Preconditioner>, label: &'static str) -> Self {
        let mut ksp = Self::new(opts.ksp_type, pc, opts.rtol, opts.max_it);
        ksp.atol = opts.atol;
        ksp.dtol = opts.dtol;
        ksp.restart = opts.restart;
        if opts.monitor {
            ksp.trace = Some(label);
        }
        ksp
    }

    pub fn with_min_its(mut self, min_its: usize) -> Self {
        self.min_its = min_its;
        self
    }

    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, f64) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }

    pub fn with_reduction(mut self, ip: Reduction) -> Self {
        self.ip = ip;
        self
    }

    pub fn preconditioner(&self) -> &dyn Preconditioner {
        self.pc.as_ref()
    }

    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn solves(&self) -> usize {
        self.solves
    }

    pub fn last_stats(&self) -> Option<&SolveStats> {
        self.last_stats.as_ref()
    }

    fn convergence_test(&self) -> Box<dyn ConvergenceTest> {
        let conv = Convergence::new(self.rtol, self.max_it).with_atol(self.atol).with_dtol(self.dtol);
        if self.min_its > 0 {
            Box::new(MinIterations::new(conv, self.min_its))
        } else {
            Box::new(conv)
        }
    }

    /// Solve `A x = b` using the configured solver and preconditioner; `x`
    /// holds the initial guess on entry.
    pub fn solve<M: MatVec + Indexing + ?Sized>(&mut self, a: &M, b: &[f64], x: &mut [f64]) -> Result<SolveStats, StokesError> {
        let conv = self.convergence_test();
        let monitor = self.monitor.take();
        let pc = Some(self.pc.as_ref());
        let (result, monitor) = match self.kind {
            KspType::Cg => {
                let mut solver = PcgSolver::new(self.rtol, self.max_it)
                    .with_convergence_test(conv)
                    .with_boxed_monitor(monitor)
                    .with_reduction(self.ip.clone());
                solver.trace = self.trace;
                let result = solver.solve(a, pc, b, x);
                (result, solver.take_monitor())
            }
            KspType::Fgmres => {
                let mut solver = FgmresSolver::new(self.rtol, self.max_it, self.restart)
                    .with_convergence_test(conv)
                    .with_boxed_monitor(monitor)
                    .with_reduction(self.ip.clone());
                solver.trace = self.trace;
                let result = solver.solve(a, pc, b, x);
                (result, solver.take_monitor())
            }
        };
        self.monitor = monitor;
        let stats = result?;
        self.total_iterations += stats.iterations;
        self.solves += 1;
        self.last_stats = Some(stats.clone());
        Ok(stats)
    }
}

impl std::fmt::Debug for KspContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KspContext")
            .field("kind", &self.kind)
            .field("rtol", &self.rtol)
            .field("max_it", &self.max_it)
            .field("min_its", &self.min_its)
            .field("total_iterations", &self.total_iterations)
            .field("solves", &self.solves)
            .finish()
    }
}

//! Convergence tracking & tolerance checks for iterative solvers.
//!
//! A [`ConvergenceTest`] maps `(iteration, ‖r‖, ‖r₀‖)` to a
//! [`ConvergedReason`]. Tests compose by wrapping: [`MinIterations`] keeps a
//! solve going until a floor is reached no matter what the wrapped test says.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an iteration stopped (or that it has not).
///
/// Positive codes are convergence, negative codes divergence, zero means
/// still iterating; `code()` follows that convention for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergedReason {
    Iterating,
    ConvergedRtol,
    ConvergedAtol,
    ConvergedHappyBreakdown,
    DivergedIts,
    DivergedDtol,
    DivergedBreakdown,
    DivergedIndefiniteMat,
    DivergedIndefinitePc,
    DivergedNanOrInf,
}

impl ConvergedReason {
    pub fn is_converged(self) -> bool {
        self.code() > 0
    }

    pub fn is_diverged(self) -> bool {
        self.code() < 0
    }

    pub fn code(self) -> i32 {
        match self {
            ConvergedReason::Iterating => 0,
            ConvergedReason::ConvergedRtol => 2,
            ConvergedReason::ConvergedAtol => 3,
            ConvergedReason::ConvergedHappyBreakdown => 5,
            ConvergedReason::DivergedIts => -3,
            ConvergedReason::DivergedDtol => -4,
            ConvergedReason::DivergedBreakdown => -5,
            ConvergedReason::DivergedIndefinitePc => -8,
            ConvergedReason::DivergedNanOrInf => -9,
            ConvergedReason::DivergedIndefiniteMat => -10,
        }
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvergedReason::Iterating => "CONVERGED_ITERATING",
            ConvergedReason::ConvergedRtol => "CONVERGED_RTOL",
            ConvergedReason::ConvergedAtol => "CONVERGED_ATOL",
            ConvergedReason::ConvergedHappyBreakdown => "CONVERGED_HAPPY_BREAKDOWN",
            ConvergedReason::DivergedIts => "DIVERGED_ITS",
            ConvergedReason::DivergedDtol => "DIVERGED_DTOL",
            ConvergedReason::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            ConvergedReason::DivergedIndefiniteMat => "DIVERGED_INDEFINITE_MAT",
            ConvergedReason::DivergedIndefinitePc => "DIVERGED_INDEFINITE_PC",
            ConvergedReason::DivergedNanOrInf => "DIVERGED_NANORINF",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Stopping predicate consulted once per iteration.
pub trait ConvergenceTest {
    fn test(&self, iteration: usize, rnorm: f64, rnorm0: f64) -> ConvergedReason;
    fn max_iters(&self) -> usize;
}

/// Relative / absolute / divergence tolerances and an iteration cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub max_iters: usize,
}

impl Convergence {
    pub fn new(rtol: f64, max_iters: usize) -> Self {
        Self { rtol, atol: 1e-50, dtol: 1e5, max_iters }
    }
    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }
    pub fn with_dtol(mut self, dtol: f64) -> Self {
        self.dtol = dtol;
        self
    }
}

impl ConvergenceTest for Convergence {
    fn test(&self, iteration: usize, rnorm: f64, rnorm0: f64) -> ConvergedReason {
        if !rnorm.is_finite() {
            return ConvergedReason::DivergedNanOrInf;
        }
        if rnorm <= self.atol {
            return ConvergedReason::ConvergedAtol;
        }
        if rnorm <= self.rtol * rnorm0 {
            return ConvergedReason::ConvergedRtol;
        }
        if rnorm0 > 0.0 && rnorm >= self.dtol * rnorm0 {
            return ConvergedReason::DivergedDtol;
        }
        if iteration >= self.max_iters {
            return ConvergedReason::DivergedIts;
        }
        ConvergedReason::Iterating
    }

    fn max_iters(&self) -> usize {
        self.max_iters
    }
}

/// Reports "iterating" below a floor of `min_its` even when the wrapped test
/// would declare convergence. The iteration cap is raised to the floor; any
/// other divergence passes through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct MinIterations<C> {
    inner: C,
    min_its: usize,
}

impl<C: ConvergenceTest> MinIterations<C> {
    pub fn new(inner: C, min_its: usize) -> Self {
        Self { inner, min_its }
    }

    pub fn min_its(&self) -> usize {
        self.min_its
    }
}

impl<C: ConvergenceTest> ConvergenceTest for MinIterations<C> {
    fn test(&self, iteration: usize, rnorm: f64, rnorm0: f64) -> ConvergedReason {
        let reason = self.inner.test(iteration, rnorm, rnorm0);
        let held = reason.is_converged() || reason == ConvergedReason::DivergedIts;
        if iteration < self.min_its && held {
            ConvergedReason::Iterating
        } else {
            reason
        }
    }

    fn max_iters(&self) -> usize {
        self.inner.max_iters().max(self.min_its)
    }
}

impl<T: ConvergenceTest + ?Sized> ConvergenceTest for Box<T> {
    fn test(&self, iteration: usize, rnorm: f64, rnorm0: f64) -> ConvergedReason {
        (**self).test(iteration, rnorm, rnorm0)
    }
    fn max_iters(&self) -> usize {
        (**self).max_iters()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub reason: ConvergedReason,
}

impl SolveStats {
    pub fn converged(&self) -> bool {
        self.reason.is_converged()
    }
}

//! The pressure Schur complement S = D·K⁻¹·G − C as an implicit operator.
//!
//! Every product with S performs one inner velocity solve. The velocity
//! solver is owned by the operator; since `MatVec::matvec` takes `&self`,
//! it sits in a `RefCell` and the per-product bookkeeping in `Cell`s.
//!
//! `matvec` cannot return an error. A hard failure of the inner solve is
//! parked in the operator, the output is filled with NaN so the outer Krylov
//! method stops with `DivergedNanOrInf`, and the caller collects the error
//! with [`SchurComplement::take_error`].

use crate::context::KspContext;
use crate::core::traits::{Indexing, MatVec};
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::CsrMatrix;
use crate::utils::convergence::{ConvergedReason, SolveStats};
use std::cell::{Cell, RefCell};
use tracing::warn;

pub struct SchurComplement<'a> {
    k: &'a CsrMatrix,
    g: &'a CsrMatrix,
    d: &'a CsrMatrix,
    c: Option<&'a CsrMatrix>,
    velocity: RefCell<KspContext>,
    products: Cell<usize>,
    inner_iterations: Cell<usize>,
    first_failure: Cell<Option<ConvergedReason>>,
    error: RefCell<Option<StokesError>>,
}

impl<'a> SchurComplement<'a> {
    pub fn new(
        k: &'a CsrMatrix,
        g: &'a CsrMatrix,
        d: &'a CsrMatrix,
        c: Option<&'a CsrMatrix>,
        velocity: KspContext,
    ) -> Result<Self, StokesError> {
        let n = k.nrows();
        let m = g.ncols();
        check_dim("Schur: K columns", n, k.ncols())?;
        check_dim("Schur: G rows", n, g.nrows())?;
        check_dim("Schur: D rows", m, d.nrows())?;
        check_dim("Schur: D columns", n, d.ncols())?;
        if let Some(c) = c {
            check_dim("Schur: C rows", m, c.nrows())?;
            check_dim("Schur: C columns", m, c.ncols())?;
        }
        Ok(Self {
            k,
            g,
            d,
            c,
            velocity: RefCell::new(velocity),
            products: Cell::new(0),
            inner_iterations: Cell::new(0),
            first_failure: Cell::new(None),
            error: RefCell::new(None),
        })
    }

    pub fn pressure_dim(&self) -> usize {
        self.g.ncols()
    }

    /// K x = b with the owned velocity solver (x is the initial guess).
    pub fn solve_velocity(&self, b: &[f64], x: &mut [f64]) -> Result<SolveStats, StokesError> {
        self.velocity.borrow_mut().solve(self.k, b, x)
    }

    /// Number of products with S so far.
    pub fn products(&self) -> usize {
        self.products.get()
    }

    /// Velocity iterations spent inside products with S.
    pub fn inner_iterations(&self) -> usize {
        self.inner_iterations.get()
    }

    /// Reason of the first inner solve that did not converge.
    pub fn first_failure(&self) -> Option<ConvergedReason> {
        self.first_failure.get()
    }

    pub fn take_error(&self) -> Option<StokesError> {
        self.error.borrow_mut().take()
    }

    /// Velocity iterations over every solve of the owned solver.
    pub fn velocity_iterations(&self) -> usize {
        self.velocity.borrow().total_iterations()
    }

    pub fn into_velocity_solver(self) -> KspContext {
        self.velocity.into_inner()
    }
}

impl Indexing for SchurComplement<'_> {
    fn nrows(&self) -> usize {
        self.g.ncols()
    }
}

impl MatVec for SchurComplement<'_> {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        let n = self.k.nrows();
        let mut gx = vec![0.0; n];
        self.g.spmv(x, &mut gx);
        let mut w = vec![0.0; n];
        match self.velocity.borrow_mut().solve(self.k, &gx, &mut w) {
            Ok(stats) => {
                self.inner_iterations.set(self.inner_iterations.get() + stats.iterations);
                if !stats.converged() {
                    warn!(reason = %stats.reason, iterations = stats.iterations, "inner velocity solve did not converge");
                    if self.first_failure.get().is_none() {
                        self.first_failure.set(Some(stats.reason));
                    }
                }
            }
            Err(e) => {
                self.error.borrow_mut().get_or_insert(e);
                y.fill(f64::NAN);
                return;
            }
        }
        self.products.set(self.products.get() + 1);
        self.d.spmv(&w, y);
        if let Some(c) = self.c {
            let mut cx = vec![0.0; x.len()];
            c.spmv(x, &mut cx);
            vector::axpy(-1.0, &cx, y);
        }
    }
}

/// Ŝ = D·diag(K)⁻¹·G − C, a sparse stand-in for S.
pub fn approximate_schur(k: &CsrMatrix, g: &CsrMatrix, d: &CsrMatrix, c: Option<&CsrMatrix>) -> Result<CsrMatrix, StokesError> {
    let mut inv_diag = k.diagonal();
    vector::reciprocal(&mut inv_diag);
    let mut kg = g.clone();
    kg.scale_rows(&inv_diag)?;
    let s = d.matmul(&kg)?;
    match c {
        Some(c) => s.add_scaled(-1.0, c),
        None => Ok(s),
    }
}

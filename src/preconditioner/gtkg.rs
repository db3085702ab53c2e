//! Weighted Gᵗ K G preconditioner for the pressure Schur complement.
//!
//! Approximates S⁻¹ = (D K⁻¹ G − C)⁻¹ by
//!
//! ```text
//! (GᵗWG)⁻¹ · (GᵗW K W G − C) · (GᵗWG)⁻¹
//! ```
//!
//! where W is either the identity or the inverse lumped velocity mass and the
//! C term is dropped when the pressure block is absent. Both
//! Gram solves are done iteratively with an inner `KspContext` owned by the
//! preconditioner. When the Gram matrix annihilates the constant vector the
//! constant pressure mode is projected out before and after every solve.
//!
//! Lifecycle: `set_operators` → (`attach_null_space`) → `set_up` → `apply`.

use crate::config::{GtkgOptions, MgOptions};
use crate::context::{KspContext, build_preconditioner};
use crate::core::traits::InnerProduct;
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use std::cell::{Cell, RefCell};
use tracing::{debug, info, warn};

/// Relative threshold of the constant-vector probe on the Gram matrix.
const CONSTANT_PROBE_TOL: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtkgState {
    Uninitialized,
    OperatorsSet,
    SetUp,
}

pub struct GtkgPc<'a> {
    opts: GtkgOptions,
    state: GtkgState,
    k: Option<&'a CsrMatrix>,
    g: Option<&'a CsrMatrix>,
    c: Option<&'a CsrMatrix>,
    weight: Option<Vec<f64>>,
    gram: Option<CsrMatrix>,
    gram_ksp: Option<RefCell<KspContext>>,
    null_space: Vec<Vec<f64>>,
    inner_iterations: Cell<usize>,
    inner_failures: Cell<usize>,
    applications: Cell<usize>,
}

impl<'a> GtkgPc<'a> {
    pub fn new(opts: GtkgOptions) -> Self {
        Self {
            opts,
            state: GtkgState::Uninitialized,
            k: None,
            g: None,
            c: None,
            weight: None,
            gram: None,
            gram_ksp: None,
            null_space: Vec::new(),
            inner_iterations: Cell::new(0),
            inner_failures: Cell::new(0),
            applications: Cell::new(0),
        }
    }

    pub fn state(&self) -> GtkgState {
        self.state
    }

    /// `weight` is the diagonal of W (length n); `None` means W = I.
    /// `c` is the pressure block, subtracted from the middle product.
    pub fn set_operators(
        &mut self,
        k: &'a CsrMatrix,
        g: &'a CsrMatrix,
        c: Option<&'a CsrMatrix>,
        weight: Option<&[f64]>,
    ) -> Result<(), StokesError> {
        check_dim("GtKG K (square)", k.nrows(), k.ncols())?;
        check_dim("GtKG G rows", k.nrows(), g.nrows())?;
        if let Some(c) = c {
            check_dim("GtKG C rows", g.ncols(), c.nrows())?;
            check_dim("GtKG C columns", g.ncols(), c.ncols())?;
        }
        if let Some(w) = weight {
            check_dim("GtKG weight", k.nrows(), w.len())?;
        }
        self.k = Some(k);
        self.g = Some(g);
        self.c = c;
        self.weight = weight.map(<[f64]>::to_vec);
        self.gram = None;
        self.gram_ksp = None;
        self.state = GtkgState::OperatorsSet;
        Ok(())
    }

    /// Pressure null-space vectors to project out; replaces the probe result.
    pub fn attach_null_space(&mut self, vectors: Vec<Vec<f64>>) -> Result<(), StokesError> {
        let g = self.g.ok_or(StokesError::InvalidState("GtKG null space attached before operators"))?;
        for v in &vectors {
            check_dim("GtKG null-space vector", g.ncols(), v.len())?;
        }
        self.null_space = vectors;
        Ok(())
    }

    pub fn set_up(&mut self) -> Result<(), StokesError> {
        let g = self.g.ok_or(StokesError::InvalidState("GtKG set up before operators"))?;
        let mut wg = g.clone();
        if let Some(w) = &self.weight {
            wg.scale_rows(w)?;
        }
        let gram = g.transpose().matmul(&wg)?;
        let pc = build_preconditioner(self.opts.gram.pc_type, &gram, &MgOptions::default(), None)?;
        let ksp = KspContext::from_options(&self.opts.gram, pc, "gtkg-gram");

        if self.null_space.is_empty() && gram.nrows() > 0 {
            let m = gram.nrows();
            let one = vec![1.0 / (m as f64).sqrt(); m];
            let mut g1 = vec![0.0; m];
            gram.spmv(&one, &mut g1);
            let residual = ().norm(&g1);
            if residual < CONSTANT_PROBE_TOL * gram.norm_inf().max(1.0) {
                debug!(residual, "GtKG: Gram matrix has a constant null space");
                self.null_space.push(one);
            }
        }
        self.gram = Some(gram);
        self.gram_ksp = Some(RefCell::new(ksp));
        self.state = GtkgState::SetUp;
        Ok(())
    }

    pub fn null_space(&self) -> &[Vec<f64>] {
        &self.null_space
    }

    /// Gram-solve iterations over all applications.
    pub fn inner_iterations(&self) -> usize {
        self.inner_iterations.get()
    }

    /// Gram solves that did not converge.
    pub fn inner_failures(&self) -> usize {
        self.inner_failures.get()
    }

    /// Applications in either direction.
    pub fn applications(&self) -> usize {
        self.applications.get()
    }

    fn project(&self, x: &mut [f64]) {
        for nv in &self.null_space {
            let nn = ().dot(nv, nv);
            if nn > 0.0 {
                vector::axpy(-().dot(nv, x) / nn, nv, x);
            }
        }
    }

    fn gram_solve(&self, b: &[f64], x: &mut [f64]) -> Result<usize, StokesError> {
        let (Some(gram), Some(ksp)) = (self.gram.as_ref(), self.gram_ksp.as_ref()) else {
            return Err(StokesError::InvalidState("GtKG applied before set-up"));
        };
        x.fill(0.0);
        let stats = ksp.borrow_mut().solve(gram, b, x)?;
        self.inner_iterations.set(self.inner_iterations.get() + stats.iterations);
        if !stats.converged() {
            self.inner_failures.set(self.inner_failures.get() + 1);
            warn!(reason = %stats.reason, iterations = stats.iterations, "GtKG Gram solve did not converge");
        }
        Ok(stats.iterations)
    }

    fn apply_impl(&self, x: &[f64], y: &mut [f64], transpose: bool) -> Result<(), StokesError> {
        if self.state != GtkgState::SetUp {
            return Err(StokesError::InvalidState("GtKG applied before set-up"));
        }
        let (Some(k), Some(g)) = (self.k, self.g) else {
            return Err(StokesError::InvalidState("GtKG applied before set-up"));
        };
        let m = g.ncols();
        check_dim("GtKG apply input", m, x.len())?;
        check_dim("GtKG apply output", m, y.len())?;

        let mut xp = x.to_vec();
        self.project(&mut xp);
        let mut t = vec![0.0; m];
        let its1 = self.gram_solve(&xp, &mut t)?;

        let mut s = vec![0.0; k.nrows()];
        g.spmv(&t, &mut s);
        if let Some(w) = &self.weight {
            vector::pointwise_mult(&mut s, w);
        }
        let mut ks = vec![0.0; k.nrows()];
        if transpose {
            k.spmv_transpose(&s, &mut ks);
        } else {
            k.spmv(&s, &mut ks);
        }
        if let Some(w) = &self.weight {
            vector::pointwise_mult(&mut ks, w);
        }
        let mut mid = vec![0.0; m];
        g.spmv_transpose(&ks, &mut mid);
        if let Some(c) = self.c {
            let mut ct = vec![0.0; m];
            if transpose {
                c.spmv_transpose(&t, &mut ct);
            } else {
                c.spmv(&t, &mut ct);
            }
            vector::axpy(-1.0, &ct, &mut mid);
        }
        self.project(&mut mid);
        let its2 = self.gram_solve(&mid, y)?;
        self.project(y);

        self.applications.set(self.applications.get() + 1);
        if self.opts.monitor {
            info!(first = its1, second = its2, "GtKG inner Gram iterations");
        }
        Ok(())
    }

    /// y = M⁻ᵗ x, using Kᵗ and Cᵗ in the middle product.
    pub fn apply_transpose(&self, x: &[f64], y: &mut [f64]) -> Result<(), StokesError> {
        self.apply_impl(x, y, true)
    }
}

impl Preconditioner for GtkgPc<'_> {
    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), StokesError> {
        self.apply_impl(x, y, false)
    }
}

//! Core linear-algebra traits for bsscr.
//!
//! Every operator in the crate (sparse matrices, the implicit Schur
//! complement, dense reference matrices) is applied through these traits,
//! so the Krylov solvers never need to know what they are iterating on.

/// Matrix–vector product: y ← A x.
pub trait MatVec {
    /// Compute y = A · x.
    fn matvec(&self, x: &[f64], y: &mut [f64]);
}

/// Shape information. The Krylov solvers check it against the right-hand
/// side before iterating.
pub trait Indexing {
    /// Number of rows (or length for a vector).
    fn nrows(&self) -> usize;
    /// Number of columns; square by default.
    fn ncols(&self) -> usize {
        self.nrows()
    }
}

/// Inner products & norms.
///
/// Implementations decide where the reduction happens: `()` reduces locally,
/// `parallel::Reduction` adds a collective step on top.
pub trait InnerProduct {
    /// Compute dot(x, y).
    fn dot(&self, x: &[f64], y: &[f64]) -> f64;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &[f64]) -> f64 {
        self.dot(x, x).sqrt()
    }
    /// Compute ‖x‖∞.
    fn norm_inf(&self, x: &[f64]) -> f64;
    /// Compute Σ xᵢ.
    fn sum(&self, x: &[f64]) -> f64;
}

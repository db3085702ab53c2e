//! Trait implementations for faer dense matrices and the local inner product.
//!
//! Dense `faer::Mat<f64>` operators are used for coarse multigrid levels and
//! as reference operators in tests; `()` is the rank-local inner product that
//! `parallel::Reduction` builds on.

use crate::core::traits::{Indexing, InnerProduct, MatVec};
use crate::core::vector;
use faer::Mat;

/// Computes `y = A * x` for a dense matrix.
impl MatVec for Mat<f64> {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(self.nrows(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.ncols(), x.len(), "Input vector x has incorrect length");
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = (0..self.ncols()).map(|j| self[(i, j)] * x[j]).sum();
        }
    }
}

impl Indexing for Mat<f64> {
    fn nrows(&self) -> usize {
        Mat::nrows(self)
    }
    fn ncols(&self) -> usize {
        Mat::ncols(self)
    }
}

/// Rank-local reductions (parallel over rayon when enabled).
impl InnerProduct for () {
    fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
        vector::dot(x, y)
    }
    fn norm_inf(&self, x: &[f64]) -> f64 {
        vector::norm_inf(x)
    }
    fn sum(&self, x: &[f64]) -> f64 {
        vector::sum(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_products_match_by_hand() {
        let a = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        let mut y = vec![0.0; 2];
        a.matvec(&[1.0, 1.0, 1.0], &mut y);
        assert_eq!(y, vec![3.0, 12.0]);
        assert_eq!(Indexing::ncols(&a), 3);
    }

    #[test]
    fn local_inner_product() {
        let ip = ();
        assert_eq!(ip.dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert_eq!(ip.norm(&[3.0, 4.0]), 5.0);
        assert_eq!(ip.norm_inf(&[-7.0, 4.0]), 7.0);
        assert_eq!(ip.sum(&[-7.0, 4.0]), -3.0);
    }
}

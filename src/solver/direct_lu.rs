//! Dense direct solve with faer's partial-pivoting LU.
//!
//! Used for the coarsest multigrid level and as the reference solver in
//! tests. The factorization is cached so repeated solves with the same
//! matrix only pay for the triangular sweeps.

use crate::core::traits::InnerProduct;
use crate::error::{StokesError, check_dim};
use crate::matrix::CsrMatrix;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{ConvergedReason, SolveStats};
use faer::linalg::solvers::{PartialPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

/// LU solver using row pivoting from faer.
#[derive(Default)]
pub struct LuSolver {
    factor: Option<PartialPivLu<f64>>,
    n: usize,
}

impl LuSolver {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        Self { factor: None, n: 0 }
    }

    pub fn factor(&mut self, a: &Mat<f64>) -> Result<(), StokesError> {
        check_dim("LU factor (square)", a.nrows(), a.ncols())?;
        if a.nrows() == 0 {
            return Err(StokesError::FactorError("empty matrix".into()));
        }
        self.factor = Some(PartialPivLu::new(a.as_ref()));
        self.n = a.nrows();
        Ok(())
    }

    pub fn factor_csr(&mut self, a: &CsrMatrix) -> Result<(), StokesError> {
        self.factor(&a.to_dense())
    }

    pub fn is_factored(&self) -> bool {
        self.factor.is_some()
    }

    /// x = A⁻¹ b with the cached factorization.
    pub fn solve_cached(&self, b: &[f64], x: &mut [f64]) -> Result<(), StokesError> {
        let factor = self.factor.as_ref().ok_or(StokesError::InvalidState("LU solve before factorization"))?;
        check_dim("LU solve rhs", self.n, b.len())?;
        check_dim("LU solve solution", self.n, x.len())?;
        x.copy_from_slice(b);
        let x_mat = MatMut::from_column_major_slice_mut(x, self.n, 1);
        factor.solve_in_place_with_conj(Conj::No, x_mat);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(StokesError::FactorError("singular matrix in LU solve".into()));
        }
        Ok(())
    }
}

impl LinearSolver<Mat<f64>> for LuSolver {
    /// Factor `a` (overwriting any previous factor) and solve; the
    /// preconditioner is ignored.
    fn solve(
        &mut self,
        a: &Mat<f64>,
        _pc: Option<&dyn Preconditioner>,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats, StokesError> {
        self.factor(a)?;
        self.solve_cached(b, x)?;
        Ok(SolveStats {
            iterations: 1,
            initial_residual: ().norm(b),
            final_residual: 0.0,
            reason: ConvergedReason::ConvergedRtol,
        })
    }
}

/// The coarse solve of a multigrid hierarchy: an exact LU inverse.
impl Preconditioner for LuSolver {
    fn setup(&mut self, a: &CsrMatrix) -> Result<(), StokesError> {
        self.factor_csr(a)
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), StokesError> {
        self.solve_cached(r, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solver_solves_dense_system() {
        // [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6] has x = [6,15,-23]
        let a = Mat::from_fn(3, 3, |i, j| [[2.0, 1.0, 1.0], [1.0, 3.0, 2.0], [1.0, 0.0, 0.0]][i][j]);
        let mut x = vec![0.0; 3];
        let mut solver = LuSolver::new();
        let stats = solver.solve(&a, None, &[4.0, 5.0, 6.0], &mut x).unwrap();
        for (xi, ei) in x.iter().zip([6.0, 15.0, -23.0]) {
            assert!((xi - ei).abs() < 1e-10, "xi = {xi}, expected = {ei}");
        }
        assert!(stats.converged());
    }

    #[test]
    fn cached_solve_requires_factor() {
        let solver = LuSolver::new();
        let mut x = [0.0];
        assert!(matches!(solver.solve_cached(&[1.0], &mut x), Err(StokesError::InvalidState(_))));
    }

    #[test]
    fn csr_setup_as_preconditioner() {
        let a = CsrMatrix::from_triplets(2, 2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]).unwrap();
        let mut lu = LuSolver::new();
        Preconditioner::setup(&mut lu, &a).unwrap();
        let mut z = vec![0.0; 2];
        lu.apply(&[1.0, 2.0], &mut z).unwrap();
        assert!((z[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((z[1] - 7.0 / 11.0).abs() < 1e-12);
    }

    // five-point Laplacian on an nx × nx grid, Dirichlet boundary
    fn laplacian_2d(nx: usize) -> CsrMatrix {
        let mut t = Vec::new();
        for j in 0..nx {
            for i in 0..nx {
                let r = j * nx + i;
                t.push((r, r, 4.0));
                if i > 0 {
                    t.push((r, r - 1, -1.0));
                }
                if i + 1 < nx {
                    t.push((r, r + 1, -1.0));
                }
                if j > 0 {
                    t.push((r, r - nx, -1.0));
                }
                if j + 1 < nx {
                    t.push((r, r + nx, -1.0));
                }
            }
        }
        CsrMatrix::from_triplets(nx * nx, nx * nx, &t).unwrap()
    }

    #[test]
    fn spd_systems_above_the_coarse_size_solve_accurately() {
        for nx in [7, 8, 10] {
            let a = laplacian_2d(nx);
            let n = a.nrows();
            let exact: Vec<f64> = (0..n).map(|i| ((i * 7 % 13) as f64 - 6.0) / 3.0).collect();
            let mut b = vec![0.0; n];
            a.spmv(&exact, &mut b);
            let mut lu = LuSolver::new();
            Preconditioner::setup(&mut lu, &a).unwrap();
            let mut x = vec![0.0; n];
            lu.apply(&b, &mut x).unwrap();
            assert!(x.iter().all(|v| v.is_finite()));
            for (xi, ei) in x.iter().zip(&exact) {
                assert!((xi - ei).abs() < 1e-10, "n = {n}: {xi} vs {ei}");
            }
        }
    }
}

//! Shared fixtures: a Q1-P0 Stokes discretisation on the unit square and
//! random well-conditioned saddle-point blocks.

#![allow(dead_code)]

use bsscr::stokes::PressureGridLayout;
use bsscr::{BlockOperator, CsrMatrix};
use faer::Mat;
use rand::Rng;

/// Scalar Q1 stiffness on a square cell, nodes ordered (0,0), (1,0), (1,1), (0,1).
const Q1_STIFFNESS: [[f64; 4]; 4] = [
    [4.0, -1.0, -2.0, -1.0],
    [-1.0, 4.0, -1.0, -2.0],
    [-2.0, -1.0, 4.0, -1.0],
    [-1.0, -2.0, -1.0, 4.0],
];
const CORNERS: [(usize, usize); 4] = [(0, 0), (1, 0), (1, 1), (0, 1)];

/// Q1-P0 Stokes blocks on an `nx`×`ny` grid of the unit square with
/// homogeneous Dirichlet velocity on the whole boundary.
pub struct Q1P0 {
    pub nx: usize,
    pub ny: usize,
    pub op: BlockOperator,
    pub pressure_mass: CsrMatrix,
    pub velocity_mass: CsrMatrix,
}

impl Q1P0 {
    pub fn new(nx: usize, ny: usize) -> Self {
        let h = 1.0 / nx as f64;
        let interior = |i: usize, j: usize| -> Option<usize> {
            (i > 0 && j > 0 && i < nx && j < ny).then(|| (j - 1) * (nx - 1) + (i - 1))
        };
        let n = 2 * (nx - 1) * (ny - 1);
        let m = nx * ny;
        let mut k = Vec::new();
        let mut g = Vec::new();
        let mut mv = vec![0.0; n];
        for cj in 0..ny {
            for ci in 0..nx {
                let cell = cj * nx + ci;
                let nodes: Vec<Option<usize>> = CORNERS.iter().map(|&(a, b)| interior(ci + a, cj + b)).collect();
                for (a, na) in nodes.iter().enumerate() {
                    let Some(na) = *na else { continue };
                    for (b, nb) in nodes.iter().enumerate() {
                        let Some(nb) = *nb else { continue };
                        let v = Q1_STIFFNESS[a][b] / 6.0;
                        k.push((2 * na, 2 * nb, v));
                        k.push((2 * na + 1, 2 * nb + 1, v));
                    }
                    let (sx, sy) = (CORNERS[a].0 as f64 * 2.0 - 1.0, CORNERS[a].1 as f64 * 2.0 - 1.0);
                    g.push((2 * na, cell, sx * h / 2.0));
                    g.push((2 * na + 1, cell, sy * h / 2.0));
                    mv[2 * na] += h * h / 4.0;
                    mv[2 * na + 1] += h * h / 4.0;
                }
            }
        }
        let k = CsrMatrix::from_triplets(n, n, &k).unwrap();
        let g = CsrMatrix::from_triplets(n, m, &g).unwrap();
        Self {
            nx,
            ny,
            op: BlockOperator::with_transposed_coupling(k, g, None),
            pressure_mass: CsrMatrix::from_diagonal(&vec![h * h; m]),
            velocity_mass: CsrMatrix::from_diagonal(&mv),
        }
    }

    pub fn layout(&self) -> PressureGridLayout {
        PressureGridLayout::structured_2d(self.nx, self.ny)
    }

    pub fn velocity_dim(&self) -> usize {
        self.op.velocity_dim()
    }

    pub fn pressure_dim(&self) -> usize {
        self.op.pressure_dim()
    }
}

/// f = K u + G p, h = D u + C p.
pub fn manufacture(op: &BlockOperator, u: &[f64], p: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut f = vec![0.0; op.velocity_dim()];
    op.k.spmv(u, &mut f);
    let mut gp = vec![0.0; f.len()];
    op.g.spmv(p, &mut gp);
    for (fi, gi) in f.iter_mut().zip(&gp) {
        *fi += gi;
    }
    let mut h = vec![0.0; op.pressure_dim()];
    op.d().unwrap().spmv(u, &mut h);
    let mut cp = vec![0.0; h.len()];
    op.apply_c(p, &mut cp);
    for (hi, ci) in h.iter_mut().zip(&cp) {
        *hi += ci;
    }
    (f, h)
}

pub fn random_vec(len: usize) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// A = MᵗM + n·I and a random tall G (n×m), both sparse.
pub fn random_blocks(n: usize, m: usize) -> BlockOperator {
    let mut rng = rand::thread_rng();
    let data: Vec<f64> = (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mm = Mat::from_fn(n, n, |i, j| data[j * n + i]);
    let mtm = &mm.transpose() * &mm;
    let a = Mat::from_fn(n, n, |i, j| mtm[(i, j)] + if i == j { n as f64 } else { 0.0 });
    let gdata: Vec<f64> = (0..n * m).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let g = Mat::from_fn(n, m, |i, j| gdata[j * n + i]);
    BlockOperator::with_transposed_coupling(CsrMatrix::from_dense(&a), CsrMatrix::from_dense(&g), None)
}

/// The full saddle-point matrix as a dense faer matrix.
pub fn dense_saddle(op: &BlockOperator) -> Mat<f64> {
    let n = op.velocity_dim();
    let m = op.pressure_dim();
    let k = op.k.to_dense();
    let g = op.g.to_dense();
    let d = op.d().unwrap().to_dense();
    let c = op.c.as_ref().map(|c| c.to_dense());
    Mat::from_fn(n + m, n + m, |i, j| match (i < n, j < n) {
        (true, true) => k[(i, j)],
        (true, false) => g[(i, j - n)],
        (false, true) => d[(i - n, j)],
        (false, false) => c.as_ref().map_or(0.0, |c| c[(i - n, j - n)]),
    })
}

pub fn rel_error(x: &[f64], x_true: &[f64]) -> f64 {
    let num: f64 = x.iter().zip(x_true).map(|(a, b)| (a - b).powi(2)).sum();
    let den: f64 = x_true.iter().map(|b| b * b).sum();
    (num / den).sqrt()
}

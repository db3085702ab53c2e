// Compressed sparse row storage and the kernels the Stokes driver needs.
//
// Rows keep their column indices sorted and unique; every constructor
// enforces this so `get`, `add_scaled` and `matmul` can rely on it.

use crate::core::traits::{Indexing, MatVec};
use crate::error::{StokesError, check_dim};
use faer::Mat;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Build a CSR from raw row-ptr, col-idx, and values.
    ///
    /// Columns within a row may come in any order; duplicates are summed.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, StokesError> {
        if row_ptr.len() != nrows + 1 {
            return Err(StokesError::InvalidStructure(format!(
                "row_ptr has length {}, expected {}",
                row_ptr.len(),
                nrows + 1
            )));
        }
        if row_ptr[0] != 0 || row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(StokesError::InvalidStructure("row_ptr must start at 0 and be non-decreasing".into()));
        }
        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz || values.len() != nnz {
            return Err(StokesError::InvalidStructure(format!(
                "expected {} entries, found {} columns and {} values",
                nnz,
                col_idx.len(),
                values.len()
            )));
        }
        if let Some(&bad) = col_idx.iter().find(|&&j| j >= ncols) {
            return Err(StokesError::InvalidStructure(format!("column {bad} out of range for {ncols} columns")));
        }
        let mut out_ptr = Vec::with_capacity(nrows + 1);
        let mut out_col = Vec::with_capacity(nnz);
        let mut out_val = Vec::with_capacity(nnz);
        out_ptr.push(0);
        let mut row: Vec<(usize, f64)> = Vec::new();
        for i in 0..nrows {
            row.clear();
            row.extend((row_ptr[i]..row_ptr[i + 1]).map(|k| (col_idx[k], values[k])));
            row.sort_by_key(|&(j, _)| j);
            for &(j, v) in &row {
                if out_col.len() > out_ptr[i] && out_col.last() == Some(&j) {
                    if let Some(last) = out_val.last_mut() {
                        *last += v;
                    }
                } else {
                    out_col.push(j);
                    out_val.push(v);
                }
            }
            out_ptr.push(out_col.len());
        }
        Ok(Self { nrows, ncols, row_ptr: out_ptr, col_idx: out_col, values: out_val })
    }

    /// Build from `(row, col, value)` triplets, summing duplicates.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Result<Self, StokesError> {
        let mut counts = vec![0usize; nrows + 1];
        for &(i, j, _) in triplets {
            if i >= nrows || j >= ncols {
                return Err(StokesError::InvalidStructure(format!(
                    "triplet ({i}, {j}) out of range for a {nrows}x{ncols} matrix"
                )));
            }
            counts[i + 1] += 1;
        }
        for i in 0..nrows {
            counts[i + 1] += counts[i];
        }
        let mut next = counts.clone();
        let mut col_idx = vec![0; triplets.len()];
        let mut values = vec![0.0; triplets.len()];
        for &(i, j, v) in triplets {
            col_idx[next[i]] = j;
            values[next[i]] = v;
            next[i] += 1;
        }
        Self::from_csr(nrows, ncols, counts, col_idx, values)
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self { nrows, ncols, row_ptr: vec![0; nrows + 1], col_idx: Vec::new(), values: Vec::new() }
    }

    pub fn identity(n: usize) -> Self {
        Self::from_diagonal(&vec![1.0; n])
    }

    pub fn from_diagonal(diag: &[f64]) -> Self {
        let n = diag.len();
        Self {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: diag.to_vec(),
        }
    }

    /// Dense → sparse, dropping exact zeros.
    pub fn from_dense(a: &Mat<f64>) -> Self {
        let (nrows, ncols) = (a.nrows(), a.ncols());
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for i in 0..nrows {
            for j in 0..ncols {
                let v = a[(i, j)];
                if v != 0.0 {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Self { nrows, ncols, row_ptr, col_idx, values }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn nnz(&self) -> usize {
        self.values.len()
    }
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }
    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }
    pub fn values(&self) -> &[f64] {
        &self.values
    }
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[range.clone()], &self.values[range])
    }

    /// Entry (i, j); zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).map(|k| vals[k]).unwrap_or(0.0)
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    /// y = A x
    pub fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols, "spmv: x has incorrect length");
        assert_eq!(y.len(), self.nrows, "spmv: y has incorrect length");
        let row_dot = |i: usize| -> f64 {
            (self.row_ptr[i]..self.row_ptr[i + 1])
                .map(|k| self.values[k] * x[self.col_idx[k]])
                .sum()
        };
        #[cfg(feature = "rayon")]
        y.par_iter_mut().enumerate().for_each(|(i, yi)| *yi = row_dot(i));
        #[cfg(not(feature = "rayon"))]
        y.iter_mut().enumerate().for_each(|(i, yi)| *yi = row_dot(i));
    }

    /// y = Aᵗ x
    pub fn spmv_transpose(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.nrows, "spmv_transpose: x has incorrect length");
        assert_eq!(y.len(), self.ncols, "spmv_transpose: y has incorrect length");
        y.fill(0.0);
        for (i, &xi) in x.iter().enumerate() {
            if xi == 0.0 {
                continue;
            }
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                y[self.col_idx[k]] += self.values[k] * xi;
            }
        }
    }

    pub fn transpose(&self) -> CsrMatrix {
        let mut counts = vec![0usize; self.ncols + 1];
        for &j in &self.col_idx {
            counts[j + 1] += 1;
        }
        for j in 0..self.ncols {
            counts[j + 1] += counts[j];
        }
        let mut next = counts.clone();
        let mut col_idx = vec![0; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        // Rows are visited in order, so each transposed row comes out sorted.
        for i in 0..self.nrows {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                let j = self.col_idx[k];
                col_idx[next[j]] = i;
                values[next[j]] = self.values[k];
                next[j] += 1;
            }
        }
        CsrMatrix { nrows: self.ncols, ncols: self.nrows, row_ptr: counts, col_idx, values }
    }

    /// Main diagonal (length min(nrows, ncols)).
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows.min(self.ncols)).map(|i| self.get(i, i)).collect()
    }

    /// max_j |a_ij| for each row.
    pub fn row_max_abs(&self) -> Vec<f64> {
        (0..self.nrows)
            .map(|i| self.row(i).1.iter().fold(0.0f64, |m, v| m.max(v.abs())))
            .collect()
    }

    /// min_j |a_ij| over the stored nonzeros of each row (zero for empty rows).
    pub fn row_min_abs(&self) -> Vec<f64> {
        (0..self.nrows)
            .map(|i| {
                self.row(i)
                    .1
                    .iter()
                    .filter(|v| **v != 0.0)
                    .map(|v| v.abs())
                    .fold(None, |m: Option<f64>, v| Some(m.map_or(v, |m| m.min(v))))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// A ← diag(l) · A
    pub fn scale_rows(&mut self, l: &[f64]) -> Result<(), StokesError> {
        check_dim("scale_rows", self.nrows, l.len())?;
        for (i, &li) in l.iter().enumerate() {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                self.values[k] *= li;
            }
        }
        Ok(())
    }

    /// A ← A · diag(r)
    pub fn scale_cols(&mut self, r: &[f64]) -> Result<(), StokesError> {
        check_dim("scale_cols", self.ncols, r.len())?;
        for (v, &j) in self.values.iter_mut().zip(&self.col_idx) {
            *v *= r[j];
        }
        Ok(())
    }

    /// A ← diag(l) · A · diag(r); either side may be skipped.
    pub fn diagonal_scale(&mut self, l: Option<&[f64]>, r: Option<&[f64]>) -> Result<(), StokesError> {
        if let Some(l) = l {
            self.scale_rows(l)?;
        }
        if let Some(r) = r {
            self.scale_cols(r)?;
        }
        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) {
        self.values.iter_mut().for_each(|v| *v *= alpha);
    }

    /// self + alpha·other on the union of both sparsity patterns.
    pub fn add_scaled(&self, alpha: f64, other: &CsrMatrix) -> Result<CsrMatrix, StokesError> {
        check_dim("add_scaled rows", self.nrows, other.nrows)?;
        check_dim("add_scaled cols", self.ncols, other.ncols)?;
        let mut row_ptr = Vec::with_capacity(self.nrows + 1);
        let mut col_idx = Vec::with_capacity(self.nnz().max(other.nnz()));
        let mut values = Vec::with_capacity(col_idx.capacity());
        row_ptr.push(0);
        for i in 0..self.nrows {
            let (ca, va) = self.row(i);
            let (cb, vb) = other.row(i);
            let (mut a, mut b) = (0, 0);
            while a < ca.len() || b < cb.len() {
                let ja = ca.get(a).copied().unwrap_or(usize::MAX);
                let jb = cb.get(b).copied().unwrap_or(usize::MAX);
                if ja == jb {
                    col_idx.push(ja);
                    values.push(va[a] + alpha * vb[b]);
                    a += 1;
                    b += 1;
                } else if ja < jb {
                    col_idx.push(ja);
                    values.push(va[a]);
                    a += 1;
                } else {
                    col_idx.push(jb);
                    values.push(alpha * vb[b]);
                    b += 1;
                }
            }
            row_ptr.push(col_idx.len());
        }
        Ok(CsrMatrix { nrows: self.nrows, ncols: self.ncols, row_ptr, col_idx, values })
    }

    /// self ← self + alpha·other.
    pub fn axpy(&mut self, alpha: f64, other: &CsrMatrix) -> Result<(), StokesError> {
        if self.row_ptr == other.row_ptr && self.col_idx == other.col_idx {
            for (v, w) in self.values.iter_mut().zip(&other.values) {
                *v += alpha * w;
            }
            return Ok(());
        }
        *self = self.add_scaled(alpha, other)?;
        Ok(())
    }

    /// Sparse product self · other (row-wise Gustavson).
    pub fn matmul(&self, other: &CsrMatrix) -> Result<CsrMatrix, StokesError> {
        check_dim("matmul inner dimension", self.ncols, other.nrows)?;
        let n = other.ncols;
        let mut accum = vec![0.0; n];
        let mut marker = vec![usize::MAX; n];
        let mut touched: Vec<usize> = Vec::new();
        let mut row_ptr = Vec::with_capacity(self.nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for i in 0..self.nrows {
            touched.clear();
            let (ca, va) = self.row(i);
            for (&k, &aik) in ca.iter().zip(va) {
                let (cb, vb) = other.row(k);
                for (&j, &bkj) in cb.iter().zip(vb) {
                    if marker[j] != i {
                        marker[j] = i;
                        accum[j] = 0.0;
                        touched.push(j);
                    }
                    accum[j] += aik * bkj;
                }
            }
            touched.sort_unstable();
            for &j in &touched {
                col_idx.push(j);
                values.push(accum[j]);
            }
            row_ptr.push(col_idx.len());
        }
        Ok(CsrMatrix { nrows: self.nrows, ncols: n, row_ptr, col_idx, values })
    }

    /// Max absolute row sum.
    pub fn norm_inf(&self) -> f64 {
        (0..self.nrows)
            .map(|i| self.row(i).1.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Max absolute column sum.
    pub fn norm_1(&self) -> f64 {
        let mut sums = vec![0.0; self.ncols];
        for (v, &j) in self.values.iter().zip(&self.col_idx) {
            sums[j] += v.abs();
        }
        sums.into_iter().fold(0.0, f64::max)
    }

    pub fn norm_frobenius(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn to_dense(&self) -> Mat<f64> {
        let mut a = Mat::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                a[(i, self.col_idx[k])] = self.values[k];
            }
        }
        a
    }
}

impl MatVec for CsrMatrix {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.spmv(x, y);
    }
}

impl Indexing for CsrMatrix {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
}

//! Pressure null-space detection and removal.
//!
//! Enclosed-flow problems leave the pressure determined only up to a
//! constant; some element pairs (Q1-P0 on structured grids) additionally
//! admit a checkerboard mode. A candidate vector is projected out of a
//! pressure-sized vector only if G actually annihilates it, measured by
//! ‖G·nv‖ / (‖nv‖·‖G‖∞).

use crate::config::NullSpaceMode;
use crate::core::traits::InnerProduct;
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::CsrMatrix;

/// Structured-grid index (i, j, k) of every pressure dof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressureGridLayout {
    indices: Vec<[usize; 3]>,
}

impl PressureGridLayout {
    pub fn new(indices: Vec<[usize; 3]>) -> Self {
        Self { indices }
    }

    /// dofs ordered with i fastest.
    pub fn structured_2d(nx: usize, ny: usize) -> Self {
        Self::structured_3d(nx, ny, 1)
    }

    pub fn structured_3d(nx: usize, ny: usize, nz: usize) -> Self {
        let mut indices = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    indices.push([i, j, k]);
                }
            }
        }
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[[usize; 3]] {
        &self.indices
    }
}

/// Candidate pressure null-space vectors, each of unit ℓ2 norm.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PressureNullSpace {
    vectors: Vec<Vec<f64>>,
}

/// Divide by the pressure scale (if any), normalise, and drop empty vectors.
fn finish(raw: Vec<Vec<f64>>, scale: Option<&[f64]>) -> Result<Vec<Vec<f64>>, StokesError> {
    let mut out = Vec::with_capacity(raw.len());
    for mut v in raw {
        if let Some(s) = scale {
            check_dim("null space scale", v.len(), s.len())?;
            vector::pointwise_divide(&mut v, s);
        }
        let norm = ().norm(&v);
        if norm > 0.0 && norm.is_finite() {
            vector::scale(1.0 / norm, &mut v);
            out.push(v);
        }
    }
    Ok(out)
}

impl PressureNullSpace {
    /// Even (t) and odd (v) parity modes of the grid. `scale` is R2 when the
    /// system has been rescaled.
    pub fn checkerboard(layout: &PressureGridLayout, scale: Option<&[f64]>) -> Result<Self, StokesError> {
        let even: Vec<f64> = layout.indices().iter().map(|[i, j, k]| if (i + j + k) % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let odd = even.iter().map(|e| 1.0 - e).collect();
        Ok(Self { vectors: finish(vec![even, odd], scale)? })
    }

    pub fn constant(m: usize, scale: Option<&[f64]>) -> Result<Self, StokesError> {
        Ok(Self { vectors: finish(vec![vec![1.0; m]], scale)? })
    }

    /// Build the candidates for `mode`; `None` for `NullSpaceMode::None`.
    pub fn from_mode(
        mode: NullSpaceMode,
        m: usize,
        layout: Option<&PressureGridLayout>,
        scale: Option<&[f64]>,
    ) -> Result<Option<Self>, StokesError> {
        match mode {
            NullSpaceMode::None => Ok(None),
            NullSpaceMode::Constant => Self::constant(m, scale).map(Some),
            NullSpaceMode::Checkerboard => {
                let layout = layout.ok_or_else(|| StokesError::Configuration("checkerboard null space needs a pressure grid layout".into()))?;
                check_dim("pressure grid layout", m, layout.len())?;
                Self::checkerboard(layout, scale).map(Some)
            }
        }
    }

    pub fn vectors(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// ⟨nv, x⟩ for every vector.
    pub fn content(&self, x: &[f64]) -> Vec<f64> {
        self.vectors.iter().map(|nv| ().dot(nv, x)).collect()
    }

    /// The vectors that pass the alignment test against `g`.
    pub fn annihilated_by(&self, g: &CsrMatrix, tol: f64) -> Result<Vec<Vec<f64>>, StokesError> {
        let mut out = Vec::new();
        for nv in &self.vectors {
            if alignment(nv, g)?.is_some_and(|r| r < tol) {
                out.push(nv.clone());
            }
        }
        Ok(out)
    }

    /// Project every vector that G annihilates out of `x`; returns how many
    /// were removed.
    pub fn remove(&self, x: &mut [f64], g: &CsrMatrix, tol: f64) -> Result<usize, StokesError> {
        let mut removed = 0;
        for nv in &self.vectors {
            if remove_null_space_component(x, nv, tol, g)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// ‖G·nv‖ / (‖nv‖·‖G‖∞); `None` when either norm vanishes.
fn alignment(nv: &[f64], g: &CsrMatrix) -> Result<Option<f64>, StokesError> {
    check_dim("null-space vector", g.ncols(), nv.len())?;
    let nv_norm = ().norm(nv);
    let g_inf = g.norm_inf();
    if nv_norm == 0.0 || g_inf == 0.0 {
        return Ok(None);
    }
    let mut gnv = vec![0.0; g.nrows()];
    g.spmv(nv, &mut gnv);
    Ok(Some(().norm(&gnv) / (nv_norm * g_inf)))
}

/// x ← x − (⟨nv,x⟩/⟨nv,nv⟩)·nv, provided ‖G·nv‖/(‖nv‖·‖G‖∞) < tol.
pub fn remove_null_space_component(x: &mut [f64], nv: &[f64], tol: f64, g: &CsrMatrix) -> Result<bool, StokesError> {
    check_dim("null-space projection target", nv.len(), x.len())?;
    match alignment(nv, g)? {
        Some(ratio) if ratio < tol => {
            vector::axpy(-().dot(nv, x) / ().dot(nv, nv), nv, x);
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_vectors_are_unit_and_disjoint() {
        let layout = PressureGridLayout::structured_2d(3, 3);
        let ns = PressureNullSpace::checkerboard(&layout, None).unwrap();
        assert_eq!(ns.len(), 2);
        for v in ns.vectors() {
            assert!((().norm(v) - 1.0).abs() < 1e-14);
        }
        assert_eq!(().dot(&ns.vectors()[0], &ns.vectors()[1]), 0.0);
        // 5 even cells, 4 odd cells
        assert!((ns.vectors()[0][0] - 1.0 / 5f64.sqrt()).abs() < 1e-14);
        // a single cell has no odd mode
        assert_eq!(PressureNullSpace::checkerboard(&PressureGridLayout::structured_2d(1, 1), None).unwrap().len(), 1);
    }

    #[test]
    fn projection_only_when_g_annihilates() {
        // G maps the constant pressure to zero
        let g = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, -1.0), (1, 0, 2.0), (1, 1, -2.0)]).unwrap();
        let ns = PressureNullSpace::constant(2, None).unwrap();
        let mut x = vec![3.0, 1.0];
        assert_eq!(ns.remove(&mut x, &g, 1e-7).unwrap(), 1);
        assert!((x[0] - 1.0).abs() < 1e-14 && (x[1] + 1.0).abs() < 1e-14);
        assert!(ns.content(&x)[0].abs() < 1e-14);

        let g = CsrMatrix::identity(2);
        let mut y = vec![3.0, 1.0];
        assert_eq!(ns.remove(&mut y, &g, 1e-7).unwrap(), 0);
        assert_eq!(y, vec![3.0, 1.0]);
    }

    #[test]
    fn scaled_vectors_are_divided_by_the_pressure_scale() {
        let ns = PressureNullSpace::constant(2, Some(&[1.0, 2.0])).unwrap();
        let v = &ns.vectors()[0];
        assert!((v[0] / v[1] - 2.0).abs() < 1e-14);
        assert!(matches!(
            PressureNullSpace::from_mode(NullSpaceMode::Checkerboard, 4, None, None),
            Err(StokesError::Configuration(_))
        ));
    }
}

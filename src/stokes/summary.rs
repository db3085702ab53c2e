//! Per-solve statistics and the post-solve residual analysis.

use crate::core::traits::InnerProduct;
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::{BlockOperator, CsrMatrix};
use crate::utils::convergence::{ConvergedReason, SolveStats};
use std::fmt;
use std::time::{Duration, Instant};

/// One Krylov phase of the solve.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStats {
    pub iterations: usize,
    pub time: Duration,
    pub reason: ConvergedReason,
    pub initial_residual: f64,
    pub final_residual: f64,
}

impl PhaseStats {
    pub fn from_stats(stats: &SolveStats, time: Duration) -> Self {
        Self {
            iterations: stats.iterations,
            time,
            reason: stats.reason,
            initial_residual: stats.initial_residual,
            final_residual: stats.final_residual,
        }
    }

    /// A phase that did not run.
    pub fn skipped() -> Self {
        Self {
            iterations: 0,
            time: Duration::ZERO,
            reason: ConvergedReason::Iterating,
            initial_residual: 0.0,
            final_residual: 0.0,
        }
    }

    /// ‖r_final‖ / ‖r_0‖, zero when the phase started from a zero residual.
    pub fn relative_residual(&self) -> f64 {
        if self.initial_residual > 0.0 { self.final_residual / self.initial_residual } else { 0.0 }
    }
}

impl fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>6} its  {:>10.4e} s  |r| = {:.4e}  {}",
            self.iterations,
            self.time.as_secs_f64(),
            self.final_residual,
            self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveSummary {
    pub presolve: PhaseStats,
    pub pressure: PhaseStats,
    pub backsolve: PhaseStats,
    /// Velocity iterations performed inside products with S.
    pub pressure_velocity_iterations: usize,
    pub total_velocity_iterations: usize,
    /// First inner velocity solve that did not converge.
    pub inner_failure: Option<ConvergedReason>,
    pub scaling_time: Duration,
    pub augmentation_time: Duration,
    pub total_time: Duration,
    pub hnorm: f64,
    pub hnorm_rescaled: bool,
    /// Projections applied to ĥ and p together.
    pub null_space_removed: usize,
    pub gtkg_inner_iterations: usize,
    pub gtkg_inner_failures: usize,
    pub smoothing_cycles: usize,
    pub smoothing_sweeps: usize,
    pub augmented: bool,
    pub penalty: f64,
    pub k2_fallback: Option<String>,
    pub diagnostics: Option<Diagnostics>,
}

impl Default for SolveSummary {
    fn default() -> Self {
        Self {
            presolve: PhaseStats::skipped(),
            pressure: PhaseStats::skipped(),
            backsolve: PhaseStats::skipped(),
            pressure_velocity_iterations: 0,
            total_velocity_iterations: 0,
            inner_failure: None,
            scaling_time: Duration::ZERO,
            augmentation_time: Duration::ZERO,
            total_time: Duration::ZERO,
            hnorm: 0.0,
            hnorm_rescaled: false,
            null_space_removed: 0,
            gtkg_inner_iterations: 0,
            gtkg_inner_failures: 0,
            smoothing_cycles: 0,
            smoothing_sweeps: 0,
            augmented: false,
            penalty: 0.0,
            k2_fallback: None,
            diagnostics: None,
        }
    }
}

impl SolveSummary {
    /// First diverged reason in phase order, or the pressure solve's reason.
    pub fn overall_reason(&self) -> ConvergedReason {
        [Some(self.presolve.reason), Some(self.pressure.reason), self.inner_failure, Some(self.backsolve.reason)]
            .into_iter()
            .flatten()
            .find(|r| r.is_diverged())
            .unwrap_or(self.pressure.reason)
    }
}

impl fmt::Display for SolveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BSSCR summary")?;
        writeln!(f, "  pre-solve     {}", self.presolve)?;
        writeln!(f, "  pressure      {}", self.pressure)?;
        writeln!(f, "  back-solve    {}", self.backsolve)?;
        writeln!(
            f,
            "  velocity its  {} inside the pressure solve, {} total",
            self.pressure_velocity_iterations, self.total_velocity_iterations
        )?;
        if let Some(reason) = self.inner_failure {
            writeln!(f, "  inner failure {reason}")?;
        }
        if self.augmented {
            writeln!(f, "  penalty       {:.4e}", self.penalty)?;
        }
        if let Some(msg) = &self.k2_fallback {
            writeln!(f, "  K2 fallback   {msg}")?;
        }
        writeln!(f, "  hnorm         {:.4e}{}", self.hnorm, if self.hnorm_rescaled { " (rescaled)" } else { "" })?;
        writeln!(f, "  null space    {} projections", self.null_space_removed)?;
        if self.gtkg_inner_iterations > 0 {
            writeln!(f, "  GtKG inner    {} its, {} failures", self.gtkg_inner_iterations, self.gtkg_inner_failures)?;
        }
        if self.smoothing_cycles > 0 {
            writeln!(f, "  MG smoothing  {} cycles, {} sweeps", self.smoothing_cycles, self.smoothing_sweeps)?;
        }
        write!(
            f,
            "  time          scaling {:.4e} s, augmentation {:.4e} s, total {:.4e} s",
            self.scaling_time.as_secs_f64(),
            self.augmentation_time.as_secs_f64(),
            self.total_time.as_secs_f64()
        )?;
        if let Some(d) = &self.diagnostics {
            write!(f, "\n{d}")?;
        }
        Ok(())
    }
}

/// Residual and magnitude report of a finished solve, on the unscaled system.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    /// ‖f − K·u − G·p‖
    pub momentum_residual: f64,
    pub momentum_residual_ratio: f64,
    /// The same with K + γ·K2 and f + γ·f2.
    pub augmented_momentum_residual: Option<f64>,
    pub augmented_momentum_residual_ratio: Option<f64>,
    /// ‖D·u + C·p − h‖
    pub continuity_residual: f64,
    /// cos ∠(K·u, K2·u)
    pub angle_ku_k2u: Option<f64>,
    /// cos ∠(K·u, f − G·p)
    pub angle_ku_rhs: f64,
    /// [1, ∞, Frobenius]
    pub k_norms: [f64; 3],
    pub k2_norms: Option<[f64; 3]>,
    pub ku_norm: f64,
    pub k2u_norm: Option<f64>,
    pub du_norm: f64,
    /// ‖D·u‖·sqrt(n/m)/‖u‖
    pub du_scaled: f64,
    /// ‖Gᵗ·u‖/‖u‖
    pub gtu_ratio: f64,
    /// ‖D·u‖∞·sqrt(n)/‖u‖
    pub du_inf_scaled: f64,
    pub u_inf: f64,
    pub u_rms: f64,
    pub p_inf: f64,
    pub p_rms: f64,
    pub u_min: Option<(usize, f64)>,
    pub u_max: Option<(usize, f64)>,
    pub p_min: Option<(usize, f64)>,
    pub p_max: Option<(usize, f64)>,
    pub p_sum: f64,
    pub analysis_time: Duration,
}

/// Penalty term as seen by [`analyse`].
#[derive(Debug, Clone, Copy)]
pub struct PenaltyView<'a> {
    pub k2: &'a CsrMatrix,
    pub penalty: f64,
    pub f2: Option<&'a [f64]>,
}

fn ratio(a: f64, b: f64) -> f64 {
    if b > 0.0 { a / b } else { 0.0 }
}

fn cosine(ip: &dyn InnerProduct, a: &[f64], b: &[f64]) -> f64 {
    ratio(ip.dot(a, b), ip.norm(a) * ip.norm(b))
}

fn norms(a: &CsrMatrix) -> [f64; 3] {
    [a.norm_1(), a.norm_inf(), a.norm_frobenius()]
}

/// Residuals, angles and extrema of (u, p) against the un-augmented `op`.
pub fn analyse(
    op: &BlockOperator,
    f: &[f64],
    h: &[f64],
    u: &[f64],
    p: &[f64],
    penalty: Option<PenaltyView<'_>>,
    ip: &dyn InnerProduct,
) -> Result<Diagnostics, StokesError> {
    let start = Instant::now();
    op.validate()?;
    let n = op.velocity_dim();
    let m = op.pressure_dim();
    check_dim("diagnostics u", n, u.len())?;
    check_dim("diagnostics f", n, f.len())?;
    check_dim("diagnostics p", m, p.len())?;
    check_dim("diagnostics h", m, h.len())?;
    let d = op.d()?;

    let mut ku = vec![0.0; n];
    op.k.spmv(u, &mut ku);
    let mut gp = vec![0.0; n];
    op.g.spmv(p, &mut gp);
    // f − G·p, then f − K·u − G·p
    let mut rhs = f.to_vec();
    vector::axpy(-1.0, &gp, &mut rhs);
    let mut r_mom = rhs.clone();
    vector::axpy(-1.0, &ku, &mut r_mom);
    let f_norm = ip.norm(f);
    let momentum_residual = ip.norm(&r_mom);

    let mut du = vec![0.0; m];
    d.spmv(u, &mut du);
    let mut r_cont = du.clone();
    let mut cp = vec![0.0; m];
    op.apply_c(p, &mut cp);
    vector::axpy(1.0, &cp, &mut r_cont);
    vector::axpy(-1.0, h, &mut r_cont);

    let mut gtu = vec![0.0; m];
    op.g.spmv_transpose(u, &mut gtu);

    let (mut augmented_momentum_residual, mut augmented_momentum_residual_ratio) = (None, None);
    let (mut angle_ku_k2u, mut k2_norms, mut k2u_norm) = (None, None, None);
    if let Some(pv) = penalty {
        check_dim("diagnostics K2 rows", n, pv.k2.nrows())?;
        let mut k2u = vec![0.0; n];
        pv.k2.spmv(u, &mut k2u);
        let mut r_aug = r_mom.clone();
        vector::axpy(-pv.penalty, &k2u, &mut r_aug);
        let mut f_aug = f.to_vec();
        if let Some(f2) = pv.f2 {
            check_dim("diagnostics f2", n, f2.len())?;
            vector::axpy(pv.penalty, f2, &mut r_aug);
            vector::axpy(pv.penalty, f2, &mut f_aug);
        }
        let r = ip.norm(&r_aug);
        augmented_momentum_residual = Some(r);
        augmented_momentum_residual_ratio = Some(ratio(r, ip.norm(&f_aug)));
        angle_ku_k2u = Some(cosine(ip, &ku, &k2u));
        k2_norms = Some(norms(pv.k2));
        k2u_norm = Some(ip.norm(&k2u));
    }

    let u_norm = ip.norm(u);
    let du_norm = ip.norm(&du);
    let du_scaled = if m > 0 { ratio(du_norm * (n as f64 / m as f64).sqrt(), u_norm) } else { 0.0 };

    Ok(Diagnostics {
        momentum_residual,
        momentum_residual_ratio: ratio(momentum_residual, f_norm),
        augmented_momentum_residual,
        augmented_momentum_residual_ratio,
        continuity_residual: ip.norm(&r_cont),
        angle_ku_k2u,
        angle_ku_rhs: cosine(ip, &ku, &rhs),
        k_norms: norms(&op.k),
        k2_norms,
        ku_norm: ip.norm(&ku),
        k2u_norm,
        du_norm,
        du_scaled,
        gtu_ratio: ratio(ip.norm(&gtu), u_norm),
        du_inf_scaled: ratio(ip.norm_inf(&du) * (n as f64).sqrt(), u_norm),
        u_inf: ip.norm_inf(u),
        u_rms: vector::rms(u),
        p_inf: ip.norm_inf(p),
        p_rms: vector::rms(p),
        u_min: vector::min_with_index(u),
        u_max: vector::max_with_index(u),
        p_min: vector::min_with_index(p),
        p_max: vector::max_with_index(p),
        p_sum: ip.sum(p),
        analysis_time: start.elapsed(),
    })
}

fn extremum(e: Option<(usize, f64)>) -> String {
    e.map_or_else(|| "-".to_string(), |(i, v)| format!("{v:.6e} [{i}]"))
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  |f - Ku - Gp|        {:.6e} (ratio {:.6e})", self.momentum_residual, self.momentum_residual_ratio)?;
        if let (Some(r), Some(q)) = (self.augmented_momentum_residual, self.augmented_momentum_residual_ratio) {
            writeln!(f, "  augmented residual   {r:.6e} (ratio {q:.6e})")?;
        }
        writeln!(f, "  |Du + Cp - h|        {:.6e}", self.continuity_residual)?;
        writeln!(f, "  cos(Ku, f - Gp)      {:.6e}", self.angle_ku_rhs)?;
        if let Some(a) = self.angle_ku_k2u {
            writeln!(f, "  cos(Ku, K2u)         {a:.6e}")?;
        }
        let [k1, ki, kf] = self.k_norms;
        writeln!(f, "  K norms (1/inf/F)    {k1:.6e} {ki:.6e} {kf:.6e}")?;
        if let Some([a, b, c]) = self.k2_norms {
            writeln!(f, "  K2 norms (1/inf/F)   {a:.6e} {b:.6e} {c:.6e}")?;
        }
        write!(f, "  |Ku|                 {:.6e}", self.ku_norm)?;
        if let Some(v) = self.k2u_norm {
            write!(f, "  |K2u| {v:.6e}")?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "  |Du|                 {:.6e}  scaled {:.6e}  |G^T u|/|u| {:.6e}  inf-scaled {:.6e}",
            self.du_norm, self.du_scaled, self.gtu_ratio, self.du_inf_scaled
        )?;
        writeln!(f, "  u  inf {:.6e}  rms {:.6e}  min {}  max {}", self.u_inf, self.u_rms, extremum(self.u_min), extremum(self.u_max))?;
        writeln!(f, "  p  inf {:.6e}  rms {:.6e}  min {}  max {}", self.p_inf, self.p_rms, extremum(self.p_min), extremum(self.p_max))?;
        write!(f, "  sum(p) {:.6e}  analysis {:.4e} s", self.p_sum, self.analysis_time.as_secs_f64())
    }
}

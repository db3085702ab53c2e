//! Solver configuration.
//!
//! Every knob of a BSSCR solve lives in [`BsscrOptions`]: the augmented
//! Lagrangian term, scaling, null-space handling, the Schur preconditioner
//! and the Krylov/preconditioner pairs used for the nested solves. All types
//! are serde-(de)serialisable so a configuration can be read from a file by
//! the caller; missing fields take their defaults.

use crate::error::StokesError;
use serde::{Deserialize, Serialize};

/// Krylov method for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KspType {
    /// Conjugate gradients (SPD operator and preconditioner).
    #[default]
    Cg,
    /// Flexible GMRES; tolerates a preconditioner that changes between
    /// iterations.
    Fgmres,
}

impl KspType {
    pub fn petsc_name(&self) -> &'static str {
        match self {
            KspType::Cg => "cg",
            KspType::Fgmres => "fgmres",
        }
    }
}

/// Preconditioner for a sparse-matrix solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcType {
    None,
    #[default]
    Jacobi,
    /// Symmetric SOR, one sweep.
    Sor,
    /// Smoothed-aggregation algebraic multigrid, one V-cycle.
    Multigrid,
}

impl PcType {
    pub fn petsc_name(&self) -> &'static str {
        match self {
            PcType::None => "none",
            PcType::Jacobi => "jacobi",
            PcType::Sor => "sor",
            PcType::Multigrid => "gamg",
        }
    }
}

/// Krylov method, preconditioner and tolerances of one solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KspOptions {
    pub ksp_type: KspType,
    pub pc_type: PcType,
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub max_it: usize,
    /// Restart length for FGMRES.
    pub restart: usize,
    /// Log every iteration at debug level.
    pub monitor: bool,
}

impl Default for KspOptions {
    fn default() -> Self {
        Self {
            ksp_type: KspType::Cg,
            pc_type: PcType::Jacobi,
            rtol: 1e-5,
            atol: 1e-50,
            dtol: 1e5,
            max_it: 10_000,
            restart: 30,
            monitor: false,
        }
    }
}

impl KspOptions {
    pub fn cg(rtol: f64, max_it: usize) -> Self {
        Self { ksp_type: KspType::Cg, rtol, max_it, ..Self::default() }
    }

    pub fn fgmres(rtol: f64, max_it: usize, restart: usize) -> Self {
        Self { ksp_type: KspType::Fgmres, rtol, max_it, restart, ..Self::default() }
    }

    /// Velocity solves: FGMRES around one AMG V-cycle, tight enough that the
    /// implicit Schur complement looks like a fixed operator to the outer CG.
    pub fn velocity() -> Self {
        Self { pc_type: PcType::Multigrid, ..Self::fgmres(1e-8, 1000, 50) }
    }

    pub fn with_pc(mut self, pc_type: PcType) -> Self {
        self.pc_type = pc_type;
        self
    }

    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn validate(&self, name: &str) -> Result<(), StokesError> {
        if !(self.rtol > 0.0 && self.rtol < 1.0) {
            return Err(StokesError::Configuration(format!("{name}: rtol must lie in (0, 1), got {}", self.rtol)));
        }
        if !(self.atol >= 0.0) || !(self.dtol > 1.0) {
            return Err(StokesError::Configuration(format!("{name}: atol must be >= 0 and dtol > 1")));
        }
        if self.max_it == 0 {
            return Err(StokesError::Configuration(format!("{name}: max_it must be positive")));
        }
        if self.ksp_type == KspType::Fgmres && self.restart == 0 {
            return Err(StokesError::Configuration(format!("{name}: FGMRES restart must be positive")));
        }
        Ok(())
    }
}

/// Relaxation used on every multigrid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MgSmoother {
    #[default]
    Jacobi,
    /// Symmetric Gauss–Seidel / SOR.
    Sor,
}

/// Smoothed-aggregation AMG hierarchy and cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgOptions {
    pub max_levels: usize,
    /// Stop coarsening once a level has at most this many rows.
    pub coarse_size: usize,
    /// θ in |a_ij| ≥ θ·sqrt(|a_ii a_jj|).
    pub strength_threshold: f64,
    /// Damping of the prolongation smoother (I − ω D⁻¹A).
    pub prolongation_omega: f64,
    pub smoother: MgSmoother,
    pub jacobi_omega: f64,
    pub sor_omega: f64,
    pub nu_pre: usize,
    pub nu_post: usize,
}

impl Default for MgOptions {
    fn default() -> Self {
        Self {
            max_levels: 10,
            coarse_size: 50,
            strength_threshold: 0.08,
            prolongation_omega: 2.0 / 3.0,
            smoother: MgSmoother::Jacobi,
            jacobi_omega: 2.0 / 3.0,
            sor_omega: 1.0,
            nu_pre: 2,
            nu_post: 2,
        }
    }
}

/// Adaptive smoothing: grow the number of smoothing sweeps while a velocity
/// solve runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgAccelOptions {
    pub enabled: bool,
    pub smooths_min: usize,
    pub smooths_max: usize,
    pub smooths_to_start: usize,
    pub smoothing_increment: usize,
    pub acceleration: f64,
    pub target_cycles_10fold_reduction: usize,
    pub adjust_on_convergence_rate: bool,
}

impl Default for MgAccelOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            smooths_min: 1,
            smooths_max: 20,
            smooths_to_start: 1,
            smoothing_increment: 1,
            acceleration: 1.1,
            target_cycles_10fold_reduction: 5,
            adjust_on_convergence_rate: false,
        }
    }
}

/// Weighted Gᵗ K G preconditioner for the Schur complement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GtkgOptions {
    /// Weight with the inverse lumped velocity mass when one is supplied.
    pub mass_weighted: bool,
    /// Log inner Gram-solve iteration counts.
    pub monitor: bool,
    /// Solver for the Gram systems Gᵗ W G t = x.
    pub gram: KspOptions,
}

impl Default for GtkgOptions {
    fn default() -> Self {
        Self { mass_weighted: false, monitor: false, gram: KspOptions::cg(1e-8, 1000) }
    }
}

/// Augmented-Lagrangian penalty operator K2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum K2Type {
    #[default]
    None,
    /// diag(K)^½ G M⁻¹ Gᵗ diag(K)^½
    Dgmgd,
    /// G M⁻¹ Gᵗ
    Gmg,
    /// G Gᵗ. Leaves the solution unchanged only when C is absent.
    Gg,
    /// Supplied by the caller.
    External,
}

/// Preconditioner for the outer pressure solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchurPcType {
    None,
    /// Jacobi on a caller-supplied approximate Schur matrix.
    #[default]
    ApproxSchur,
    /// SSOR on D diag(K)⁻¹ G − C.
    ScaledSchur,
    /// Jacobi on diag(D diag(K)⁻¹ G − C).
    SchurDiagonal,
    Gtkg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Equilibrate K by row maxima and the pressure block through G.
    Full,
    /// Symmetric Jacobi scaling of K only.
    #[default]
    VelocityOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullSpaceMode {
    #[default]
    None,
    Constant,
    /// Even/odd checkerboard modes of a structured pressure grid.
    Checkerboard,
}

/// Options of one BSSCR solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BsscrOptions {
    pub k2_type: K2Type,
    pub penalty: f64,
    pub force_correction: bool,
    pub restore_k: bool,
    /// Restore K only after the velocity back-solve.
    pub restore_k_after_solve: bool,
    pub min_outer_its: usize,
    pub null_space: NullSpaceMode,
    pub null_space_tol: f64,
    pub scaling: bool,
    pub scaling_mode: ScalingMode,
    pub schur_pc: SchurPcType,
    pub velocity: KspOptions,
    /// Overrides `velocity` for the right-hand-side pre-solve.
    pub presolve: Option<KspOptions>,
    /// Overrides `velocity` for the final back-solve.
    pub backsolve: Option<KspOptions>,
    pub outer: KspOptions,
    pub mg: MgOptions,
    pub mg_accel: MgAccelOptions,
    pub gtkg: GtkgOptions,
    pub summary: bool,
}

impl Default for BsscrOptions {
    fn default() -> Self {
        Self {
            k2_type: K2Type::None,
            penalty: 0.0,
            force_correction: true,
            restore_k: true,
            restore_k_after_solve: false,
            min_outer_its: 0,
            null_space: NullSpaceMode::None,
            null_space_tol: 1e-7,
            scaling: false,
            scaling_mode: ScalingMode::VelocityOnly,
            schur_pc: SchurPcType::ApproxSchur,
            velocity: KspOptions::velocity(),
            presolve: None,
            backsolve: None,
            outer: KspOptions::cg(1e-5, 1000).with_pc(PcType::None),
            mg: MgOptions::default(),
            mg_accel: MgAccelOptions::default(),
            gtkg: GtkgOptions::default(),
            summary: true,
        }
    }
}

impl BsscrOptions {
    pub fn with_k2(mut self, k2_type: K2Type, penalty: f64) -> Self {
        self.k2_type = k2_type;
        self.penalty = penalty;
        self
    }

    pub fn with_force_correction(mut self, on: bool) -> Self {
        self.force_correction = on;
        self
    }

    pub fn with_restore(mut self, restore_k: bool, after_solve: bool) -> Self {
        self.restore_k = restore_k;
        self.restore_k_after_solve = after_solve;
        self
    }

    pub fn with_min_outer_its(mut self, its: usize) -> Self {
        self.min_outer_its = its;
        self
    }

    pub fn with_null_space(mut self, mode: NullSpaceMode) -> Self {
        self.null_space = mode;
        self
    }

    pub fn with_scaling(mut self, mode: ScalingMode) -> Self {
        self.scaling = true;
        self.scaling_mode = mode;
        self
    }

    pub fn with_schur_pc(mut self, pc: SchurPcType) -> Self {
        self.schur_pc = pc;
        self
    }

    pub fn with_velocity(mut self, opts: KspOptions) -> Self {
        self.velocity = opts;
        self
    }

    pub fn with_presolve(mut self, opts: KspOptions) -> Self {
        self.presolve = Some(opts);
        self
    }

    pub fn with_backsolve(mut self, opts: KspOptions) -> Self {
        self.backsolve = Some(opts);
        self
    }

    pub fn with_outer(mut self, opts: KspOptions) -> Self {
        self.outer = opts;
        self
    }

    pub fn with_mg(mut self, mg: MgOptions) -> Self {
        self.mg = mg;
        self
    }

    pub fn with_mg_accel(mut self, accel: MgAccelOptions) -> Self {
        self.mg_accel = accel;
        self
    }

    pub fn with_gtkg(mut self, gtkg: GtkgOptions) -> Self {
        self.gtkg = gtkg;
        self
    }

    pub fn with_summary(mut self, on: bool) -> Self {
        self.summary = on;
        self
    }

    /// Options for the pre-solve K f̃ = f.
    pub fn presolve_options(&self) -> &KspOptions {
        self.presolve.as_ref().unwrap_or(&self.velocity)
    }

    /// Options for the back-solve K u = f − G p.
    pub fn backsolve_options(&self) -> &KspOptions {
        self.backsolve.as_ref().unwrap_or(&self.velocity)
    }

    pub fn validate(&self) -> Result<(), StokesError> {
        if !self.penalty.is_finite() || self.penalty < 0.0 {
            return Err(StokesError::Configuration(format!("penalty must be finite and >= 0, got {}", self.penalty)));
        }
        if !(self.null_space_tol > 0.0) {
            return Err(StokesError::Configuration("null_space_tol must be positive".into()));
        }
        self.velocity.validate("velocity")?;
        self.outer.validate("outer")?;
        self.gtkg.gram.validate("gtkg.gram")?;
        if let Some(p) = &self.presolve {
            p.validate("presolve")?;
        }
        if let Some(b) = &self.backsolve {
            b.validate("backsolve")?;
        }
        let mg = &self.mg;
        if mg.max_levels == 0 || mg.nu_pre + mg.nu_post == 0 {
            return Err(StokesError::Configuration("mg: need at least one level and one smoothing sweep".into()));
        }
        if !(mg.jacobi_omega > 0.0 && mg.jacobi_omega <= 1.0) || !(mg.sor_omega > 0.0 && mg.sor_omega < 2.0) {
            return Err(StokesError::Configuration("mg: smoother damping out of range".into()));
        }
        let acc = &self.mg_accel;
        if acc.enabled {
            if acc.smooths_min == 0 || acc.smooths_min > acc.smooths_max {
                return Err(StokesError::Configuration(format!(
                    "mg_accel: need 1 <= smooths_min <= smooths_max, got {} and {}",
                    acc.smooths_min, acc.smooths_max
                )));
            }
            if acc.target_cycles_10fold_reduction == 0 || acc.acceleration < 1.0 {
                return Err(StokesError::Configuration(
                    "mg_accel: target_cycles_10fold_reduction must be positive and acceleration >= 1".into(),
                ));
            }
        }
        Ok(())
    }
}

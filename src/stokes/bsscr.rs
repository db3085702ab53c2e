//! Block Stokes Schur-complement reduction.
//!
//! Solves
//!
//! ```text
//! [K G] [u]   [f]
//! [D C] [p] = [h]
//! ```
//!
//! by eliminating the velocity: `(D K⁻¹ G − C) p = D K⁻¹ f − h`, solved with
//! an outer Krylov method whose every product performs an inner velocity
//! solve, followed by the back-substitution `K u = f − G p`. K may first be
//! augmented with a penalty term γ·K2 and the whole system diagonally
//! rescaled; both are undone before the solution is returned.
//!
//! The caller's operators are never touched. [`BsscrSolver::solve`] clones a
//! working copy and tracks the augmentation as a separate delta.

use crate::config::{BsscrOptions, KspOptions, KspType, PcType, SchurPcType};
use crate::context::{KspContext, build_preconditioner};
use crate::core::traits::InnerProduct;
use crate::core::vector;
use crate::error::{StokesError, check_dim};
use crate::matrix::{BlockOperator, BlockVector, CsrMatrix};
use crate::parallel::{Comm, Reduction, SerialComm};
use crate::preconditioner::{
    GtkgPc, Jacobi, Preconditioner, SharedSchedule, SmoothingSchedule, Sor, smoothing_monitor,
};
use crate::solver::{FgmresSolver, LinearSolver, PcgSolver};
use crate::stokes::k2::{Augmentation, AugmentationState, ExternalK2, build_k2, force_correction, is_augmented};
use crate::stokes::nullspace::{PressureGridLayout, PressureNullSpace};
use crate::stokes::scaling::{BlockScaling, report_operator_scales};
use crate::stokes::schur::{SchurComplement, approximate_schur};
use crate::stokes::summary::{PenaltyView, PhaseStats, SolveSummary, analyse};
use crate::utils::convergence::{ConvergedReason, Convergence, ConvergenceTest, MinIterations, SolveStats};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// ĥ is renormalised when ‖ĥ‖/‖G‖∞ falls inside this open interval.
const HNORM_RESCALE_RANGE: (f64, f64) = (1e-20, 1e-6);

/// A Stokes problem as handed over by the assembly layer.
#[derive(Debug, Clone)]
pub struct StokesSystem {
    pub op: BlockOperator,
    pub f: Vec<f64>,
    pub h: Vec<f64>,
    /// Pressure mass matrix (GMG/DGMGD penalty terms).
    pub pressure_mass: Option<CsrMatrix>,
    /// Velocity mass matrix (mass-weighted GtKG).
    pub velocity_mass: Option<CsrMatrix>,
    /// User-supplied approximation of S for `SchurPcType::ApproxSchur`.
    pub approx_schur: Option<CsrMatrix>,
    pub external_k2: Option<ExternalK2>,
    /// Grid index of every pressure dof (checkerboard null space).
    pub layout: Option<PressureGridLayout>,
    pub initial_u: Option<Vec<f64>>,
    pub initial_p: Option<Vec<f64>>,
}

impl StokesSystem {
    pub fn new(op: BlockOperator, f: Vec<f64>, h: Vec<f64>) -> Self {
        Self {
            op,
            f,
            h,
            pressure_mass: None,
            velocity_mass: None,
            approx_schur: None,
            external_k2: None,
            layout: None,
            initial_u: None,
            initial_p: None,
        }
    }

    pub fn with_pressure_mass(mut self, m: CsrMatrix) -> Self {
        self.pressure_mass = Some(m);
        self
    }

    pub fn with_velocity_mass(mut self, m: CsrMatrix) -> Self {
        self.velocity_mass = Some(m);
        self
    }

    pub fn with_approx_schur(mut self, s: CsrMatrix) -> Self {
        self.approx_schur = Some(s);
        self
    }

    pub fn with_external_k2(mut self, k2: ExternalK2) -> Self {
        self.external_k2 = Some(k2);
        self
    }

    pub fn with_layout(mut self, layout: PressureGridLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_initial_guess(mut self, u: Vec<f64>, p: Vec<f64>) -> Self {
        self.initial_u = Some(u);
        self.initial_p = Some(p);
        self
    }

    fn validate(&self) -> Result<(), StokesError> {
        self.op.validate()?;
        let n = self.op.velocity_dim();
        let m = self.op.pressure_dim();
        let square = |name: &'static str, a: &CsrMatrix, size: usize| -> Result<(), StokesError> {
            check_dim(name, size, a.nrows())?;
            check_dim(name, size, a.ncols())
        };
        if let Some(a) = &self.pressure_mass {
            square("pressure mass", a, m)?;
        }
        if let Some(a) = &self.velocity_mass {
            square("velocity mass", a, n)?;
        }
        if let Some(a) = &self.approx_schur {
            square("approximate Schur complement", a, m)?;
        }
        if let Some(ext) = &self.external_k2 {
            square("external K2", &ext.k2, n)?;
            if let Some(f2) = &ext.f2 {
                check_dim("external f2", n, f2.len())?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StokesSolution {
    pub u: Vec<f64>,
    pub p: Vec<f64>,
    pub reason: ConvergedReason,
    pub stats: SolveSummary,
}

impl StokesSolution {
    pub fn converged(&self) -> bool {
        self.reason.is_converged()
    }
}

/// Preconditioner of the outer pressure solve.
enum SchurPreconditioner<'a> {
    None,
    Boxed(Box<dyn Preconditioner>),
    Gtkg(Box<GtkgPc<'a>>),
}

impl SchurPreconditioner<'_> {
    fn as_dyn(&self) -> Option<&dyn Preconditioner> {
        match self {
            SchurPreconditioner::None => None,
            SchurPreconditioner::Boxed(pc) => Some(pc.as_ref()),
            SchurPreconditioner::Gtkg(pc) => Some(pc.as_ref()),
        }
    }
}

/// Augmented-Lagrangian BSSCR solver.
pub struct BsscrSolver {
    options: BsscrOptions,
    comm: Rc<dyn Comm>,
}

impl BsscrSolver {
    pub fn new(options: BsscrOptions) -> Self {
        Self { options, comm: Rc::new(SerialComm) }
    }

    pub fn with_comm(mut self, comm: Rc<dyn Comm>) -> Self {
        self.comm = comm;
        self
    }

    pub fn options(&self) -> &BsscrOptions {
        &self.options
    }

    fn reduction(&self) -> Reduction {
        Reduction::new(self.comm.clone())
    }

    /// Velocity solver for `k`; the smoothing schedule is only wired in for
    /// a multigrid preconditioner.
    fn velocity_solver(
        &self,
        opts: &KspOptions,
        k: &CsrMatrix,
        schedule: Option<&SharedSchedule>,
        label: &'static str,
    ) -> Result<KspContext, StokesError> {
        let schedule = schedule.filter(|_| opts.pc_type == PcType::Multigrid).cloned();
        let pc = build_preconditioner(opts.pc_type, k, &self.options.mg, schedule.clone())?;
        let ksp = KspContext::from_options(opts, pc, label).with_reduction(self.reduction());
        Ok(match schedule {
            Some(s) => ksp.with_monitor(smoothing_monitor(s)),
            None => ksp,
        })
    }

    fn schur_preconditioner<'a>(
        &self,
        op: &'a BlockOperator,
        d: &CsrMatrix,
        approx: Option<&CsrMatrix>,
        velocity_mass: Option<&CsrMatrix>,
        null_space: Vec<Vec<f64>>,
    ) -> Result<SchurPreconditioner<'a>, StokesError> {
        let pc = match self.options.schur_pc {
            SchurPcType::None => SchurPreconditioner::None,
            SchurPcType::ApproxSchur => match approx {
                Some(s) => SchurPreconditioner::Boxed(Box::new(Jacobi::from_diagonal(&s.diagonal()))),
                None => {
                    warn!("no approximate Schur complement supplied; outer solve is unpreconditioned");
                    SchurPreconditioner::None
                }
            },
            SchurPcType::ScaledSchur => {
                let s_hat = approximate_schur(&op.k, &op.g, d, op.c.as_ref())?;
                let mut sor = Sor::ssor(1.0);
                sor.setup(&s_hat)?;
                SchurPreconditioner::Boxed(Box::new(sor))
            }
            SchurPcType::SchurDiagonal => {
                let s_hat = approximate_schur(&op.k, &op.g, d, op.c.as_ref())?;
                SchurPreconditioner::Boxed(Box::new(Jacobi::from_diagonal(&s_hat.diagonal())))
            }
            SchurPcType::Gtkg => {
                let weight = match (self.options.gtkg.mass_weighted, velocity_mass) {
                    (true, Some(mass)) => {
                        let mut w = mass.diagonal();
                        vector::reciprocal(&mut w);
                        Some(w)
                    }
                    (true, None) => {
                        warn!("mass-weighted GtKG requested without a velocity mass matrix; using W = I");
                        None
                    }
                    (false, _) => None,
                };
                let mut pc = GtkgPc::new(self.options.gtkg.clone());
                pc.set_operators(&op.k, &op.g, op.c.as_ref(), weight.as_deref())?;
                if !null_space.is_empty() {
                    pc.attach_null_space(null_space)?;
                }
                pc.set_up()?;
                SchurPreconditioner::Gtkg(Box::new(pc))
            }
        };
        Ok(pc)
    }

    fn outer_solve(
        &self,
        s: &SchurComplement<'_>,
        pc: Option<&dyn Preconditioner>,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats, StokesError> {
        let o = &self.options.outer;
        let conv = Convergence::new(o.rtol, o.max_it).with_atol(o.atol).with_dtol(o.dtol);
        let conv: Box<dyn ConvergenceTest> = if self.options.min_outer_its > 0 {
            Box::new(MinIterations::new(conv, self.options.min_outer_its))
        } else {
            Box::new(conv)
        };
        match o.ksp_type {
            KspType::Cg => {
                let mut solver = PcgSolver::new(o.rtol, o.max_it).with_convergence_test(conv).with_reduction(self.reduction());
                if o.monitor {
                    solver = solver.with_trace("pressure");
                }
                solver.solve(s, pc, b, x)
            }
            KspType::Fgmres => {
                let mut solver =
                    FgmresSolver::new(o.rtol, o.max_it, o.restart).with_convergence_test(conv).with_reduction(self.reduction());
                if o.monitor {
                    solver = solver.with_trace("pressure");
                }
                solver.solve(s, pc, b, x)
            }
        }
    }

    pub fn solve(&self, system: &StokesSystem) -> Result<StokesSolution, StokesError> {
        let t_total = Instant::now();
        let opts = &self.options;
        let ip = self.reduction();
        opts.validate()?;
        system.validate()?;

        let mut op = system.op.clone();
        let mut vec = BlockVector::new(system.f.clone(), system.h.clone());
        if let Some(u) = &system.initial_u {
            vec.u = u.clone();
        }
        if let Some(p) = &system.initial_p {
            vec.p = p.clone();
        }
        vec.validate(&op)?;
        let mut pressure_mass = system.pressure_mass.clone();
        let mut velocity_mass = system.velocity_mass.clone();
        let mut approx = system.approx_schur.clone();
        let mut external = system.external_k2.clone();
        let mut summary = SolveSummary::default();

        // scaling
        let mut scaling = None;
        if opts.scaling {
            let t = Instant::now();
            let mut s = BlockScaling::build(&op, opts.scaling_mode)?;
            s.scale_system(&mut op, &mut vec)?;
            if let Some(a) = pressure_mass.as_mut() {
                s.scale_pressure_operator(a)?;
            }
            if let Some(a) = approx.as_mut() {
                s.scale_pressure_operator(a)?;
            }
            if let Some(a) = velocity_mass.as_mut() {
                s.scale_velocity_operator(a)?;
            }
            if let Some(ext) = external.as_mut() {
                s.scale_velocity_operator(&mut ext.k2)?;
                if let Some(f2) = ext.f2.as_mut() {
                    s.scale_velocity_rhs(f2)?;
                }
            }
            report_operator_scales(&op);
            summary.scaling_time = t.elapsed();
            scaling = Some(s);
        }

        // augmentation
        let mut augmentation = None;
        if is_augmented(opts.k2_type, opts.penalty) {
            let t = Instant::now();
            match build_k2(opts.k2_type, &op, pressure_mass.as_ref(), external.as_ref()) {
                Ok(Some(mut term)) => {
                    if opts.force_correction && term.f2.is_none() {
                        term.f2 = force_correction(term.kind, &op.g, &vec.h, pressure_mass.as_ref())?;
                    }
                    let mut aug = Augmentation::new(term, opts.penalty);
                    aug.apply(&mut op.k, &mut vec.f)?;
                    augmentation = Some(aug);
                }
                Ok(None) => {}
                Err(StokesError::Configuration(msg)) => {
                    warn!(%msg, "K2 unavailable; solving without augmentation");
                    summary.k2_fallback = Some(msg);
                }
                Err(e) => return Err(e),
            }
            summary.augmentation_time = t.elapsed();
        }
        summary.augmented = augmentation.is_some();
        summary.penalty = if summary.augmented { opts.penalty } else { 0.0 };

        let schedule = opts.mg_accel.enabled.then(|| SmoothingSchedule::from_options(&opts.mg_accel).into_shared());
        let n = op.velocity_dim();
        let m = op.pressure_dim();

        // pressure solve; everything borrowing the working blocks lives in
        // this scope so K can be restored afterwards
        let (p, velocity) = {
            let d = op.d()?;
            let velocity = self.velocity_solver(&opts.velocity, &op.k, schedule.as_ref(), "velocity")?;
            let schur = SchurComplement::new(&op.k, &op.g, d, op.c.as_ref(), velocity)?;

            let t = Instant::now();
            let mut f_tilde = vec![0.0; n];
            let pre = match &opts.presolve {
                Some(po) => self.velocity_solver(po, &op.k, schedule.as_ref(), "presolve")?.solve(&op.k, &vec.f, &mut f_tilde)?,
                None => schur.solve_velocity(&vec.f, &mut f_tilde)?,
            };
            summary.presolve = PhaseStats::from_stats(&pre, t.elapsed());
            log_phase("pre-solve", &summary.presolve);

            let mut h_hat = vec![0.0; m];
            d.spmv(&f_tilde, &mut h_hat);
            vector::axpy(-1.0, &vec.h, &mut h_hat);

            let g_inf = op.g.norm_inf();
            let hnorm = if g_inf > 0.0 { ip.norm(&h_hat) / g_inf } else { 0.0 };
            summary.hnorm = hnorm;
            let mut p = vec.p.clone();
            if hnorm > HNORM_RESCALE_RANGE.0 && hnorm < HNORM_RESCALE_RANGE.1 {
                debug!(hnorm, "rescaling the pressure right-hand side");
                vector::scale(1.0 / hnorm, &mut h_hat);
                vector::scale(1.0 / hnorm, &mut p);
                summary.hnorm_rescaled = true;
            }

            let null_space =
                PressureNullSpace::from_mode(opts.null_space, m, system.layout.as_ref(), scaling.as_ref().map(|s| s.r2()))?;
            if let Some(ns) = &null_space {
                summary.null_space_removed += ns.remove(&mut h_hat, &op.g, opts.null_space_tol)?;
            }
            let attached = match &null_space {
                Some(ns) => ns.annihilated_by(&op.g, opts.null_space_tol)?,
                None => Vec::new(),
            };

            let pc = self.schur_preconditioner(&op, d, approx.as_ref(), velocity_mass.as_ref(), attached)?;
            let t = Instant::now();
            let outer = self.outer_solve(&schur, pc.as_dyn(), &h_hat, &mut p)?;
            if let Some(e) = schur.take_error() {
                return Err(e);
            }
            summary.pressure = PhaseStats::from_stats(&outer, t.elapsed());
            summary.pressure_velocity_iterations = schur.inner_iterations();
            summary.inner_failure = schur.first_failure();
            if let SchurPreconditioner::Gtkg(g) = &pc {
                summary.gtkg_inner_iterations = g.inner_iterations();
                summary.gtkg_inner_failures = g.inner_failures();
            }
            log_phase("pressure", &summary.pressure);

            if let Some(ns) = &null_space {
                summary.null_space_removed += ns.remove(&mut p, &op.g, opts.null_space_tol)?;
            }
            if summary.hnorm_rescaled {
                vector::scale(hnorm, &mut p);
            }
            drop(pc);
            (p, schur.into_velocity_solver())
        };
        vec.p = p;

        // back-solve
        let restore_before = opts.restore_k && !opts.restore_k_after_solve;
        if let Some(aug) = augmentation.as_mut().filter(|_| restore_before) {
            aug.restore(&mut op.k, &mut vec.f)?;
        }
        let k_changed = augmentation.as_ref().is_some_and(|a| a.state() == AugmentationState::Restored);
        let mut backsolver = if opts.backsolve.is_some() || k_changed {
            self.velocity_solver(opts.backsolve_options(), &op.k, schedule.as_ref(), "backsolve")?
        } else {
            velocity
        };
        let mut rhs = vec.f.clone();
        let mut gp = vec![0.0; n];
        op.g.spmv(&vec.p, &mut gp);
        vector::axpy(-1.0, &gp, &mut rhs);
        let t = Instant::now();
        let back = backsolver.solve(&op.k, &rhs, &mut vec.u)?;
        summary.backsolve = PhaseStats::from_stats(&back, t.elapsed());
        log_phase("back-solve", &summary.backsolve);
        summary.total_velocity_iterations =
            summary.presolve.iterations + summary.pressure_velocity_iterations + summary.backsolve.iterations;

        // K is always handed to the diagnostics un-augmented
        if let Some(aug) = augmentation.as_mut().filter(|a| a.state() == AugmentationState::Applied) {
            aug.restore(&mut op.k, &mut vec.f)?;
        }

        let mut physical_k2 = None;
        if let Some(s) = scaling.as_mut() {
            s.unscale_system(&mut op, &mut vec)?;
            if let Some(aug) = &augmentation {
                let mut k2 = aug.term().k2.clone();
                s.scale_velocity_operator(&mut k2)?;
                let mut f2 = aug.term().f2.clone();
                if let Some(f2) = f2.as_mut() {
                    s.scale_velocity_rhs(f2)?;
                }
                physical_k2 = Some((k2, f2));
            }
        } else if let Some(aug) = &augmentation {
            physical_k2 = Some((aug.term().k2.clone(), aug.term().f2.clone()));
        }

        if let Some(s) = &schedule {
            let s = s.lock().map_err(|_| StokesError::InvalidState("smoothing schedule lock poisoned"))?;
            summary.smoothing_cycles = s.cycles;
            summary.smoothing_sweeps = s.sweeps;
        }

        if opts.summary {
            let view = physical_k2.as_ref().map(|(k2, f2)| PenaltyView { k2, penalty: opts.penalty, f2: f2.as_deref() });
            summary.diagnostics = Some(analyse(&op, &vec.f, &vec.h, &vec.u, &vec.p, view, &ip)?);
        }
        summary.total_time = t_total.elapsed();
        let reason = summary.overall_reason();
        if opts.summary {
            info!("{summary}");
        }
        info!(reason = %reason, time = summary.total_time.as_secs_f64(), "BSSCR solve finished");

        Ok(StokesSolution { u: vec.u, p: vec.p, reason, stats: summary })
    }
}

fn log_phase(phase: &'static str, stats: &PhaseStats) {
    info!(
        phase,
        iterations = stats.iterations,
        time = stats.time.as_secs_f64(),
        residual = stats.final_residual,
        reason = %stats.reason,
        "BSSCR phase"
    );
    if stats.reason.is_diverged() {
        warn!(phase, reason = %stats.reason, "BSSCR phase did not converge");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{K2Type, NullSpaceMode, ScalingMode};

    // K = diag(2, 3, 4), G = [1 0; -1 1; 0 2], optionally C = -0.1 I;
    // exact solution u = (1, 2, 3), p = (1, -1)
    fn system(stabilised: bool) -> StokesSystem {
        let k = CsrMatrix::from_diagonal(&[2.0, 3.0, 4.0]);
        let g = CsrMatrix::from_triplets(3, 2, &[(0, 0, 1.0), (1, 0, -1.0), (1, 1, 1.0), (2, 1, 2.0)]).unwrap();
        let c = stabilised.then(|| CsrMatrix::from_diagonal(&[-0.1, -0.1]));
        let op = BlockOperator::with_transposed_coupling(k, g, c);
        let f = vec![2.0 + 1.0, 6.0 - 1.0 - 1.0, 12.0 - 2.0];
        let h = if stabilised { vec![1.0 - 2.0 - 0.1, 2.0 + 6.0 + 0.1] } else { vec![1.0 - 2.0, 2.0 + 6.0] };
        StokesSystem::new(op, f, h)
    }

    fn options() -> BsscrOptions {
        let tight = KspOptions::cg(1e-12, 200);
        BsscrOptions::default().with_velocity(tight).with_outer(KspOptions::cg(1e-12, 200).with_pc(PcType::None))
    }

    fn assert_exact(sol: &StokesSolution) {
        for (a, b) in sol.u.iter().zip([1.0, 2.0, 3.0]) {
            assert!((a - b).abs() < 1e-8, "u = {:?}", sol.u);
        }
        for (a, b) in sol.p.iter().zip([1.0, -1.0]) {
            assert!((a - b).abs() < 1e-8, "p = {:?}", sol.p);
        }
    }

    #[test]
    fn plain_solve_recovers_the_solution() {
        let sol = BsscrSolver::new(options().with_schur_pc(SchurPcType::SchurDiagonal)).solve(&system(true)).unwrap();
        assert!(sol.converged());
        assert_exact(&sol);
        let d = sol.stats.diagnostics.as_ref().unwrap();
        assert!(d.momentum_residual < 1e-8 && d.continuity_residual < 1e-8);
        assert!(sol.stats.pressure_velocity_iterations > 0);
    }

    #[test]
    fn scaled_and_augmented_solve_recovers_the_solution() {
        // the penalty term only leaves the solution unchanged when C = 0
        let opts = options()
            .with_scaling(ScalingMode::Full)
            .with_k2(K2Type::Gg, 10.0)
            .with_schur_pc(SchurPcType::ScaledSchur);
        let sol = BsscrSolver::new(opts).solve(&system(false)).unwrap();
        assert!(sol.stats.augmented);
        assert_exact(&sol);
        assert!(sol.stats.diagnostics.as_ref().unwrap().augmented_momentum_residual.unwrap() < 1e-7);
    }

    #[test]
    fn missing_pressure_mass_falls_back() {
        let opts = options().with_k2(K2Type::Gmg, 10.0).with_schur_pc(SchurPcType::None);
        let sol = BsscrSolver::new(opts).solve(&system(true)).unwrap();
        assert!(!sol.stats.augmented);
        assert!(sol.stats.k2_fallback.is_some());
        assert_exact(&sol);
    }

    #[test]
    fn missing_d_and_bad_aux_shapes_are_errors() {
        let mut s = system(true);
        s.op.d = None;
        assert!(matches!(BsscrSolver::new(options()).solve(&s), Err(StokesError::MissingOperator("D"))));
        let s = system(true).with_pressure_mass(CsrMatrix::identity(3));
        assert!(matches!(BsscrSolver::new(options()).solve(&s), Err(StokesError::DimensionMismatch { .. })));
    }

    #[test]
    fn constant_null_space_is_ignored_when_g_does_not_annihilate_it() {
        let opts = options().with_null_space(NullSpaceMode::Constant);
        let sol = BsscrSolver::new(opts).solve(&system(true)).unwrap();
        assert_eq!(sol.stats.null_space_removed, 0);
        assert_exact(&sol);
    }
}

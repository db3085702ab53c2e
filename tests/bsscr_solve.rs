//! End-to-end BSSCR solves on a Q1-P0 Stokes discretisation and on random
//! saddle-point systems, checked against manufactured solutions and a dense
//! LU reference.

mod common;

use approx::assert_abs_diff_eq;
use bsscr::config::{GtkgOptions, MgAccelOptions};
use bsscr::solver::LuSolver;
use bsscr::stokes::PressureNullSpace;
use bsscr::{
    BsscrOptions, BsscrSolver, CsrMatrix, K2Type, KspOptions, NullSpaceMode, PcType, ScalingMode, SchurPcType,
    StokesSystem,
};
use common::{Q1P0, dense_saddle, manufacture, random_blocks, random_vec, rel_error};

/// Full GMRES (restart above n) with AMG: the velocity solves are exact up
/// to `rtol` whatever the penalty.
fn velocity(rtol: f64) -> KspOptions {
    KspOptions::fgmres(rtol, 500, 120).with_pc(PcType::Multigrid)
}

fn base_options() -> BsscrOptions {
    BsscrOptions::default()
        .with_velocity(velocity(1e-12))
        .with_outer(KspOptions::cg(1e-10, 1000).with_pc(PcType::None))
        .with_schur_pc(SchurPcType::None)
}

/// p with its null-space content removed.
fn without_null_space(p: &[f64], ns: &PressureNullSpace) -> Vec<f64> {
    let mut q = p.to_vec();
    for (nv, c) in ns.vectors().iter().zip(ns.content(p)) {
        for (qi, vi) in q.iter_mut().zip(nv) {
            *qi -= c * vi;
        }
    }
    q
}

#[test]
fn stabilised_q1p0_matches_dense_lu() {
    let mut grid = Q1P0::new(8, 8);
    let m = grid.pressure_dim();
    grid.op.c = Some(CsrMatrix::from_diagonal(&vec![-1e-2; m]));
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(m));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);

    let mut lu = LuSolver::new();
    lu.factor(&dense_saddle(&grid.op)).unwrap();
    let rhs: Vec<f64> = f.iter().chain(&h).copied().collect();
    let mut reference = vec![0.0; rhs.len()];
    lu.solve_cached(&rhs, &mut reference).unwrap();

    let system = StokesSystem::new(grid.op.clone(), f, h);
    let sol = BsscrSolver::new(base_options().with_schur_pc(SchurPcType::SchurDiagonal)).solve(&system).unwrap();
    assert!(sol.converged(), "{}", sol.stats);
    let n = sol.u.len();
    assert!(rel_error(&sol.u, &reference[..n]) < 1e-6);
    assert!(rel_error(&sol.p, &reference[n..]) < 1e-6);
    assert!(rel_error(&sol.u, &u_star) < 1e-6);
}

#[test]
fn enclosed_flow_removes_checkerboard_and_constant_modes() {
    let grid = Q1P0::new(8, 8);
    let m = grid.pressure_dim();
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(m));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);
    let system = StokesSystem::new(grid.op.clone(), f, h).with_layout(grid.layout());
    let opts = base_options()
        .with_outer(KspOptions::cg(1e-8, 1000).with_pc(PcType::None))
        .with_null_space(NullSpaceMode::Checkerboard)
        .with_schur_pc(SchurPcType::Gtkg)
        .with_gtkg(GtkgOptions { gram: KspOptions::cg(1e-12, 1000), ..Default::default() });
    let sol = BsscrSolver::new(opts).solve(&system).unwrap();

    assert!(sol.converged(), "{}", sol.stats);
    assert!(sol.stats.pressure.iterations < 50, "{} outer iterations for {m} pressures", sol.stats.pressure.iterations);
    assert!(sol.stats.pressure.relative_residual() < 1e-6, "{}", sol.stats.pressure);
    assert!(sol.stats.null_space_removed > 0);
    let ns = PressureNullSpace::checkerboard(&grid.layout(), None).unwrap();
    for c in ns.content(&sol.p) {
        assert!(c.abs() < 1e-8, "null-space content {c}");
    }
    assert!(rel_error(&sol.u, &u_star) < 1e-5);
    assert!(rel_error(&sol.p, &without_null_space(&p_star, &ns)) < 1e-5);
    let d = sol.stats.diagnostics.as_ref().unwrap();
    assert!(d.momentum_residual_ratio < 1e-8);
}

#[test]
fn default_options_solve_on_several_grid_sizes() {
    for nx in [4, 5, 6, 8, 12] {
        let grid = Q1P0::new(nx, nx);
        let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
        let (f, h) = manufacture(&grid.op, &u_star, &p_star);
        let system = StokesSystem::new(grid.op.clone(), f, h);
        let sol = BsscrSolver::new(BsscrOptions::default())
            .solve(&system)
            .unwrap_or_else(|e| panic!("nx = {nx}: {e}"));
        assert!(sol.u.iter().chain(&sol.p).all(|v| v.is_finite()), "nx = {nx}");
        assert!(sol.converged(), "nx = {nx}: {}", sol.stats);
    }
}

#[test]
fn gg_penalty_back_solve_uses_the_restored_operator() {
    let grid = Q1P0::new(8, 8);
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);
    let system = StokesSystem::new(grid.op.clone(), f, h).with_layout(grid.layout());
    let opts = base_options()
        .with_velocity(velocity(1e-10))
        .with_k2(K2Type::Gg, 1e3)
        .with_null_space(NullSpaceMode::Checkerboard);
    let sol = BsscrSolver::new(opts).solve(&system).unwrap();

    assert!(sol.converged(), "{}", sol.stats);
    assert!(sol.stats.augmented);
    let d = sol.stats.diagnostics.as_ref().unwrap();
    assert!(d.momentum_residual_ratio < 1e-6, "{}", d.momentum_residual_ratio);
    assert!(d.augmented_momentum_residual.is_some());
    assert!(d.k2_norms.is_some());
    assert!(rel_error(&sol.u, &u_star) < 1e-5);
    // the caller's K is untouched
    assert_eq!(system.op.k, grid.op.k);
}

#[test]
fn missing_pressure_mass_falls_back_to_plain_solve() {
    let grid = Q1P0::new(4, 4);
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);
    let system = StokesSystem::new(grid.op.clone(), f, h).with_layout(grid.layout());
    let opts = base_options().with_k2(K2Type::Gmg, 1e2).with_null_space(NullSpaceMode::Checkerboard);
    let sol = BsscrSolver::new(opts).solve(&system).unwrap();
    assert!(!sol.stats.augmented);
    assert!(sol.stats.k2_fallback.as_deref().is_some_and(|m| m.contains("pressure mass")));
    assert!(sol.converged());
    assert!(rel_error(&sol.u, &u_star) < 1e-6);
}

#[test]
fn scaled_gmg_solve_agrees_with_unscaled() {
    let grid = Q1P0::new(6, 6);
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);
    let system = StokesSystem::new(grid.op.clone(), f, h)
        .with_layout(grid.layout())
        .with_pressure_mass(grid.pressure_mass.clone());
    let opts = base_options().with_null_space(NullSpaceMode::Checkerboard).with_k2(K2Type::Gmg, 10.0);
    let plain = BsscrSolver::new(opts.clone()).solve(&system).unwrap();
    for mode in [ScalingMode::Full, ScalingMode::VelocityOnly] {
        let scaled = BsscrSolver::new(opts.clone().with_scaling(mode)).solve(&system).unwrap();
        assert!(scaled.converged(), "{mode:?}: {}", scaled.stats);
        for (a, b) in scaled.u.iter().zip(&plain.u) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
        assert!(scaled.stats.diagnostics.as_ref().unwrap().momentum_residual_ratio < 1e-8);
    }
}

#[test]
fn mass_weighted_gtkg_preconditioner() {
    let grid = Q1P0::new(8, 8);
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);
    let system = StokesSystem::new(grid.op.clone(), f, h)
        .with_layout(grid.layout())
        .with_velocity_mass(grid.velocity_mass.clone());
    let opts = base_options()
        .with_outer(KspOptions::fgmres(1e-8, 500, 100).with_pc(PcType::None))
        .with_null_space(NullSpaceMode::Checkerboard)
        .with_schur_pc(SchurPcType::Gtkg)
        .with_gtkg(GtkgOptions { mass_weighted: true, gram: KspOptions::cg(1e-12, 1000), ..Default::default() });
    let sol = BsscrSolver::new(opts).solve(&system).unwrap();
    assert!(sol.converged(), "{}", sol.stats);
    assert!(sol.stats.gtkg_inner_iterations > 0);
    assert_eq!(sol.stats.gtkg_inner_failures, 0);
    assert!(rel_error(&sol.u, &u_star) < 1e-5);
}

#[test]
fn adaptive_smoothing_records_work() {
    let grid = Q1P0::new(8, 8);
    let (u_star, p_star) = (random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
    let (f, h) = manufacture(&grid.op, &u_star, &p_star);
    let system = StokesSystem::new(grid.op.clone(), f, h).with_layout(grid.layout());
    let accel = MgAccelOptions { enabled: true, smooths_to_start: 1, smooths_max: 6, ..Default::default() };
    let opts = base_options().with_null_space(NullSpaceMode::Checkerboard).with_mg_accel(accel);
    let sol = BsscrSolver::new(opts).solve(&system).unwrap();
    assert!(sol.converged(), "{}", sol.stats);
    assert!(sol.stats.smoothing_cycles > 0);
    assert!(sol.stats.smoothing_sweeps >= 2 * sol.stats.smoothing_cycles);
    assert!(rel_error(&sol.u, &u_star) < 1e-5);
}

#[test]
fn random_saddle_point_matches_dense_lu() {
    let op = random_blocks(30, 8);
    let (u_star, p_star) = (random_vec(30), random_vec(8));
    let (f, h) = manufacture(&op, &u_star, &p_star);
    let system = StokesSystem::new(op.clone(), f, h);
    let opts = base_options().with_velocity(KspOptions::cg(1e-13, 500)).with_schur_pc(SchurPcType::ScaledSchur);
    let sol = BsscrSolver::new(opts).solve(&system).unwrap();
    assert!(sol.converged(), "{}", sol.stats);
    for (a, b) in sol.u.iter().zip(&u_star) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-7);
    }
    for (a, b) in sol.p.iter().zip(&p_star) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-7);
    }
    assert_eq!(
        sol.stats.total_velocity_iterations,
        sol.stats.presolve.iterations + sol.stats.pressure_velocity_iterations + sol.stats.backsolve.iterations
    );
}

#[test]
fn minimum_outer_iterations_are_enforced() {
    let op = random_blocks(20, 6);
    let (f, h) = manufacture(&op, &random_vec(20), &random_vec(6));
    let system = StokesSystem::new(op, f, h);
    // an absolute tolerance this loose is met before the first iteration
    let loose = KspOptions::cg(1e-10, 100).with_pc(PcType::None).with_atol(1e10);
    let free = BsscrSolver::new(base_options().with_outer(loose.clone())).solve(&system).unwrap();
    assert_eq!(free.stats.pressure.iterations, 0);
    let held = BsscrSolver::new(base_options().with_outer(loose).with_min_outer_its(3)).solve(&system).unwrap();
    assert!(held.stats.pressure.iterations >= 3);
    assert!(held.converged());
}

#[cfg(feature = "rayon")]
#[test]
fn rayon_communicator_gives_the_serial_answer() {
    use bsscr::parallel::RayonComm;
    use std::rc::Rc;

    let op = random_blocks(24, 6);
    let (u_star, p_star) = (random_vec(24), random_vec(6));
    let (f, h) = manufacture(&op, &u_star, &p_star);
    let system = StokesSystem::new(op, f, h);
    let opts = base_options().with_velocity(KspOptions::cg(1e-13, 500));
    let comm = RayonComm::with_threads(2);
    assert!(comm.threads() >= 1);
    let sol = BsscrSolver::new(opts).with_comm(Rc::new(comm)).solve(&system).unwrap();
    assert!(sol.converged(), "{}", sol.stats);
    assert!(rel_error(&sol.u, &u_star) < 1e-7);
    assert!(rel_error(&sol.p, &p_star) < 1e-7);
}

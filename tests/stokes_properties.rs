//! Algebraic laws of the building blocks: scaling round trips, projection
//! idempotence, reversible augmentation, monotone smoothing schedules and the
//! minimum-iteration floor.

mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use bsscr::config::MgAccelOptions;
use bsscr::matrix::BlockVector;
use bsscr::preconditioner::SmoothingSchedule;
use bsscr::stokes::k2::{Augmentation, build_k2, force_correction};
use bsscr::stokes::nullspace::remove_null_space_component;
use bsscr::stokes::{BlockScaling, PressureNullSpace};
use bsscr::utils::{ConvergedReason, Convergence, ConvergenceTest, MinIterations};
use bsscr::{K2Type, ScalingMode, StokesError};
use common::{Q1P0, random_vec};
use rand::Rng;

#[test]
fn scaling_round_trip_restores_operator_and_vectors() {
    let grid = Q1P0::new(6, 5);
    for mode in [ScalingMode::Full, ScalingMode::VelocityOnly] {
        let mut op = grid.op.clone();
        let mut v = BlockVector::new(random_vec(grid.velocity_dim()), random_vec(grid.pressure_dim()));
        v.u = random_vec(grid.velocity_dim());
        v.p = random_vec(grid.pressure_dim());
        let v0 = v.clone();
        let mut s = BlockScaling::build(&op, mode).unwrap();
        s.scale_system(&mut op, &mut v).unwrap();
        assert!(matches!(s.scale_system(&mut op, &mut v), Err(StokesError::InvalidState(_))));
        s.unscale_system(&mut op, &mut v).unwrap();
        for (a, b) in [(&op.k, &grid.op.k), (&op.g, &grid.op.g)] {
            for (x, y) in a.values().iter().zip(b.values()) {
                assert_relative_eq!(*x, *y, max_relative = 1e-13);
            }
        }
        for (x, y) in v.u.iter().chain(&v.p).chain(&v.f).chain(&v.h).zip(v0.u.iter().chain(&v0.p).chain(&v0.f).chain(&v0.h)) {
            assert_relative_eq!(*x, *y, max_relative = 1e-13);
        }
    }
}

#[test]
fn null_space_projection_is_idempotent() {
    let grid = Q1P0::new(8, 8);
    let ns = PressureNullSpace::checkerboard(&grid.layout(), None).unwrap();
    let mut x = random_vec(grid.pressure_dim());
    for nv in ns.vectors() {
        assert!(remove_null_space_component(&mut x, nv, 1e-7, &grid.op.g).unwrap());
    }
    let once = x.clone();
    for nv in ns.vectors() {
        remove_null_space_component(&mut x, nv, 1e-7, &grid.op.g).unwrap();
    }
    for (a, b) in x.iter().zip(&once) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-14);
    }
    for c in ns.content(&x) {
        assert_abs_diff_eq!(c, 0.0, epsilon = 1e-14);
    }
}

#[test]
fn augmentation_is_reversible_for_every_kind() {
    let grid = Q1P0::new(5, 5);
    let h = random_vec(grid.pressure_dim());
    for kind in [K2Type::Gg, K2Type::Gmg, K2Type::Dgmgd] {
        let mut term = build_k2(kind, &grid.op, Some(&grid.pressure_mass), None).unwrap().unwrap();
        term.f2 = force_correction(kind, &grid.op.g, &h, Some(&grid.pressure_mass)).unwrap();
        let mut aug = Augmentation::new(term, 1e3);
        let mut k = grid.op.k.clone();
        let f0 = random_vec(grid.velocity_dim());
        let mut f = f0.clone();
        aug.apply(&mut k, &mut f).unwrap();
        assert!(k.norm_inf() > grid.op.k.norm_inf());
        aug.restore(&mut k, &mut f).unwrap();
        let scale = grid.op.k.norm_inf() + 1e3 * aug.term().k2.norm_inf();
        for i in 0..k.nrows() {
            for j in 0..k.ncols() {
                assert_abs_diff_eq!(k.get(i, j), grid.op.k.get(i, j), epsilon = 1e-13 * scale);
            }
        }
        for (a, b) in f.iter().zip(&f0) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
        assert!(matches!(aug.restore(&mut k, &mut f), Err(StokesError::InvalidState(_))));
    }
}

#[test]
fn smoothing_schedule_is_monotone_and_bounded() {
    let mut rng = rand::thread_rng();
    for adjust in [false, true] {
        let opts = MgAccelOptions {
            enabled: true,
            smooths_max: 9,
            target_cycles_10fold_reduction: 3,
            adjust_on_convergence_rate: adjust,
            acceleration: 1.5,
            ..Default::default()
        };
        let mut s = SmoothingSchedule::from_options(&opts);
        let mut prev = s.on_iteration(0, 1.0);
        let mut rnorm = 1.0;
        for it in 1..200 {
            rnorm *= rng.gen_range(0.05..1.2);
            let cur = s.on_iteration(it, rnorm);
            assert!(cur >= prev, "smooths dropped from {prev} to {cur}");
            assert!(cur <= 9);
            prev = cur;
        }
    }
}

#[test]
fn minimum_iteration_floor_holds_back_convergence() {
    let floor = MinIterations::new(Convergence::new(1e-6, 100), 10);
    for it in 0..10 {
        assert_eq!(floor.test(it, 1e-12, 1.0), ConvergedReason::Iterating);
    }
    assert_eq!(floor.test(10, 1e-12, 1.0), ConvergedReason::ConvergedRtol);
    // divergence other than the iteration cap is never held back
    assert_eq!(floor.test(3, f64::NAN, 1.0), ConvergedReason::DivergedNanOrInf);
}

//! Adaptive multigrid smoothing.
//!
//! A velocity solve that stalls usually needs stronger smoothing, not more
//! Krylov iterations. [`SmoothingSchedule`] is driven from the Krylov monitor
//! (once per iteration) and raises the number of smoothing sweeps every
//! `target_cycles_10fold_reduction` iterations until `smooths_max`. The AMG
//! preconditioner reads `current` on every cycle and records the work done.

use crate::config::MgAccelOptions;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingSchedule {
    pub current: usize,
    pub min: usize,
    pub max: usize,
    pub start: usize,
    pub increment: usize,
    pub target_cycles_10fold_reduction: usize,
    pub acceleration: f64,
    pub adjust_on_convergence_rate: bool,
    /// V-cycles applied since construction.
    pub cycles: usize,
    /// Smoothing sweeps applied since construction.
    pub sweeps: usize,
    /// Smoothing sweeps applied in the current solve.
    pub solve_sweeps: usize,
    last_check_rnorm: Option<f64>,
}

/// Schedule shared between a Krylov monitor and the multigrid cycle.
pub type SharedSchedule = Arc<Mutex<SmoothingSchedule>>;

impl SmoothingSchedule {
    pub fn from_options(opts: &MgAccelOptions) -> Self {
        let min = opts.smooths_min.max(1);
        let max = opts.smooths_max.max(min);
        let start = opts.smooths_to_start;
        Self {
            current: start.clamp(min, max),
            min,
            max,
            start,
            increment: opts.smoothing_increment.max(1),
            target_cycles_10fold_reduction: opts.target_cycles_10fold_reduction,
            acceleration: opts.acceleration,
            adjust_on_convergence_rate: opts.adjust_on_convergence_rate,
            cycles: 0,
            sweeps: 0,
            solve_sweeps: 0,
            last_check_rnorm: None,
        }
    }

    pub fn into_shared(self) -> SharedSchedule {
        Arc::new(Mutex::new(self))
    }

    /// Update for Krylov iteration `n` with residual norm `rnorm`; returns the
    /// sweep count to use from now on.
    pub fn on_iteration(&mut self, n: usize, rnorm: f64) -> usize {
        if n == 0 {
            self.current = self.start.clamp(self.min, self.max);
            self.solve_sweeps = 0;
            self.last_check_rnorm = Some(rnorm);
            return self.current;
        }
        let target = self.target_cycles_10fold_reduction;
        if target == 0 || n % target != 0 || self.current >= self.max {
            return self.current;
        }
        let step = if self.adjust_on_convergence_rate {
            // Only push harder when the last window missed a tenfold drop.
            let fast = matches!(self.last_check_rnorm, Some(prev) if rnorm <= 0.1 * prev);
            self.last_check_rnorm = Some(rnorm);
            if fast {
                return self.current;
            }
            let grown = (self.current as f64 * (self.acceleration - 1.0)).round();
            self.increment.max(grown as usize)
        } else {
            self.increment
        };
        let previous = self.current;
        self.current = self.current.saturating_add(step).min(self.max);
        debug!(iteration = n, rnorm, from = previous, to = self.current, "increasing multigrid smoothing");
        self.current
    }

    pub fn record_cycle(&mut self, sweeps: usize) {
        self.cycles += 1;
        self.sweeps += sweeps;
        self.solve_sweeps += sweeps;
    }
}

/// Krylov monitor that drives a shared schedule.
pub fn smoothing_monitor(shared: SharedSchedule) -> impl FnMut(usize, f64) + 'static {
    move |n, rnorm| {
        if let Ok(mut schedule) = shared.lock() {
            schedule.on_iteration(n, rnorm);
        }
    }
}

//! The Stokes saddle-point layer: scaling, augmentation, null space, the
//! implicit Schur complement and the BSSCR orchestrator built on them.

pub mod bsscr;
pub mod k2;
pub mod nullspace;
pub mod scaling;
pub mod schur;
pub mod summary;

pub use bsscr::{BsscrSolver, StokesSolution, StokesSystem};
pub use k2::{Augmentation, AugmentationState, AugmentedTerm, ExternalK2};
pub use nullspace::{PressureGridLayout, PressureNullSpace};
pub use scaling::BlockScaling;
pub use schur::SchurComplement;
pub use summary::{Diagnostics, PhaseStats, SolveSummary};

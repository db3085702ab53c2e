//! Configuration types.

pub mod options;

pub use options::{
    BsscrOptions, GtkgOptions, K2Type, KspOptions, KspType, MgAccelOptions, MgOptions, MgSmoother,
    NullSpaceMode, PcType, ScalingMode, SchurPcType,
};

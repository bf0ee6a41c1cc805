//! tpc-core: Shared types for TPC pad readout processing
//!
//! Pad samples, chip-group addressing, readout geometry, per-pad
//! calibration tables and fixed-point helpers used by the common mode
//! correction crates.

mod calibration;
mod error;
mod fixed_point;
mod geometry;
mod sample;

pub use calibration::*;
pub use error::*;
pub use fixed_point::*;
pub use geometry::*;
pub use sample::*;

/// Largest value an ADC sample can carry
pub const MAX_ADC: f32 = 1023.75;

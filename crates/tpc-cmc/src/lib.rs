//! tpc-cmc: Common Mode Correction for TPC pad readout
//!
//! Estimates the noise offset shared by all pads of a chip group at one
//! time bin and removes it from every sample:
//! - Randomized pool selection of empty, mutually consistent pads
//! - Optional fixed-point emulation of k-factor and pedestal registers
//! - Decoding of firmware injected reference values
//! - Parallel two-pass batch correction over chip groups
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       CorrectionEngine                           │
//! │                                                                  │
//! │  Samples ─┬─ worker 0 (groups 0, n, 2n ..) ─┐                    │
//! │           ├─ worker 1 (groups 1, n+1 ..)   ─┼─ CmTable ─ correct │
//! │           └─ ...                            ─┘   (barrier)       │
//! │                                                                  │
//! │  per cell:  CmData ─→ CommonModeEstimator ─→ CmInfo               │
//! │                 (CalibrationMap, RandomRing, FixedPoint)          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tpc_cmc::{CmcConfig, CorrectionEngine};
//! use tpc_core::TpcGeometry;
//!
//! let engine = CorrectionEngine::new(CmcConfig::hardware().with_workers(8), calibration, Arc::new(TpcGeometry))?;
//! let report = engine.process(&mut samples)?;
//! ```

mod config;
mod debug;
mod engine;
mod estimator;
mod injected;
mod random;
mod table;

pub use config::*;
pub use debug::*;
pub use engine::*;
pub use estimator::*;
pub use injected::*;
pub use random::*;
pub use table::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

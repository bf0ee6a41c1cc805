//! # tpc-bench
//!
//! Reproducible synthetic readout blocks and performance benchmarks for
//! the common mode correction.
//!
//! ## Benchmark Categories
//!
//! - **Estimator**: single cell pool selection for the region pad counts
//! - **Batch**: full two-pass correction with varying worker counts
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench -p tpc-bench
//! cargo bench -p tpc-bench -- estimator
//! ```

pub mod generators;

pub use generators::*;

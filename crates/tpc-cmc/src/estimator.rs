//! Common mode estimation for one chip group and time bin
//!
//! Every pad whose pedestal subtracted charge is small enough to be
//! empty is compared against a few randomly drawn pads of the same chip
//! group. When enough of them sit within the comparison distance (in
//! units normalized by the coupling factor) the pad joins the pool. The
//! pool mean is the common mode estimate.
//!
//! ```text
//!   deviation  = raw - pedestal
//!   normalized = deviation / k
//!   pool       = { normalized_i : deviation_i <= QEmpty and
//!                  #{ j : |normalized_i - normalized_j| < QComp } >= NMin }
//! ```

use serde::{Deserialize, Serialize};

use tpc_core::{FixedPointFormat, TpcError, TpcResult, limit_precision};

use crate::config::{CmcConfig, ComparisonScale};
use crate::debug::CmDebug;
use crate::random::RandomRing;

/// Result of one estimator call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CmInfo {
    /// Mean of the pool (common mode estimate)
    pub cm_value: f32,
    /// Population standard deviation of the pool
    pub cm_value_std: f32,
    /// Pool size
    pub n_pads_used: u32,
    /// Sum of pedestal subtracted charge of pads above `sum_pos_threshold`
    pub sum_pos: f32,
    /// Sum of normalized charge of the remaining pads
    pub sum_neg: f32,
    /// Number of pads contributing to `sum_neg`
    pub n_neg: u32,
    /// Number of pads at or above the saturation level
    pub n_saturation: u32,
    /// Reference value decoded from the injected words
    pub cm_value_injected: Option<f32>,
}

/// Per-pad inputs of one chip group and time bin
#[derive(Debug, Clone, Default)]
pub struct CmData {
    pub values: Vec<f32>,
    pub coupling: Vec<f32>,
    pub pedestals: Vec<f32>,
}

impl CmData {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            coupling: Vec::with_capacity(capacity),
            pedestals: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, value: f32, coupling: f32, pedestal: f32) {
        self.values.push(value);
        self.coupling.push(coupling);
        self.pedestals.push(pedestal);
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.coupling.clear();
        self.pedestals.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Zero-fill up to `n_pads` entries for pads that were not read out
    pub fn pad_to(&mut self, n_pads: usize) {
        while self.values.len() < n_pads {
            self.push(0.0, 1.0, 0.0);
        }
    }
}

/// Randomized pool selection over one chip group
#[derive(Debug, Clone)]
pub struct CommonModeEstimator {
    empty_threshold: f32,
    comparison_threshold: f32,
    comparison_scale: Option<ComparisonScale>,
    random_sample_count: usize,
    min_matches_required: usize,
    sum_pos_threshold: f32,
    saturation_level: f32,
    coupling_precision: Option<FixedPointFormat>,
    pedestal_precision: Option<FixedPointFormat>,
}

impl CommonModeEstimator {
    pub fn new(config: &CmcConfig) -> Self {
        Self {
            empty_threshold: config.empty_threshold,
            comparison_threshold: config.comparison_threshold,
            comparison_scale: config.comparison_scale,
            random_sample_count: config.random_sample_count,
            min_matches_required: config.min_matches_required,
            sum_pos_threshold: config.sum_pos_threshold,
            saturation_level: config.saturation_level,
            coupling_precision: config.coupling_precision,
            pedestal_precision: config.pedestal_precision,
        }
    }

    pub fn random_sample_count(&self) -> usize {
        self.random_sample_count
    }

    /// Match distance for a pad with the given normalized charge
    #[inline]
    fn match_distance(&self, normalized: f32) -> f32 {
        match self.comparison_scale {
            Some(scale) if normalized < scale.threshold => {
                self.comparison_threshold + (scale.threshold - normalized) * scale.slope
            }
            _ => self.comparison_threshold,
        }
    }

    pub fn estimate_data(
        &self,
        data: &CmData,
        rng: &mut RandomRing,
        debug: Option<&mut CmDebug>,
    ) -> TpcResult<CmInfo> {
        self.estimate(&data.values, &data.coupling, &data.pedestals, rng, debug)
    }

    /// Estimate the common mode of one chip group and time bin
    ///
    /// The three slices hold raw charge, coupling factor and pedestal per
    /// pad and must have equal length.
    pub fn estimate(
        &self,
        values: &[f32],
        coupling: &[f32],
        pedestals: &[f32],
        rng: &mut RandomRing,
        mut debug: Option<&mut CmDebug>,
    ) -> TpcResult<CmInfo> {
        if values.len() != coupling.len() || values.len() != pedestals.len() {
            return Err(TpcError::InvalidInput {
                values: values.len(),
                coupling: coupling.len(),
                pedestals: pedestals.len(),
            });
        }

        let n = values.len();
        let mut info = CmInfo::default();
        if n == 0 {
            return Ok(info);
        }
        if let Some(debug) = debug.as_deref_mut() {
            debug.reset(self.random_sample_count, n);
        }

        let mut deviations = Vec::with_capacity(n);
        let mut normalized = Vec::with_capacity(n);
        for ((&raw, &k), &pedestal) in values.iter().zip(coupling).zip(pedestals) {
            let k = limit_precision(k, self.coupling_precision);
            let pedestal = limit_precision(pedestal, self.pedestal_precision);
            let deviation = raw - pedestal;
            let norm = if k > 0.0 { deviation / k } else { 0.0 };

            if deviation > self.sum_pos_threshold {
                info.sum_pos += deviation;
            } else {
                info.sum_neg += norm;
                info.n_neg += 1;
            }
            if raw >= self.saturation_level {
                info.n_saturation += 1;
            }

            deviations.push(deviation);
            normalized.push(norm);
        }

        let draws = self.random_sample_count.min(n - 1);
        let max_attempts = draws * 8 + 16;
        let mut drawn: Vec<usize> = Vec::with_capacity(draws);
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut pool = 0u32;

        for pad in 0..n {
            if deviations[pad] > self.empty_threshold {
                continue;
            }

            let norm = normalized[pad];
            let distance_cut = self.match_distance(norm);

            drawn.clear();
            let mut attempts = 0;
            while drawn.len() < draws && attempts < max_attempts {
                attempts += 1;
                let other = rng.next_index_excluding(n, pad);
                if !drawn.contains(&other) {
                    drawn.push(other);
                }
            }

            let mut matches = 0;
            for &other in &drawn {
                let distance = (norm - normalized[other]).abs();
                if let Some(debug) = debug.as_deref_mut() {
                    debug.add_distance(pad, distance);
                }
                if distance < distance_cut {
                    matches += 1;
                }
            }
            if let Some(debug) = debug.as_deref_mut() {
                debug.add_matches(matches);
            }

            if matches >= self.min_matches_required {
                sum += norm as f64;
                sum_sq += norm as f64 * norm as f64;
                pool += 1;
            }
        }

        if pool > 0 {
            let mean = sum / pool as f64;
            let variance = (sum_sq / pool as f64 - mean * mean).max(0.0);
            info.cm_value = mean as f32;
            info.cm_value_std = variance.sqrt() as f32;
            info.n_pads_used = pool;
        }
        Ok(info)
    }
}

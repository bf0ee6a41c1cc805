//! Debug statistics of the pool selection

use serde::{Deserialize, Serialize};

/// Pads per bin of the distance accumulator
pub const PADS_PER_DISTANCE_BIN: usize = 10;

/// Per-cell debug record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmDebug {
    /// Histogram of match counts, index = number of matching comparison pads
    pub n_pads_ok: Vec<u32>,
    /// Summed comparison distances per block of pads
    pub adc_dist: Vec<f32>,
}

impl CmDebug {
    /// Record sized for one estimator call
    pub fn new(random_sample_count: usize, n_pads: usize) -> Self {
        Self {
            n_pads_ok: vec![0; random_sample_count + 1],
            adc_dist: vec![0.0; n_pads.div_ceil(PADS_PER_DISTANCE_BIN)],
        }
    }

    /// Reset and resize for a new estimator call
    pub fn reset(&mut self, random_sample_count: usize, n_pads: usize) {
        self.n_pads_ok.clear();
        self.n_pads_ok.resize(random_sample_count + 1, 0);
        self.adc_dist.clear();
        self.adc_dist.resize(n_pads.div_ceil(PADS_PER_DISTANCE_BIN), 0.0);
    }

    #[inline]
    pub(crate) fn add_distance(&mut self, pad: usize, distance: f32) {
        let bin = pad / PADS_PER_DISTANCE_BIN;
        if bin >= self.adc_dist.len() {
            self.adc_dist.resize(bin + 1, 0.0);
        }
        self.adc_dist[bin] += distance;
    }

    #[inline]
    pub(crate) fn add_matches(&mut self, matches: usize) {
        if matches >= self.n_pads_ok.len() {
            self.n_pads_ok.resize(matches + 1, 0);
        }
        self.n_pads_ok[matches] += 1;
    }

    /// Number of candidate pads that went through random comparison
    pub fn candidates(&self) -> u64 {
        self.n_pads_ok.iter().map(|&n| n as u64).sum()
    }
}

/// Accumulates debug records over many cells
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugAggregator {
    match_histogram: Vec<u64>,
    distance_sum: Vec<f64>,
    cells: u64,
}

impl DebugAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, debug: &CmDebug) {
        if self.match_histogram.len() < debug.n_pads_ok.len() {
            self.match_histogram.resize(debug.n_pads_ok.len(), 0);
        }
        for (total, &n) in self.match_histogram.iter_mut().zip(&debug.n_pads_ok) {
            *total += n as u64;
        }
        if self.distance_sum.len() < debug.adc_dist.len() {
            self.distance_sum.resize(debug.adc_dist.len(), 0.0);
        }
        for (total, &d) in self.distance_sum.iter_mut().zip(&debug.adc_dist) {
            *total += d as f64;
        }
        self.cells += 1;
    }

    /// Summed match count histogram
    pub fn match_histogram(&self) -> &[u64] {
        &self.match_histogram
    }

    /// Mean summed distance per pad block over all cells
    pub fn mean_distance_per_block(&self) -> Vec<f64> {
        if self.cells == 0 {
            return Vec::new();
        }
        self.distance_sum.iter().map(|d| d / self.cells as f64).collect()
    }

    /// Fraction of candidate pads reaching at least `min_matches`
    pub fn acceptance(&self, min_matches: usize) -> f64 {
        let total: u64 = self.match_histogram.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let accepted: u64 = self.match_histogram.iter().skip(min_matches).sum();
        accepted as f64 / total as f64
    }

    pub fn cells(&self) -> u64 {
        self.cells
    }
}

impl<'a> FromIterator<&'a CmDebug> for DebugAggregator {
    fn from_iter<I: IntoIterator<Item = &'a CmDebug>>(iter: I) -> Self {
        let mut aggregator = Self::new();
        for debug in iter {
            aggregator.add(debug);
        }
        aggregator
    }
}

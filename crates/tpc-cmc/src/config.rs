//! Configuration types for common mode correction

use std::path::Path;

use serde::{Deserialize, Serialize};

use tpc_core::{FixedPointFormat, MAX_ADC, TpcError, TpcResult};

/// Linear widening of the comparison threshold for strongly negative pads
///
/// Below `threshold` (normalized ADC) the match distance grows by
/// `slope` per unit of distance to the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonScale {
    pub threshold: f32,
    pub slope: f32,
}

/// Inclusive time bin window, -1 means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBinRange {
    pub min: i64,
    pub max: i64,
}

impl Default for TimeBinRange {
    fn default() -> Self {
        Self::ALL
    }
}

impl TimeBinRange {
    pub const ALL: Self = Self { min: -1, max: -1 };

    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, time_bin: u32) -> bool {
        let tb = time_bin as i64;
        (self.min < 0 || tb >= self.min) && (self.max < 0 || tb <= self.max)
    }
}

/// Chip-group relative slots carrying the injected reference value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedPositions {
    /// (local row, pad) of the word with the low magnitude bits
    pub lower: (u8, u8),
    /// (local row, pad) of the word with the high magnitude bits and sign
    pub upper: (u8, u8),
}

impl Default for InjectedPositions {
    fn default() -> Self {
        Self {
            lower: (0, 2),
            upper: (0, 3),
        }
    }
}

/// Common mode correction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmcConfig {
    /// Pads with pedestal subtracted charge above this carry signal
    pub empty_threshold: f32,

    /// Maximum normalized distance for two pads to match
    pub comparison_threshold: f32,

    /// Optional widening of the comparison threshold
    pub comparison_scale: Option<ComparisonScale>,

    /// Random comparison pads drawn per candidate pad
    pub random_sample_count: usize,

    /// Matches needed to accept a pad into the pool
    pub min_matches_required: usize,

    /// Cells with a smaller pool are left uncorrected
    pub min_usable_pool_size: usize,

    /// Pads above this pedestal subtracted charge feed `sum_pos`
    pub sum_pos_threshold: f32,

    /// Raw ADC level counted as saturated
    pub saturation_level: f32,

    /// Emulated coupling factor register precision (None = full precision)
    pub coupling_precision: Option<FixedPointFormat>,

    /// Emulated pedestal register precision (None = full precision)
    pub pedestal_precision: Option<FixedPointFormat>,

    /// Only correct cells with a negative common mode
    pub negative_only: bool,

    /// Subtract the pedestal again after the common mode
    pub resubtract_pedestal: bool,

    /// Synthetic common mode added before estimation (0 = off)
    pub artificial_cm: f32,

    /// Upper clamp for charges after artificial injection
    pub max_charge: f32,

    /// Number of worker threads
    pub workers: usize,

    /// Time bins taking part in a pass
    pub time_bins: TimeBinRange,

    /// Decode the injected reference value from these slots
    pub injected: Option<InjectedPositions>,

    /// Zero-fill cells that saw fewer pads than the chip group has
    pub pad_to_full_group: bool,

    /// Collect per-cell debug histograms
    pub collect_debug: bool,

    /// Seed for the per-worker random rings
    pub random_seed: u64,

    /// Uniform values pre-generated per worker
    pub random_ring_size: usize,

    /// Time bins per table chunk
    pub table_chunk_size: usize,
}

impl Default for CmcConfig {
    fn default() -> Self {
        Self {
            empty_threshold: 2.0,
            comparison_threshold: 1.0,
            comparison_scale: None,
            random_sample_count: 10,
            min_matches_required: 7,
            min_usable_pool_size: 0,
            sum_pos_threshold: 2.0,
            saturation_level: MAX_ADC,
            coupling_precision: None,
            pedestal_precision: None,
            negative_only: false,
            resubtract_pedestal: false,
            artificial_cm: 0.0,
            max_charge: MAX_ADC,
            workers: 1,
            time_bins: TimeBinRange::ALL,
            injected: None,
            pad_to_full_group: false,
            collect_debug: false,
            random_seed: 0x5eed_c0de,
            random_ring_size: 8192,
            table_chunk_size: 512,
        }
    }
}

impl CmcConfig {
    /// Emulate the front-end register precision for k-factors and pedestals
    pub fn hardware() -> Self {
        Self {
            coupling_precision: Some(FixedPointFormat::COUPLING),
            pedestal_precision: Some(FixedPointFormat::PEDESTAL),
            ..Default::default()
        }
    }

    /// Validation run with injected reference values and debug output
    pub fn validation() -> Self {
        Self {
            injected: Some(InjectedPositions::default()),
            collect_debug: true,
            ..Self::hardware()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_thresholds(mut self, empty: f32, comparison: f32) -> Self {
        self.empty_threshold = empty;
        self.comparison_threshold = comparison;
        self
    }

    pub fn with_comparison_scale(mut self, threshold: f32, slope: f32) -> Self {
        self.comparison_scale = Some(ComparisonScale { threshold, slope });
        self
    }

    pub fn with_sampling(mut self, random_sample_count: usize, min_matches_required: usize) -> Self {
        self.random_sample_count = random_sample_count;
        self.min_matches_required = min_matches_required;
        self
    }

    pub fn with_min_usable_pool_size(mut self, size: usize) -> Self {
        self.min_usable_pool_size = size;
        self
    }

    pub fn with_negative_only(mut self, negative_only: bool) -> Self {
        self.negative_only = negative_only;
        self
    }

    pub fn with_resubtract_pedestal(mut self, resubtract: bool) -> Self {
        self.resubtract_pedestal = resubtract;
        self
    }

    pub fn with_artificial_cm(mut self, value: f32) -> Self {
        self.artificial_cm = value;
        self
    }

    pub fn with_time_bins(mut self, min: i64, max: i64) -> Self {
        self.time_bins = TimeBinRange::new(min, max);
        self
    }

    pub fn with_injected(mut self, positions: InjectedPositions) -> Self {
        self.injected = Some(positions);
        self
    }

    pub fn with_debug(mut self, collect: bool) -> Self {
        self.collect_debug = collect;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Check option consistency
    pub fn validate(&self) -> TpcResult<()> {
        let thresholds = [
            ("empty_threshold", self.empty_threshold),
            ("comparison_threshold", self.comparison_threshold),
            ("sum_pos_threshold", self.sum_pos_threshold),
            ("saturation_level", self.saturation_level),
            ("artificial_cm", self.artificial_cm),
            ("max_charge", self.max_charge),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(TpcError::InvalidConfig(format!("{name} must be finite, got {value}")));
            }
        }
        if let Some(scale) = self.comparison_scale {
            if !scale.threshold.is_finite() || !scale.slope.is_finite() {
                return Err(TpcError::InvalidConfig("comparison_scale must be finite".into()));
            }
        }
        if self.max_charge < 0.0 {
            return Err(TpcError::InvalidConfig(format!(
                "max_charge must not be negative, got {}",
                self.max_charge
            )));
        }
        if self.min_matches_required > self.random_sample_count {
            return Err(TpcError::InvalidConfig(format!(
                "min_matches_required ({}) exceeds random_sample_count ({})",
                self.min_matches_required, self.random_sample_count
            )));
        }
        if self.workers == 0 {
            return Err(TpcError::InvalidConfig("workers must be at least 1".into()));
        }
        for (name, format) in [
            ("coupling_precision", self.coupling_precision),
            ("pedestal_precision", self.pedestal_precision),
        ] {
            if let Some(format) = format {
                let bits = format.total_bits();
                if bits == 0 || bits > 31 {
                    return Err(TpcError::InvalidConfig(format!("{name} width {bits} not in 1..=31")));
                }
            }
        }
        if self.table_chunk_size == 0 {
            return Err(TpcError::InvalidConfig("table_chunk_size must be positive".into()));
        }
        if self.random_ring_size == 0 {
            return Err(TpcError::InvalidConfig("random_ring_size must be positive".into()));
        }
        let range = self.time_bins;
        if range.min >= 0 && range.max >= 0 && range.min > range.max {
            return Err(TpcError::InvalidConfig(format!(
                "time bin range {}..={} is empty",
                range.min, range.max
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> TpcResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TpcError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> TpcResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TpcError::Serialization(e.to_string()))
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> TpcResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save configuration as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> TpcResult<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CmcConfig::default().validate().is_ok());
        assert!(CmcConfig::hardware().validate().is_ok());
        assert!(CmcConfig::validation().validate().is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_sampling() {
        let config = CmcConfig::default().with_sampling(3, 5);
        assert!(matches!(config.validate(), Err(TpcError::InvalidConfig(_))));

        let config = CmcConfig::default().with_workers(0);
        assert!(config.validate().is_err());

        let config = CmcConfig::default().with_time_bins(10, 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_max_charge() {
        let mut config = CmcConfig::default().with_artificial_cm(1.0);
        config.max_charge = -1.0;
        assert!(matches!(config.validate(), Err(TpcError::InvalidConfig(_))));

        config.max_charge = 0.0;
        assert!(config.validate().is_ok());
        assert_eq!(CmcConfig::default().max_charge, MAX_ADC);
    }

    #[test]
    fn test_time_bin_range() {
        let all = TimeBinRange::ALL;
        assert!(all.contains(0) && all.contains(u32::MAX));

        let window = TimeBinRange::new(5, 10);
        assert!(!window.contains(4));
        assert!(window.contains(5));
        assert!(window.contains(10));
        assert!(!window.contains(11));

        let open_end = TimeBinRange::new(5, -1);
        assert!(open_end.contains(100_000));
    }

    #[test]
    fn test_json_round_trip_keeps_options() {
        let config = CmcConfig::validation()
            .with_workers(4)
            .with_comparison_scale(-5.0, 0.1)
            .with_negative_only(true);
        let json = config.to_json_string().unwrap();
        let parsed = CmcConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.workers, 4);
        assert!(parsed.negative_only);
        assert_eq!(parsed.coupling_precision, Some(FixedPointFormat::COUPLING));
        assert_eq!(parsed.comparison_scale.map(|s| s.slope), Some(0.1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed = CmcConfig::from_json_str(r#"{ "empty_threshold": 5.0, "workers": 2 }"#).unwrap();
        assert_eq!(parsed.empty_threshold, 5.0);
        assert_eq!(parsed.workers, 2);
        assert_eq!(parsed.random_sample_count, 10);
    }
}

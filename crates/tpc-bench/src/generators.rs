//! Synthetic readout generators

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use tpc_core::{CalibrationMap, ChipGroup, PadAddress, PadTable, ReadoutGeometry, Sample};

/// Shape of a synthetic readout block
#[derive(Debug, Clone, Copy)]
pub struct BlockSpec {
    /// First chip group id
    pub first_group: u16,
    pub groups: u16,
    pub time_bins: u32,
    /// Pads per row used to lay out a chip group
    pub pads_per_row: usize,
    pub pedestal: f32,
    /// Gaussian-ish noise width per pad
    pub noise: f32,
    /// Fraction of pads carrying signal
    pub occupancy: f64,
}

impl BlockSpec {
    /// Row and pad of the `index`-th pad of a chip group starting at `first_row`
    ///
    /// # Panics
    ///
    /// If `pads_per_row` is zero or the layout needs rows or pads beyond 255.
    pub fn pad_position(&self, first_row: u8, index: usize) -> (u8, u8) {
        assert!(self.pads_per_row > 0, "pads_per_row must be positive");
        let row = u8::try_from(first_row as usize + index / self.pads_per_row);
        let pad = u8::try_from(index % self.pads_per_row);
        match (row, pad) {
            (Ok(row), Ok(pad)) => (row, pad),
            _ => panic!(
                "pad {index} from row {first_row} does not fit with {} pads per row",
                self.pads_per_row
            ),
        }
    }
}

impl Default for BlockSpec {
    fn default() -> Self {
        Self {
            first_group: 0,
            groups: 10,
            time_bins: 16,
            pads_per_row: 100,
            pedestal: 70.0,
            noise: 1.0,
            occupancy: 0.05,
        }
    }
}

/// Sum of uniforms, close enough to a normal distribution for noise
fn noise(rng: &mut ChaCha8Rng, width: f32) -> f32 {
    let sum: f32 = (0..4).map(|_| rng.random::<f32>()).sum();
    (sum - 2.0) * width * 1.732
}

/// Samples ordered by chip group, then time bin, then pad, with a random
/// common mode per cell shared by all pads through their coupling factor
pub fn generate_block(
    spec: &BlockSpec,
    geometry: &dyn ReadoutGeometry,
    calibration: &CalibrationMap,
    seed: u64,
) -> Vec<Sample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut samples = Vec::new();
    for g in 0..spec.groups {
        let group = ChipGroup::new(spec.first_group + g);
        let pads = geometry.pads_in_group(group);
        let first_row = geometry.first_row(group);
        for time_bin in 0..spec.time_bins {
            let cm = noise(&mut rng, 2.0);
            for index in 0..pads {
                let (row, pad) = spec.pad_position(first_row, index);
                let cal = calibration.lookup(group, row, pad).unwrap_or_default();
                let mut charge = cal.pedestal + cm * cal.coupling + noise(&mut rng, spec.noise);
                if rng.random_bool(spec.occupancy) {
                    charge += 20.0 + rng.random::<f32>() * 200.0;
                }
                samples.push(Sample::new(group, row, pad, time_bin, charge.clamp(0.0, 1023.0)));
            }
        }
    }
    samples
}

/// Calibration covering every pad produced by [`generate_block`]
pub fn generate_calibration(spec: &BlockSpec, geometry: &dyn ReadoutGeometry, seed: u64) -> CalibrationMap {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut coupling = PadTable::new();
    let mut pedestal = PadTable::new();
    for g in 0..spec.groups {
        let group = ChipGroup::new(spec.first_group + g);
        let first_row = geometry.first_row(group);
        for index in 0..geometry.pads_in_group(group) {
            let (row, pad) = spec.pad_position(first_row, index);
            let address = PadAddress::new(group.sector(), row, pad);
            coupling.set(address, 0.8 + rng.random::<f32>() * 0.4);
            pedestal.set(address, spec.pedestal + noise(&mut rng, 5.0));
        }
    }
    CalibrationMap::from_tables(coupling, pedestal)
}

/// Pad counts exercised by the estimator benchmarks
pub const PAD_COUNTS: &[usize] = &[1200, 1440, 1600];

/// Worker counts exercised by the batch benchmarks
pub const WORKER_COUNTS: &[usize] = &[1, 2, 4, 8];

#[cfg(test)]
mod tests {
    use super::*;
    use tpc_core::TpcGeometry;

    #[test]
    fn test_reproducibility() {
        let spec = BlockSpec {
            groups: 2,
            time_bins: 2,
            ..Default::default()
        };
        let calibration = generate_calibration(&spec, &TpcGeometry, 1);
        let a = generate_block(&spec, &TpcGeometry, &calibration, 42);
        let b = generate_block(&spec, &TpcGeometry, &calibration, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2 * 1200 * 2);
    }

    #[test]
    fn test_calibration_covers_block() {
        let spec = BlockSpec {
            first_group: 16,
            groups: 3,
            time_bins: 1,
            ..Default::default()
        };
        let calibration = generate_calibration(&spec, &TpcGeometry, 7);
        let block = generate_block(&spec, &TpcGeometry, &calibration, 8);
        assert!(calibration.validate_samples(&block).is_ok());
    }

    #[test]
    fn test_pad_position() {
        let spec = BlockSpec::default();
        assert_eq!(spec.pad_position(140, 0), (140, 0));
        assert_eq!(spec.pad_position(140, 1599), (155, 99));
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn test_pad_position_rejects_row_overflow() {
        let spec = BlockSpec {
            pads_per_row: 4,
            ..Default::default()
        };
        spec.pad_position(140, 1599);
    }
}

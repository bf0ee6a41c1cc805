//! Readout geometry seen by the correction engine
//!
//! Resolving hardware channel addresses into pads happens upstream; the
//! engine only needs the per-chip-group pad counts and row offsets.

use crate::sample::{ChipGroup, REGIONS_PER_SECTOR};

/// Pads per region, inner to outer
pub const PADS_PER_REGION: [usize; REGIONS_PER_SECTOR as usize] =
    [1200, 1200, 1440, 1440, 1440, 1440, 1600, 1600, 1600, 1600];

/// Rows per region
pub const ROWS_PER_REGION: [u8; REGIONS_PER_SECTOR as usize] = [17, 15, 16, 15, 18, 16, 16, 14, 13, 12];

/// First sector row of each region
pub const GLOBAL_ROW_OFFSET: [u8; REGIONS_PER_SECTOR as usize] = [0, 17, 32, 48, 63, 81, 97, 113, 127, 140];

/// Geometry lookups consumed from the decoding layer
pub trait ReadoutGeometry: Send + Sync {
    /// Number of pads read out by one chip group
    fn pads_in_group(&self, group: ChipGroup) -> usize;

    /// Number of pad rows covered by one chip group
    fn rows_in_group(&self, group: ChipGroup) -> u8;

    /// First sector row covered by the chip group
    fn first_row(&self, group: ChipGroup) -> u8;

    /// Row relative to the first row of the chip group
    fn local_row(&self, group: ChipGroup, row: u8) -> u8 {
        row.saturating_sub(self.first_row(group))
    }
}

/// Default TPC pad plane layout
#[derive(Debug, Clone, Copy, Default)]
pub struct TpcGeometry;

impl ReadoutGeometry for TpcGeometry {
    fn pads_in_group(&self, group: ChipGroup) -> usize {
        PADS_PER_REGION[group.region() as usize]
    }

    fn rows_in_group(&self, group: ChipGroup) -> u8 {
        ROWS_PER_REGION[group.region() as usize]
    }

    fn first_row(&self, group: ChipGroup) -> u8 {
        GLOBAL_ROW_OFFSET[group.region() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_offsets_are_contiguous() {
        for region in 1..REGIONS_PER_SECTOR as usize {
            assert_eq!(
                GLOBAL_ROW_OFFSET[region],
                GLOBAL_ROW_OFFSET[region - 1] + ROWS_PER_REGION[region - 1]
            );
        }
        let last = REGIONS_PER_SECTOR as usize - 1;
        assert_eq!(GLOBAL_ROW_OFFSET[last] + ROWS_PER_REGION[last], 152);
    }

    #[test]
    fn test_local_row() {
        let geometry = TpcGeometry;
        let group = ChipGroup::from_sector_region(5, 2);
        assert_eq!(geometry.first_row(group), 32);
        assert_eq!(geometry.local_row(group, 35), 3);
        assert_eq!(geometry.pads_in_group(group), 1440);
    }
}

//! Pad sample and chip-group addressing types

use serde::{Deserialize, Serialize};

/// Number of sectors in the readout
pub const SECTORS: u8 = 36;

/// Number of chip groups (regions) per sector
pub const REGIONS_PER_SECTOR: u8 = 10;

/// Total number of chip groups
pub const MAX_CHIP_GROUPS: u16 = SECTORS as u16 * REGIONS_PER_SECTOR as u16;

/// Regions below this index belong to the inner readout chamber
pub const INNER_REGIONS: u8 = 4;

/// Detector side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    C,
}

/// Independently clocked group of readout channels
///
/// The id encodes sector and region as `sector * 10 + region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ChipGroup(pub u16);

impl ChipGroup {
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn from_sector_region(sector: u8, region: u8) -> Self {
        Self(sector as u16 * REGIONS_PER_SECTOR as u16 + region as u16)
    }

    #[inline]
    pub const fn id(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn sector(self) -> u8 {
        (self.0 / REGIONS_PER_SECTOR as u16) as u8
    }

    #[inline]
    pub const fn region(self) -> u8 {
        (self.0 % REGIONS_PER_SECTOR as u16) as u8
    }

    #[inline]
    pub const fn side(self) -> Side {
        if self.sector() < SECTORS / 2 { Side::A } else { Side::C }
    }

    #[inline]
    pub const fn is_inner(self) -> bool {
        self.region() < INNER_REGIONS
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 < MAX_CHIP_GROUPS
    }

    /// Iterate over all chip groups of the readout
    pub fn all() -> impl Iterator<Item = ChipGroup> {
        (0..MAX_CHIP_GROUPS).map(ChipGroup)
    }
}

impl std::fmt::Display for ChipGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calibration key of one pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PadAddress {
    pub sector: u8,
    /// Row within the sector
    pub row: u8,
    /// Pad within the row
    pub pad: u8,
}

impl PadAddress {
    #[inline]
    pub const fn new(sector: u8, row: u8, pad: u8) -> Self {
        Self { sector, row, pad }
    }
}

/// One pad measurement
///
/// Everything but `charge` is fixed by the decoding layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub group: ChipGroup,
    /// Row within the sector
    pub row: u8,
    /// Pad within the row
    pub pad: u8,
    pub time_bin: u32,
    pub charge: f32,
}

impl Sample {
    #[inline]
    pub const fn new(group: ChipGroup, row: u8, pad: u8, time_bin: u32, charge: f32) -> Self {
        Self {
            group,
            row,
            pad,
            time_bin,
            charge,
        }
    }

    #[inline]
    pub const fn address(&self) -> PadAddress {
        PadAddress::new(self.group.sector(), self.row, self.pad)
    }

    /// (chip group, time bin) cell this sample belongs to
    #[inline]
    pub const fn cell(&self) -> (ChipGroup, u32) {
        (self.group, self.time_bin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_group_arithmetic() {
        let group = ChipGroup::from_sector_region(19, 7);
        assert_eq!(group.id(), 197);
        assert_eq!(group.sector(), 19);
        assert_eq!(group.region(), 7);
        assert_eq!(group.side(), Side::C);
        assert!(!group.is_inner());

        let inner = ChipGroup::new(3);
        assert_eq!(inner.side(), Side::A);
        assert!(inner.is_inner());
    }

    #[test]
    fn test_chip_group_range() {
        assert_eq!(ChipGroup::all().count(), 360);
        assert!(ChipGroup::new(359).is_valid());
        assert!(!ChipGroup::new(360).is_valid());
    }

    #[test]
    fn test_sample_address() {
        let sample = Sample::new(ChipGroup::new(42), 20, 5, 100, 3.5);
        assert_eq!(sample.address(), PadAddress::new(4, 20, 5));
        assert_eq!(sample.cell(), (ChipGroup::new(42), 100));
    }
}

//! Per-pad calibration tables
//!
//! Calibration values are owned by an external configuration store and
//! handed over as in-memory tables keyed by (sector, row, pad). A
//! correction pass reads them only; swapping in a new map between passes
//! is done by replacing the whole [`CalibrationMap`].

use serde::{Deserialize, Serialize};

use crate::error::{TpcError, TpcResult};
use crate::sample::{ChipGroup, PadAddress, Sample};

/// Calibration quantities known to the correction engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationKind {
    /// Coupling of the pad to the shared noise source (k-factor)
    CouplingFactor,
    /// DC baseline of the pad
    Pedestal,
}

impl CalibrationKind {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::CouplingFactor, Self::Pedestal];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::CouplingFactor => 0,
            Self::Pedestal => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::CouplingFactor => "coupling factor",
            Self::Pedestal => "pedestal",
        }
    }
}

impl std::fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pads per row slot in the dense layout
const PAD_STRIDE: usize = 1 << u8::BITS;

/// Scalar value per pad
///
/// Values are stored densely per sector, row-major with one slot per
/// possible pad number. NaN marks a pad without a value. Serialized as a
/// list of `(address, value)` entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "Vec<(PadAddress, f32)>", from = "Vec<(PadAddress, f32)>")]
pub struct PadTable {
    sectors: Vec<Vec<f32>>,
    len: usize,
}

impl PadTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn slot(address: PadAddress) -> usize {
        address.row as usize * PAD_STRIDE + address.pad as usize
    }

    #[inline]
    pub fn get(&self, address: PadAddress) -> Option<f32> {
        let value = *self
            .sectors
            .get(address.sector as usize)?
            .get(Self::slot(address))?;
        (!value.is_nan()).then_some(value)
    }

    /// Store a value; NaN removes the pad
    pub fn set(&mut self, address: PadAddress, value: f32) {
        let sector = address.sector as usize;
        if self.sectors.len() <= sector {
            self.sectors.resize_with(sector + 1, Vec::new);
        }
        let values = &mut self.sectors[sector];
        let slot = Self::slot(address);
        if values.len() <= slot {
            values.resize((address.row as usize + 1) * PAD_STRIDE, f32::NAN);
        }
        let previous = std::mem::replace(&mut values[slot], value);
        match (previous.is_nan(), value.is_nan()) {
            (true, false) => self.len += 1,
            (false, true) => self.len -= 1,
            _ => {}
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.sectors.clear();
        self.len = 0;
    }

    /// Stored entries ordered by sector, row and pad
    pub fn iter(&self) -> impl Iterator<Item = (PadAddress, f32)> + '_ {
        self.sectors.iter().enumerate().flat_map(|(sector, values)| {
            values
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_nan())
                .map(move |(slot, &value)| {
                    let address = PadAddress::new(
                        sector as u8,
                        (slot / PAD_STRIDE) as u8,
                        (slot % PAD_STRIDE) as u8,
                    );
                    (address, value)
                })
        })
    }

    /// Lookup that reports the missing key
    pub fn try_get(&self, kind: CalibrationKind, address: PadAddress) -> TpcResult<f32> {
        self.get(address).ok_or(TpcError::MissingCalibration {
            kind,
            sector: address.sector,
            row: address.row,
            pad: address.pad,
        })
    }
}

impl FromIterator<(PadAddress, f32)> for PadTable {
    fn from_iter<I: IntoIterator<Item = (PadAddress, f32)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (address, value) in iter {
            table.set(address, value);
        }
        table
    }
}

impl From<Vec<(PadAddress, f32)>> for PadTable {
    fn from(entries: Vec<(PadAddress, f32)>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<PadTable> for Vec<(PadAddress, f32)> {
    fn from(table: PadTable) -> Self {
        table.iter().collect()
    }
}

/// Calibration of one pad as used by the estimator
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PadCalibration {
    pub coupling: f32,
    pub pedestal: f32,
}

/// All calibration tables needed by a correction pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationMap {
    tables: [PadTable; CalibrationKind::COUNT],
}

impl CalibrationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a coupling factor and a pedestal table
    pub fn from_tables(coupling: PadTable, pedestal: PadTable) -> Self {
        let mut map = Self::new();
        map.insert_table(CalibrationKind::CouplingFactor, coupling);
        map.insert_table(CalibrationKind::Pedestal, pedestal);
        map
    }

    /// Same coupling and pedestal for every pad that appears in `samples`
    pub fn uniform_for(samples: &[Sample], coupling: f32, pedestal: f32) -> Self {
        let mut map = Self::new();
        for sample in samples {
            let address = sample.address();
            map.tables[CalibrationKind::CouplingFactor.index()].set(address, coupling);
            map.tables[CalibrationKind::Pedestal.index()].set(address, pedestal);
        }
        map
    }

    #[inline]
    pub fn table(&self, kind: CalibrationKind) -> &PadTable {
        &self.tables[kind.index()]
    }

    #[inline]
    pub fn table_mut(&mut self, kind: CalibrationKind) -> &mut PadTable {
        &mut self.tables[kind.index()]
    }

    /// Replace one table, returning the previous one
    pub fn insert_table(&mut self, kind: CalibrationKind, table: PadTable) -> PadTable {
        std::mem::replace(&mut self.tables[kind.index()], table)
    }

    /// Value of one quantity for a pad of a chip group
    pub fn value(&self, kind: CalibrationKind, group: ChipGroup, row: u8, pad: u8) -> TpcResult<f32> {
        self.table(kind)
            .try_get(kind, PadAddress::new(group.sector(), row, pad))
    }

    /// Coupling factor and pedestal of a pad
    #[inline]
    pub fn lookup(&self, group: ChipGroup, row: u8, pad: u8) -> TpcResult<PadCalibration> {
        Ok(PadCalibration {
            coupling: self.value(CalibrationKind::CouplingFactor, group, row, pad)?,
            pedestal: self.value(CalibrationKind::Pedestal, group, row, pad)?,
        })
    }

    /// Check that every sample has both calibration values
    pub fn validate_samples(&self, samples: &[Sample]) -> TpcResult<()> {
        for kind in CalibrationKind::ALL {
            if self.table(kind).is_empty() && !samples.is_empty() {
                log::error!("{} table is empty", kind);
            }
        }
        for sample in samples {
            self.lookup(sample.group, sample.row, sample.pad)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        vec![
            Sample::new(ChipGroup::new(12), 20, 3, 0, 80.0),
            Sample::new(ChipGroup::new(12), 20, 4, 0, 81.0),
        ]
    }

    #[test]
    fn test_lookup() {
        let map = CalibrationMap::uniform_for(&samples(), 0.8, 75.0);
        let cal = map.lookup(ChipGroup::new(12), 20, 3).unwrap();
        assert_eq!(cal.coupling, 0.8);
        assert_eq!(cal.pedestal, 75.0);
        // chip group 15 sits in the same sector as 12
        assert!(map.lookup(ChipGroup::new(15), 20, 4).is_ok());
    }

    #[test]
    fn test_missing_calibration() {
        let map = CalibrationMap::uniform_for(&samples(), 1.0, 0.0);
        let err = map.lookup(ChipGroup::new(22), 20, 3).unwrap_err();
        assert!(matches!(
            err,
            TpcError::MissingCalibration {
                kind: CalibrationKind::CouplingFactor,
                sector: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_samples_reports_pedestal_gap() {
        let all = samples();
        let mut map = CalibrationMap::uniform_for(&all, 1.0, 0.0);
        map.table_mut(CalibrationKind::Pedestal).clear();
        let err = map.validate_samples(&all).unwrap_err();
        assert!(matches!(
            err,
            TpcError::MissingCalibration {
                kind: CalibrationKind::Pedestal,
                ..
            }
        ));
    }

    #[test]
    fn test_hot_swap() {
        let all = samples();
        let mut map = CalibrationMap::uniform_for(&all, 1.0, 0.0);
        let replacement: PadTable = all.iter().map(|s| (s.address(), 2.0)).collect();
        let old = map.insert_table(CalibrationKind::CouplingFactor, replacement);
        assert_eq!(old.len(), 2);
        assert_eq!(map.value(CalibrationKind::CouplingFactor, ChipGroup::new(12), 20, 4).unwrap(), 2.0);
    }

    #[test]
    fn test_dense_table_entries() {
        let mut table = PadTable::new();
        table.set(PadAddress::new(35, 151, 137), 1.5);
        table.set(PadAddress::new(0, 0, 255), 2.5);
        table.set(PadAddress::new(0, 0, 255), 3.5);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(PadAddress::new(0, 0, 255)), Some(3.5));
        assert_eq!(table.get(PadAddress::new(0, 1, 0)), None);
        assert_eq!(table.get(PadAddress::new(35, 151, 136)), None);
        assert_eq!(table.get(PadAddress::new(36, 0, 0)), None);

        let entries: Vec<(PadAddress, f32)> = table.iter().collect();
        assert_eq!(
            entries,
            vec![(PadAddress::new(0, 0, 255), 3.5), (PadAddress::new(35, 151, 137), 1.5)]
        );

        table.set(PadAddress::new(0, 0, 255), f32::NAN);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(PadAddress::new(0, 0, 255)), None);
    }

    #[test]
    fn test_json_round_trip() {
        let map = CalibrationMap::uniform_for(&samples(), 0.75, 70.25);
        let json = serde_json::to_string(&map).unwrap();
        let parsed: CalibrationMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.table(CalibrationKind::Pedestal).len(), 2);
        let cal = parsed.lookup(ChipGroup::new(12), 20, 4).unwrap();
        assert_eq!(cal.coupling, 0.75);
        assert_eq!(cal.pedestal, 70.25);
    }
}

//! Batch common mode correction
//!
//! Orchestrates a full pass over a block of pad samples:
//! 1. Validate calibration for every sample in the time bin window
//! 2. Optionally add an artificial common mode (validation runs)
//! 3. Scan: estimate one common mode per (chip group, time bin)
//! 4. Barrier: merge worker tables into one read-only table
//! 5. Correct: subtract `cm * k` from every sample of a usable cell
//!
//! Samples must arrive grouped contiguously per (chip group, time bin)
//! with nondecreasing time bins inside a chip group. Chip groups are
//! spread over the workers by `group % workers`; a worker owns all cells
//! of its chip groups, so table writes never cross threads.

use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use tpc_core::{CalibrationMap, ChipGroup, ReadoutGeometry, Sample, TpcError, TpcResult};

use crate::config::CmcConfig;
use crate::debug::{CmDebug, DebugAggregator};
use crate::estimator::{CmData, CmInfo, CommonModeEstimator};
use crate::injected::decode_injected;
use crate::random::RandomRing;
use crate::table::CmTable;

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Output of the scanning pass
#[derive(Debug, Default)]
pub struct CmTables {
    /// Estimate per (chip group, time bin)
    pub info: CmTable<CmInfo>,
    /// Debug record per (chip group, time bin), if collected
    pub debug: Option<CmTable<CmDebug>>,
    /// Largest time bin seen by any worker
    pub max_time_bin: Option<u32>,
    /// Cells handed to the estimator
    pub cells_estimated: usize,
    /// Cells that arrived out of time bin order
    pub ordering_violations: usize,
}

impl CmTables {
    fn new(chunk_size: usize, collect_debug: bool) -> Self {
        Self {
            info: CmTable::new(chunk_size),
            debug: collect_debug.then(|| CmTable::new(chunk_size)),
            max_time_bin: None,
            cells_estimated: 0,
            ordering_violations: 0,
        }
    }

    /// Move the cells of a worker into this table
    fn merge(&mut self, other: CmTables) {
        self.info.merge(other.info);
        if let (Some(debug), Some(other_debug)) = (self.debug.as_mut(), other.debug) {
            debug.merge(other_debug);
        }
        self.cells_estimated += other.cells_estimated;
        self.ordering_violations += other.ordering_violations;
    }

    /// Flatten into rows for persistence
    pub fn records(&self) -> Vec<CmRecord> {
        self.info
            .iter()
            .map(|(group, time_bin, info)| CmRecord {
                group: group.id(),
                time_bin,
                info: *info,
            })
            .collect()
    }

    /// Summed debug statistics over all cells
    pub fn debug_summary(&self) -> Option<DebugAggregator> {
        self.debug
            .as_ref()
            .map(|table| table.iter().map(|(_, _, debug)| debug).collect())
    }
}

/// One row of the common mode output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CmRecord {
    pub group: u16,
    pub time_bin: u32,
    pub info: CmInfo,
}

/// Result of a full correction pass
#[derive(Debug, Default)]
pub struct CorrectionReport {
    pub tables: CmTables,
    /// Samples whose charge was modified by the correction
    pub samples_corrected: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Scanning state of one worker
struct Scanner<'a> {
    engine: &'a CorrectionEngine,
    rng: RandomRing,
    data: CmData,
    current: Option<(ChipGroup, u32)>,
    injected_lower: Option<f32>,
    injected_upper: Option<f32>,
    last_time_bin: Vec<Option<u32>>,
    tables: CmTables,
}

impl<'a> Scanner<'a> {
    fn new(engine: &'a CorrectionEngine, worker: usize) -> Self {
        let config = &engine.config;
        Self {
            engine,
            rng: RandomRing::for_worker(config.random_ring_size, config.random_seed, worker),
            data: CmData::with_capacity(1600),
            current: None,
            injected_lower: None,
            injected_upper: None,
            last_time_bin: Vec::new(),
            tables: CmTables::new(config.table_chunk_size, config.collect_debug),
        }
    }

    /// Start a new cell, checking the time bin order of its chip group
    fn begin(&mut self, group: ChipGroup, time_bin: u32) {
        let index = group.index();
        if self.last_time_bin.len() <= index {
            self.last_time_bin.resize(index + 1, None);
        }
        if let Some(previous) = self.last_time_bin[index] {
            if time_bin < previous {
                let err = TpcError::TimebinOrderingViolation {
                    group: group.id(),
                    previous,
                    current: time_bin,
                };
                log::error!("{}", err);
                self.tables.ordering_violations += 1;
            }
        }
        self.last_time_bin[index] = Some(time_bin);
        self.current = Some((group, time_bin));
    }

    fn push(&mut self, sample: &Sample) -> TpcResult<()> {
        let engine = self.engine;
        let cell = sample.cell();
        if self.current != Some(cell) {
            self.flush();
            self.begin(cell.0, cell.1);
        }

        let cal = engine.calibration.lookup(sample.group, sample.row, sample.pad)?;
        self.data.push(sample.charge, cal.coupling, cal.pedestal);

        if let Some(positions) = engine.config.injected {
            let slot = (engine.geometry.local_row(sample.group, sample.row), sample.pad);
            if slot == positions.lower {
                self.injected_lower = Some(sample.charge);
            } else if slot == positions.upper {
                self.injected_upper = Some(sample.charge);
            }
        }
        Ok(())
    }

    /// Estimate the in-flight cell and store the result
    fn flush(&mut self) {
        let Some((group, time_bin)) = self.current.take() else {
            return;
        };
        let engine = self.engine;
        let config = &engine.config;

        if config.pad_to_full_group {
            self.data.pad_to(engine.geometry.pads_in_group(group));
        }

        let mut debug = config.collect_debug.then(CmDebug::default);
        let mut info = engine
            .estimator
            .estimate_data(&self.data, &mut self.rng, debug.as_mut())
            .unwrap_or_else(|e| {
                log::warn!("chip group {group}, time bin {time_bin}: {e}");
                CmInfo::default()
            });

        if config.injected.is_some() {
            let value = match (self.injected_lower.take(), self.injected_upper.take()) {
                (Some(lower), Some(upper)) => decode_injected(lower, upper).unwrap_or_else(|e| {
                    log::error!("chip group {group}, time bin {time_bin}: {e}");
                    0.0
                }),
                _ => {
                    log::warn!("chip group {group}, time bin {time_bin}: injected words not found");
                    0.0
                }
            };
            info.cm_value_injected = Some(value);
        }

        if self.tables.info.insert(group, time_bin, info).is_some() {
            log::error!("chip group {group}, time bin {time_bin}: cell seen twice, keeping the later estimate");
            self.tables.ordering_violations += 1;
        }
        if let (Some(table), Some(debug)) = (self.tables.debug.as_mut(), debug) {
            table.insert(group, time_bin, debug);
        }
        self.tables.cells_estimated += 1;
        self.data.clear();
    }

    fn finish(mut self) -> CmTables {
        self.flush();
        self.tables
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CORRECTION ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Common mode estimation and correction over blocks of samples
pub struct CorrectionEngine {
    config: CmcConfig,
    estimator: CommonModeEstimator,
    calibration: Arc<CalibrationMap>,
    geometry: Arc<dyn ReadoutGeometry>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for CorrectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionEngine")
            .field("config", &self.config)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl CorrectionEngine {
    /// Create an engine with its own worker pool
    pub fn new(
        config: CmcConfig,
        calibration: Arc<CalibrationMap>,
        geometry: Arc<dyn ReadoutGeometry>,
    ) -> TpcResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("cmc-worker-{i}"))
            .build()
            .map_err(|e| TpcError::InvalidConfig(format!("worker pool: {e}")))?;

        Ok(Self {
            estimator: CommonModeEstimator::new(&config),
            config,
            calibration,
            geometry,
            pool,
        })
    }

    pub fn config(&self) -> &CmcConfig {
        &self.config
    }

    pub fn calibration(&self) -> &Arc<CalibrationMap> {
        &self.calibration
    }

    /// Swap calibration between passes
    pub fn set_calibration(&mut self, calibration: Arc<CalibrationMap>) {
        self.calibration = calibration;
    }

    /// Estimate and correct a block of samples in place
    pub fn process(&self, samples: &mut [Sample]) -> TpcResult<CorrectionReport> {
        let tables = self.estimate(samples)?;
        let samples_corrected = self.correct(samples, &tables)?;
        log::debug!(
            "common mode pass: {} cells, {} samples corrected, {} ordering violations",
            tables.cells_estimated,
            samples_corrected,
            tables.ordering_violations
        );
        Ok(CorrectionReport {
            tables,
            samples_corrected,
        })
    }

    /// Scanning pass: one estimate per (chip group, time bin)
    ///
    /// With an artificial common mode configured the sample charges are
    /// raised before estimation.
    pub fn estimate(&self, samples: &mut [Sample]) -> TpcResult<CmTables> {
        self.validate_calibration(samples)?;

        let mut partitions = self.partition(samples);
        if self.config.artificial_cm != 0.0 {
            self.pool.install(|| {
                partitions
                    .par_iter_mut()
                    .map(|runs| self.inject_artificial(runs))
                    .collect::<TpcResult<Vec<()>>>()
            })?;
        }

        let max_time_bin: Mutex<Option<u32>> = Mutex::new(None);
        let worker_tables = self.pool.install(|| {
            partitions
                .par_iter()
                .enumerate()
                .map(|(worker, runs)| self.scan(worker, runs, &max_time_bin))
                .collect::<TpcResult<Vec<CmTables>>>()
        })?;

        let mut tables = CmTables::new(self.config.table_chunk_size, self.config.collect_debug);
        for worker in worker_tables {
            tables.merge(worker);
        }
        tables.max_time_bin = max_time_bin.into_inner();
        Ok(tables)
    }

    /// Correcting pass over samples already scanned into `tables`
    ///
    /// Returns the number of modified samples. Running it twice with
    /// `resubtract_pedestal` removes the pedestal twice.
    pub fn correct(&self, samples: &mut [Sample], tables: &CmTables) -> TpcResult<usize> {
        self.validate_calibration(samples)?;
        let mut partitions = self.partition(samples);
        let counts = self.pool.install(|| {
            partitions
                .par_iter_mut()
                .map(|runs| self.correct_runs(runs, &tables.info))
                .collect::<TpcResult<Vec<usize>>>()
        })?;
        Ok(counts.into_iter().sum())
    }

    /// Inputs of a single cell as seen by the estimator
    pub fn collect_cm_data(&self, samples: &[Sample], group: ChipGroup, time_bin: u32) -> TpcResult<CmData> {
        let mut data = CmData::default();
        for sample in samples.iter().filter(|s| s.cell() == (group, time_bin)) {
            let cal = self.calibration.lookup(sample.group, sample.row, sample.pad)?;
            data.push(sample.charge, cal.coupling, cal.pedestal);
        }
        if self.config.pad_to_full_group && !data.is_empty() {
            data.pad_to(self.geometry.pads_in_group(group));
        }
        Ok(data)
    }

    fn validate_calibration(&self, samples: &[Sample]) -> TpcResult<()> {
        let range = self.config.time_bins;
        for sample in samples.iter().filter(|s| range.contains(s.time_bin)) {
            self.calibration.lookup(sample.group, sample.row, sample.pad)?;
        }
        Ok(())
    }

    /// Split samples into per chip group runs owned by the workers
    fn partition<'s>(&self, samples: &'s mut [Sample]) -> Vec<Vec<&'s mut [Sample]>> {
        let workers = self.config.workers;
        let mut partitions: Vec<Vec<&mut [Sample]>> = (0..workers).map(|_| Vec::new()).collect();
        for run in samples.chunk_by_mut(|a, b| a.group == b.group) {
            let worker = run[0].group.index() % workers;
            partitions[worker].push(run);
        }
        partitions
    }

    fn is_injected_slot(&self, sample: &Sample) -> bool {
        self.config.injected.is_some_and(|positions| {
            let slot = (self.geometry.local_row(sample.group, sample.row), sample.pad);
            slot == positions.lower || slot == positions.upper
        })
    }

    fn inject_artificial(&self, runs: &mut [&mut [Sample]]) -> TpcResult<()> {
        let range = self.config.time_bins;
        let cm = self.config.artificial_cm;
        for sample in runs.iter_mut().flat_map(|run| run.iter_mut()) {
            if !range.contains(sample.time_bin) || self.is_injected_slot(sample) {
                continue;
            }
            let cal = self.calibration.lookup(sample.group, sample.row, sample.pad)?;
            sample.charge = (sample.charge + cm * cal.coupling).clamp(0.0, self.config.max_charge);
        }
        Ok(())
    }

    fn scan(&self, worker: usize, runs: &[&mut [Sample]], max_time_bin: &Mutex<Option<u32>>) -> TpcResult<CmTables> {
        let range = self.config.time_bins;
        let mut scanner = Scanner::new(self, worker);
        for run in runs {
            let mut run_max: Option<u32> = None;
            for sample in run.iter().filter(|s| range.contains(s.time_bin)) {
                scanner.push(sample)?;
                run_max = Some(run_max.map_or(sample.time_bin, |m| m.max(sample.time_bin)));
            }
            if let Some(run_max) = run_max {
                let mut shared = max_time_bin.lock();
                *shared = Some(shared.map_or(run_max, |m| m.max(run_max)));
            }
        }
        Ok(scanner.finish())
    }

    fn correct_runs(&self, runs: &mut [&mut [Sample]], table: &CmTable<CmInfo>) -> TpcResult<usize> {
        let config = &self.config;
        let mut corrected = 0;
        for sample in runs.iter_mut().flat_map(|run| run.iter_mut()) {
            if !config.time_bins.contains(sample.time_bin) {
                continue;
            }
            let Some(info) = table.get(sample.group, sample.time_bin) else {
                continue;
            };
            if (info.n_pads_used as usize) < config.min_usable_pool_size {
                continue;
            }
            if config.negative_only && info.cm_value >= 0.0 {
                continue;
            }

            let cal = self.calibration.lookup(sample.group, sample.row, sample.pad)?;
            sample.charge -= info.cm_value * cal.coupling;
            if config.resubtract_pedestal {
                sample.charge -= cal.pedestal;
            }
            corrected += 1;
        }
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpc_core::{MAX_ADC, TpcGeometry};

    fn cell(group: u16, time_bin: u32, charges: &[f32]) -> Vec<Sample> {
        charges
            .iter()
            .enumerate()
            .map(|(pad, &q)| Sample::new(ChipGroup::new(group), 0, pad as u8, time_bin, q))
            .collect()
    }

    fn engine(config: CmcConfig, samples: &[Sample]) -> CorrectionEngine {
        let calibration = Arc::new(CalibrationMap::uniform_for(samples, 1.0, 0.0));
        CorrectionEngine::new(config, calibration, Arc::new(TpcGeometry)).unwrap()
    }

    #[test]
    fn test_partition_by_group() {
        let mut samples = cell(0, 0, &[1.0; 3]);
        samples.extend(cell(1, 0, &[1.0; 3]));
        samples.extend(cell(2, 0, &[1.0; 3]));
        samples.extend(cell(0, 1, &[1.0; 3]));
        let engine = engine(CmcConfig::default().with_workers(2), &samples);
        let partitions = engine.partition(&mut samples);
        assert_eq!(partitions.len(), 2);
        // groups 0 and 2 on worker 0, group 1 on worker 1
        assert_eq!(partitions[0].len(), 3);
        assert_eq!(partitions[1].len(), 1);
        assert!(partitions[0].iter().all(|run| run[0].group.id() % 2 == 0));
    }

    #[test]
    fn test_scanner_counts_ordering_violation() {
        let mut samples = cell(4, 5, &[-1.0; 4]);
        samples.extend(cell(4, 3, &[-1.0; 4]));
        let config = CmcConfig::default().with_sampling(2, 2);
        let engine = engine(config, &samples);
        let tables = engine.estimate(&mut samples).unwrap();
        assert_eq!(tables.ordering_violations, 1);
        assert_eq!(tables.cells_estimated, 2);
        assert!(tables.info.get(ChipGroup::new(4), 3).is_some());
        assert_eq!(tables.max_time_bin, Some(5));
    }

    #[test]
    fn test_artificial_cm_keeps_saturated_pads() {
        let mut charges = [-1.0f32; 8];
        charges[0] = MAX_ADC;
        let mut plain = cell(2, 0, &charges);
        let mut injected = plain.clone();

        let tables = engine(CmcConfig::default(), &plain).estimate(&mut plain).unwrap();
        assert_eq!(tables.info.get(ChipGroup::new(2), 0).unwrap().n_saturation, 1);

        let config = CmcConfig::default().with_artificial_cm(0.1);
        let tables = engine(config, &injected).estimate(&mut injected).unwrap();
        assert_eq!(injected[0].charge, MAX_ADC);
        assert_eq!(tables.info.get(ChipGroup::new(2), 0).unwrap().n_saturation, 1);
        // clamped at zero from below
        assert!((injected[1].charge - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_collect_cm_data() {
        let mut samples = cell(7, 0, &[1.0, 2.0]);
        samples.extend(cell(7, 1, &[3.0, 4.0, 5.0]));
        let engine = engine(CmcConfig::default(), &samples);
        let data = engine.collect_cm_data(&samples, ChipGroup::new(7), 1).unwrap();
        assert_eq!(data.values, vec![3.0, 4.0, 5.0]);
        assert_eq!(data.coupling, vec![1.0; 3]);
    }

    #[test]
    fn test_records_are_ordered() {
        let mut samples = cell(3, 0, &[-1.0; 4]);
        samples.extend(cell(1, 0, &[-1.0; 4]));
        samples.extend(cell(3, 1, &[-1.0; 4]));
        let engine = engine(CmcConfig::default().with_sampling(2, 2).with_workers(2), &samples);
        let tables = engine.estimate(&mut samples).unwrap();
        let cells: Vec<(u16, u32)> = tables.records().iter().map(|r| (r.group, r.time_bin)).collect();
        assert_eq!(cells, vec![(1, 0), (3, 0), (3, 1)]);
    }
}

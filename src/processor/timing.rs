//! Per-processor timing ledger. Replaces the original's process-wide timing
//! decorator/global accumulator with an explicit struct owned by the
//! Processor, reset on every ScanStart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One row of the timing table published in `ResultStop`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRow {
    pub stage: String,
    pub total: Duration,
    pub calls: u64,
}

/// Aggregated timings across a whole scan, keyed by stage name.
#[derive(Debug, Clone, Default)]
pub struct TimingTable {
    pub rows: Vec<TimingRow>,
}

/// Records per-stage wall-clock duration for the current frame, then folds
/// it into a scan-scoped accumulator at end-of-frame.
#[derive(Debug, Default)]
pub struct TimingLedger {
    accumulated: HashMap<String, (Duration, u64)>,
    frame_started: HashMap<String, Instant>,
}

impl TimingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all accumulated timings. Called on ScanStart.
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.frame_started.clear();
    }

    pub fn start(&mut self, stage: &str) {
        self.frame_started.insert(stage.to_string(), Instant::now());
    }

    /// Stop timing `stage` and fold the elapsed duration into the
    /// accumulator. No-op if `start` was never called for this stage in the
    /// current frame.
    pub fn stop(&mut self, stage: &str) {
        if let Some(started) = self.frame_started.remove(stage) {
            let elapsed = started.elapsed();
            let entry = self
                .accumulated
                .entry(stage.to_string())
                .or_insert((Duration::ZERO, 0));
            entry.0 += elapsed;
            entry.1 += 1;
        }
    }

    /// Time a closure under `stage`, recording the elapsed duration
    /// regardless of whether the closure returns an error.
    pub fn time<T>(&mut self, stage: &str, f: impl FnOnce() -> T) -> T {
        self.start(stage);
        let result = f();
        self.stop(stage);
        result
    }

    /// Snapshot the accumulator as a sorted timing table, for inclusion in
    /// `ResultStop`.
    pub fn as_table(&self) -> TimingTable {
        let mut rows: Vec<TimingRow> = self
            .accumulated
            .iter()
            .map(|(stage, (total, calls))| TimingRow {
                stage: stage.clone(),
                total: *total,
                calls: *calls,
            })
            .collect();
        rows.sort_by(|a, b| a.stage.cmp(&b.stage));
        TimingTable { rows }
    }
}

//! Per-scan numerical pipeline: integration, growable stack, shot-boundary
//! statistics, peak fitting, spectral transforms, timing.
//!
//! A `Processor` is created on ScanStart, owned exclusively by the
//! [`crate::operator::Operator`], and destroyed on ScanStop. Its derived
//! data is copied into messages handed to Publishers; no aliases to its
//! internal buffers escape a `process_event`/`finish` call.

pub mod peaks;
pub mod spectral;
pub mod stack;
pub mod timing;
pub mod welford;

use crate::error::AppResult;
use crate::messages::{Frame, Message, ResultMsg, ResultStopMsg, ShotStats, SpectralTransform};
use crate::protocol::ScanGeometry;
use crate::settings::ProcessingSettings;
use stack::IntegratedStack;
use timing::TimingLedger;
use welford::ShotAccumulator;

pub struct Processor {
    scan_name: String,
    f_reset: u64,
    width: usize,
    stack: IntegratedStack,
    shot_cache: Vec<Vec<f64>>,
    stats: ShotAccumulator,
    n_shots: u64,
    timing: TimingLedger,
    settings: ProcessingSettings,
}

impl Processor {
    /// Construct a fresh Processor for a just-started scan. Timing state
    /// always starts clean; there is no cross-scan accumulator.
    pub fn new(geometry: &ScanGeometry, settings: ProcessingSettings) -> Self {
        Self {
            scan_name: geometry.scan_name.clone(),
            f_reset: geometry.f_reset,
            width: geometry.width,
            stack: IntegratedStack::new(geometry.width),
            shot_cache: Vec::new(),
            stats: ShotAccumulator::new(geometry.width),
            n_shots: 0,
            timing: TimingLedger::new(),
            settings,
        }
    }

    /// Handle one RawEvent. Returns `Some(ResultMsg)` exactly on shot
    /// boundaries (`frame_number > 0 && frame_number % f_reset == 0`);
    /// `None` otherwise. `frame_number == 0` never emits a Result.
    pub fn process_event(&mut self, frame: &Frame) -> AppResult<Option<ResultMsg>> {
        let line = self.timing.time("integrate", || frame.integrate());
        self.timing.time("append_stack", || self.stack.push(&line))?;
        self.timing
            .time("append_shot_cache", || self.shot_cache.push(line.0.clone()));

        let is_shot_boundary = frame.frame_number > 0 && frame.frame_number % self.f_reset == 0;
        if !is_shot_boundary {
            return Ok(None);
        }

        self.n_shots += 1;

        let shot_tensor = self.timing.time("fold_shot", || {
            let mut sum = vec![0.0f64; self.width];
            for row in &self.shot_cache {
                for (i, v) in row.iter().enumerate() {
                    sum[i] += v;
                }
            }
            sum
        });
        self.timing
            .time("welford", || self.stats.update(&shot_tensor));

        let peaks = self.timing.time("peak_fit", || {
            peaks::fit_peaks(&line, self.settings.peak_count, self.settings.peak_shape)
        });

        let chronological = self.stack.rows_chronological();
        let vfft = self.timing.time("vfft", || spectral::vfft(chronological));
        let ifft = self.timing.time("ifft", || {
            spectral::ifft_bandpass(
                chronological,
                self.settings.fft_repeat_factor,
                self.settings.fft_width,
            )
        });

        self.shot_cache.clear();

        Ok(Some(ResultMsg {
            scan_name: self.scan_name.clone(),
            frame_number: frame.frame_number,
            stack_rows: self.stack.rows_newest_first(),
            peaks,
            spectral: SpectralTransform { vfft, ifft },
            shots: ShotStats {
                n_shots: self.n_shots,
                shot_recent: shot_tensor,
                mean: self.stats.mean().to_vec(),
                std: self.stats.std_dev(),
            },
        }))
    }

    /// Publish accumulated timings and consume the Processor.
    pub fn finish(self) -> ResultStopMsg {
        ResultStopMsg {
            scan_name: self.scan_name,
            timing: self.timing.as_table(),
        }
    }

    pub fn scan_name(&self) -> &str {
        &self.scan_name
    }
}

/// Convenience conversion so callers can pattern-match a `Processor`
/// output alongside the rest of the message stream.
pub fn result_to_message(result: ResultMsg) -> Message {
    Message::Result(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PixelBuffer;
    use crate::protocol::DataType;

    fn geometry(width: usize, f_reset: u64) -> ScanGeometry {
        ScanGeometry {
            scan_name: "run-001".to_string(),
            data_type: DataType::U16,
            f_reset,
            height: 2,
            width,
            notes: None,
        }
    }

    fn frame(frame_number: u64, width: usize, height: usize, fill: u16) -> Frame {
        Frame {
            frame_number,
            height,
            width,
            pixels: PixelBuffer::U16(vec![fill; width * height]),
        }
    }

    #[test]
    fn emits_result_exactly_at_shot_boundaries() {
        let mut processor = Processor::new(&geometry(8, 5), ProcessingSettings::default());
        let mut emitted = Vec::new();
        for n in 0..=10u64 {
            let f = frame(n, 8, 2, 7);
            if let Some(result) = processor.process_event(&f).unwrap() {
                emitted.push(result.frame_number);
            }
        }
        assert_eq!(emitted, vec![5, 10]);
    }

    #[test]
    fn shape_invariance_holds_across_events() {
        let mut processor = Processor::new(&geometry(6, 3), ProcessingSettings::default());
        let mut last_result = None;
        for n in 1..=3u64 {
            if let Some(result) = processor.process_event(&frame(n, 6, 2, 1)).unwrap() {
                last_result = Some(result);
            }
        }
        let result = last_result.expect("frame 3 is a shot boundary");
        assert_eq!(result.stack_rows.len(), 3);
        for row in &result.stack_rows {
            assert_eq!(row.len(), 6);
        }
        assert_eq!(result.spectral.vfft.len(), 3);
        assert_eq!(result.spectral.ifft.len(), 3);
    }

    #[test]
    fn frame_zero_never_emits() {
        let mut processor = Processor::new(&geometry(4, 1), ProcessingSettings::default());
        let result = processor.process_event(&frame(0, 4, 1, 1)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn finish_reports_timing_table() {
        let mut processor = Processor::new(&geometry(4, 2), ProcessingSettings::default());
        processor.process_event(&frame(1, 4, 1, 1)).unwrap();
        processor.process_event(&frame(2, 4, 1, 1)).unwrap();
        let stop = processor.finish();
        assert!(!stop.timing.rows.is_empty());
    }
}

//! Tagged message variants flowing from the Decoder through the Operator to
//! the Publishers. Replaces a class-hierarchy/`isinstance` dispatch with a
//! closed sum type: each variant carries an already-validated payload, and
//! the Operator's state transition is a single `match` on the tag.

use crate::processor::timing::TimingTable;
use crate::protocol::{DataType, ScanGeometry};

/// Decoded pixel buffer, host-native byte order, one variant per detector
/// `data_type`.
#[derive(Debug, Clone)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
            PixelBuffer::U32(v) => v.len(),
            PixelBuffer::U64(v) => v.len(),
            PixelBuffer::I8(v) => v.len(),
            PixelBuffer::I16(v) => v.len(),
            PixelBuffer::I32(v) => v.len(),
            PixelBuffer::I64(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
            PixelBuffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every element to `f64` in wire element order, row-major
    /// (H, W).
    pub fn as_f64(&self) -> Vec<f64> {
        match self {
            PixelBuffer::U8(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::U16(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::U32(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::U64(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::I8(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::I16(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::I32(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::I64(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::F32(v) => v.iter().map(|&x| x as f64).collect(),
            PixelBuffer::F64(v) => v.clone(),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            PixelBuffer::U8(_) => DataType::U8,
            PixelBuffer::U16(_) => DataType::U16,
            PixelBuffer::U32(_) => DataType::U32,
            PixelBuffer::U64(_) => DataType::U64,
            PixelBuffer::I8(_) => DataType::I8,
            PixelBuffer::I16(_) => DataType::I16,
            PixelBuffer::I32(_) => DataType::I32,
            PixelBuffer::I64(_) => DataType::I64,
            PixelBuffer::F32(_) => DataType::F32,
            PixelBuffer::F64(_) => DataType::F64,
        }
    }
}

/// A single raw 2-D detector image, already reshaped to (H, W).
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_number: u64,
    pub height: usize,
    pub width: usize,
    pub pixels: PixelBuffer,
}

impl Frame {
    /// Vertical integration: mean of the frame along H, producing a row of
    /// length W.
    pub fn integrate(&self) -> IntegratedLine {
        let flat = self.pixels.as_f64();
        let mut sums = vec![0.0f64; self.width];
        for row in 0..self.height {
            let base = row * self.width;
            for col in 0..self.width {
                sums[col] += flat[base + col];
            }
        }
        let h = self.height as f64;
        for v in sums.iter_mut() {
            *v /= h;
        }
        IntegratedLine(sums)
    }
}

/// A 1-D array of length W: one Frame averaged along H.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratedLine(pub Vec<f64>);

impl IntegratedLine {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// One row of a [`PeakTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeakRow {
    pub index: usize,
    pub amplitude: f64,
    pub fwhm: f64,
    /// Set when the nonlinear fitter failed to converge; amplitude/fwhm are
    /// still best-effort values, never a hard failure.
    pub flag: bool,
}

/// Detected peaks on one IntegratedLine, sorted ascending by `index`,
/// `len() <= K`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakTable {
    pub rows: Vec<PeakRow>,
}

/// VFFT and IFFT band-pass reconstruction, same (N, W) shape as the stack
/// they were derived from.
#[derive(Debug, Clone)]
pub struct SpectralTransform {
    pub vfft: Vec<Vec<f64>>,
    pub ifft: Vec<Vec<f64>>,
}

/// Running statistics over completed shots.
#[derive(Debug, Clone)]
pub struct ShotStats {
    pub n_shots: u64,
    pub shot_recent: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

/// Emitted once per shot boundary.
#[derive(Debug, Clone)]
pub struct ResultMsg {
    pub scan_name: String,
    pub frame_number: u64,
    /// Snapshot of the stack rows, newest-first (see SPEC_FULL.md §9 on
    /// stack growth direction).
    pub stack_rows: Vec<Vec<f64>>,
    pub peaks: PeakTable,
    pub spectral: SpectralTransform,
    pub shots: ShotStats,
}

/// Emitted exactly once, at scan end.
#[derive(Debug, Clone)]
pub struct ResultStopMsg {
    pub scan_name: String,
    pub timing: TimingTable,
}

/// The five message variants flowing through the pipeline.
#[derive(Debug, Clone)]
pub enum Message {
    ScanStart(ScanGeometry),
    RawEvent(Frame),
    ScanStop(Option<serde_json::Value>),
    Result(ResultMsg),
    ResultStop(ResultStopMsg),
}

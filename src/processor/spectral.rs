//! Spectral transforms over an IntegratedStack: VFFT (log-magnitude) and a
//! band-passed IFFT reconstruction, both one-dimensional FFTs along axis 0
//! (the frame-index axis), one column at a time.
//!
//! Grounded on the teacher's `rustfft` + `num-complex` idiom
//! (`data/fft.rs`'s `Arc<dyn Fft<f64>>` planner use).

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

const EPSILON: f64 = 1e-5;

/// `|log(|FFT along axis 0| + epsilon)|`. Input and output are both (N, W).
/// Returns an error-shaped empty result for an empty stack; callers check
/// `rows.is_empty()` rather than matching a distinct error type, mirroring
/// the spec's "skip the shot-boundary emission" guidance for truly empty
/// inputs.
pub fn vfft(rows_chronological: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = rows_chronological.len();
    if n == 0 {
        return Vec::new();
    }
    let width = rows_chronological[0].len();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);

    let mut out = vec![vec![0.0f64; width]; n];
    for col in 0..width {
        let mut buf: Vec<Complex64> = rows_chronological
            .iter()
            .map(|row| Complex64::new(row[col], 0.0))
            .collect();
        fft.process(&mut buf);
        for (row_idx, value) in buf.into_iter().enumerate() {
            out[row_idx][col] = (value.norm() + EPSILON).ln().abs();
        }
    }
    out
}

/// Band-passed IFFT reconstruction: FFT along axis 0, retain samples every
/// `floor(N / repeat_factor)` rows (stride >= 1) plus a symmetric window of
/// `width` rows around each retained index, zero elsewhere, inverse FFT,
/// take magnitude. Shape matches the input.
pub fn ifft_bandpass(
    rows_chronological: &[Vec<f64>],
    repeat_factor: usize,
    width_rows: usize,
) -> Vec<Vec<f64>> {
    let n = rows_chronological.len();
    if n == 0 {
        return Vec::new();
    }
    let width = rows_chronological[0].len();
    let stride = (n / repeat_factor.max(1)).max(1);

    let mut retained = vec![false; n];
    let mut idx = 0;
    while idx < n {
        for offset in 0..=(2 * width_rows) {
            let candidate = idx as isize + offset as isize - width_rows as isize;
            if candidate >= 0 && (candidate as usize) < n {
                retained[candidate as usize] = true;
            }
        }
        idx += stride;
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft_fwd = planner.plan_fft_forward(n);
    let fft_inv = planner.plan_fft_inverse(n);
    let scale = 1.0 / n as f64;

    let mut out = vec![vec![0.0f64; width]; n];
    for col in 0..width {
        let mut buf: Vec<Complex64> = rows_chronological
            .iter()
            .map(|row| Complex64::new(row[col], 0.0))
            .collect();
        fft_fwd.process(&mut buf);
        for (row_idx, value) in buf.iter_mut().enumerate() {
            if !retained[row_idx] {
                *value = Complex64::new(0.0, 0.0);
            }
        }
        fft_inv.process(&mut buf);
        for (row_idx, value) in buf.into_iter().enumerate() {
            out[row_idx][col] = (value * scale).norm();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_300x1131() -> Vec<Vec<f64>> {
        (0..300)
            .map(|r| (0..1131).map(|c| (r * 1131 + c) as f64 * 0.001).collect())
            .collect()
    }

    #[test]
    fn vfft_preserves_stack_shape() {
        let stack = stack_300x1131();
        let result = vfft(&stack);
        assert_eq!(result.len(), 300);
        assert_eq!(result[0].len(), 1131);
    }

    #[test]
    fn row_sum_of_vfft_is_one_dimensional() {
        let stack = stack_300x1131();
        let result = vfft(&stack);
        let row_sums: Vec<f64> = result.iter().map(|row| row.iter().sum()).collect();
        assert_eq!(row_sums.len(), 300);
    }

    #[test]
    fn ifft_preserves_stack_shape() {
        let stack = stack_300x1131();
        let result = ifft_bandpass(&stack, 25, 0);
        assert_eq!(result.len(), 300);
        assert_eq!(result[0].len(), 1131);
    }

    #[test]
    fn empty_stack_yields_empty_transforms() {
        assert!(vfft(&[]).is_empty());
        assert!(ifft_bandpass(&[], 25, 0).is_empty());
    }

    #[test]
    fn constant_column_ifft_recovers_dc_value() {
        let stack: Vec<Vec<f64>> = (0..16).map(|_| vec![5.0]).collect();
        let result = ifft_bandpass(&stack, 25, 0);
        // stride = max(16/25,1) = 1 -> every row retained -> perfect round trip
        for row in &result {
            assert!((row[0] - 5.0).abs() < 1e-9);
        }
    }
}

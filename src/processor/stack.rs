//! Growable row buffer backing `IntegratedStack`.
//!
//! Rows are appended in chronological order as they arrive — `Vec::push`
//! already gives amortized O(1) geometric reallocation, which is what
//! matters here: the original per-row `pd.concat` pattern copied the whole
//! growing frame on every single event, an O(N^2) cost at this scale. The
//! "prepend-newest" view the rest of the pipeline expects is just a read-
//! order choice (`rows_newest_first`), not a storage order.

use crate::error::{AppResult, XpsError};
use crate::messages::IntegratedLine;

#[derive(Debug, Clone)]
pub struct IntegratedStack {
    width: usize,
    rows: Vec<Vec<f64>>,
}

impl IntegratedStack {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: Vec::new(),
        }
    }

    /// Number of accepted rows (== events since scan start).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Append one IntegratedLine. All rows must share `width`.
    pub fn push(&mut self, line: &IntegratedLine) -> AppResult<()> {
        if line.len() != self.width {
            return Err(XpsError::Protocol(format!(
                "row width mismatch: expected {}, got {}",
                self.width,
                line.len()
            )));
        }
        self.rows.push(line.0.clone());
        Ok(())
    }

    /// The most recently appended row, if any.
    pub fn newest(&self) -> Option<&[f64]> {
        self.rows.last().map(|v| v.as_slice())
    }

    /// Rows in chronological (oldest-first) order — used by the spectral
    /// transforms (axis 0 = ascending frame index) and by the archive
    /// sink's append-only writes.
    pub fn rows_chronological(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Rows in logical newest-first order, for a Result snapshot.
    pub fn rows_newest_first(&self) -> Vec<Vec<f64>> {
        self.rows.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_width_mismatch() {
        let mut stack = IntegratedStack::new(3);
        let bad = IntegratedLine(vec![1.0, 2.0]);
        assert!(stack.push(&bad).is_err());
    }

    #[test]
    fn newest_first_view_reverses_chronological() {
        let mut stack = IntegratedStack::new(1);
        for v in [1.0, 2.0, 3.0] {
            stack.push(&IntegratedLine(vec![v])).unwrap();
        }
        assert_eq!(stack.rows_chronological(), &[vec![1.0], vec![2.0], vec![3.0]]);
        assert_eq!(stack.rows_newest_first(), vec![vec![3.0], vec![2.0], vec![1.0]]);
        assert_eq!(stack.newest(), Some(&[3.0][..]));
    }

    #[test]
    fn shape_grows_by_one_row_per_push() {
        let mut stack = IntegratedStack::new(4);
        for i in 0..10 {
            stack.push(&IntegratedLine(vec![i as f64; 4])).unwrap();
            assert_eq!(stack.len(), i + 1);
            assert_eq!(stack.width(), 4);
        }
    }
}

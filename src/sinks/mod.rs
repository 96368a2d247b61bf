//! Output sinks. Each sink owns one [`crate::publisher::SubscriberQueue`]
//! handed to it by whatever wires the pipeline together (`main.rs`) and
//! pulls messages from it independently — a slow or disconnected sink only
//! ever affects its own queue, never its siblings.

pub mod archive;
pub mod websocket;

/// Normalize a matrix to u8 via log-stretch: `y = (x - min) / (max - min)`,
/// `z = log1p(y)`, `z' = (z - min(z)) / (max(z) - min(z))`,
/// `u8 = floor(255 * z')`. Constant input (max == min at either stage)
/// normalizes to all-zero rather than dividing by zero.
pub fn log_stretch_u8(rows: &[Vec<f64>]) -> Vec<Vec<u8>> {
    if rows.is_empty() {
        return Vec::new();
    }

    let (x_min, x_max) = min_max(rows);
    let y: Vec<Vec<f64>> = rows
        .iter()
        .map(|row| row.iter().map(|&x| normalize(x, x_min, x_max)).collect())
        .collect();
    let z: Vec<Vec<f64>> = y
        .iter()
        .map(|row| row.iter().map(|&v| v.ln_1p()).collect())
        .collect();
    let (z_min, z_max) = min_max(&z);

    z.iter()
        .map(|row| {
            row.iter()
                .map(|&v| {
                    let zp = normalize(v, z_min, z_max);
                    (255.0 * zp).floor().clamp(0.0, 255.0) as u8
                })
                .collect()
        })
        .collect()
}

fn normalize(x: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        0.0
    } else {
        (x - min) / (max - min)
    }
}

fn min_max(rows: &[Vec<f64>]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for row in rows {
        for &v in row {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
    }
    if !min.is_finite() || !max.is_finite() {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_input_normalizes_to_zero() {
        let rows = vec![vec![5.0; 4]; 3];
        let out = log_stretch_u8(&rows);
        for row in out {
            assert!(row.iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn output_spans_full_u8_range_for_linear_ramp() {
        let rows = vec![(0..256).map(|v| v as f64).collect::<Vec<_>>()];
        let out = log_stretch_u8(&rows);
        assert_eq!(*out[0].iter().min().unwrap(), 0);
        assert!(*out[0].iter().max().unwrap() >= 250);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = log_stretch_u8(&[]);
        assert!(out.is_empty());
    }

    #[test]
    fn u8_image_survives_a_widen_and_narrow_round_trip() {
        let rows = vec![vec![3u8, 40, 255, 0, 128]];
        let widened: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| row.iter().map(|&v| v as f64).collect())
            .collect();
        let narrowed: Vec<Vec<u8>> = widened
            .iter()
            .map(|row| row.iter().map(|&v| v.round() as u8).collect())
            .collect();
        assert_eq!(rows, narrowed);
    }
}

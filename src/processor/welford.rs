//! Online running mean/variance over shot tensors (elementwise, vector
//! Welford).

#[derive(Debug, Clone)]
pub struct ShotAccumulator {
    n: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl ShotAccumulator {
    pub fn new(width: usize) -> Self {
        Self {
            n: 0,
            mean: vec![0.0; width],
            m2: vec![0.0; width],
        }
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    /// Fold one completed shot tensor into the running statistics.
    pub fn update(&mut self, shot: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for i in 0..self.mean.len() {
            let x = shot[i];
            let delta = x - self.mean[i];
            let mean_new = self.mean[i] + delta / n;
            self.m2[i] += delta * (x - mean_new);
            self.mean[i] = mean_new;
        }
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn variance(&self) -> Vec<f64> {
        if self.n == 0 {
            return vec![0.0; self.mean.len()];
        }
        let n = self.n as f64;
        self.m2.iter().map(|&m2| m2 / n).collect()
    }

    pub fn std_dev(&self) -> Vec<f64> {
        self.variance().into_iter().map(|v| v.sqrt()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_arithmetic_mean_and_variance() {
        let shots = [vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 0.0]];
        let mut acc = ShotAccumulator::new(2);
        for s in &shots {
            acc.update(s);
        }
        assert_eq!(acc.n(), 3);

        let expected_mean = [3.0, 2.0];
        for (got, want) in acc.mean().iter().zip(expected_mean) {
            assert!((got - want).abs() < 1e-9);
        }

        // population variance: col0 = [1,3,5] var=8/3, col1=[2,4,0] var=8/3
        for v in acc.variance() {
            assert!((v - 8.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_shots_has_zero_variance() {
        let acc = ShotAccumulator::new(3);
        assert_eq!(acc.n(), 0);
        assert_eq!(acc.variance(), vec![0.0, 0.0, 0.0]);
    }
}

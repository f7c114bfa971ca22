use serde::Serialize;

use super::types::ModelError;

/// Count, sum and sum of squares of one quantity, plus its `k` smallest and
/// `k` largest values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailStat {
    capacity: usize,
    count: u64,
    sum: f64,
    sum_sq: f64,
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailSummary {
    pub min: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub max: f64,
    pub count: u64,
}

impl TailStat {
    pub fn new(capacity: usize) -> Result<Self, ModelError> {
        if capacity < 1 {
            return Err(ModelError::InvalidConfiguration(
                "tail size must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            mins: Vec::with_capacity(capacity),
            maxs: Vec::with_capacity(capacity),
        })
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;

        if self.mins.len() < self.capacity {
            self.mins.push(value);
            self.mins.sort_by(f64::total_cmp);
            self.maxs.push(value);
            self.maxs.sort_by(f64::total_cmp);
            return;
        }

        // Buffers are full: only values beating the current extremes get in.
        if value < self.mins[self.capacity - 1] {
            let at = self.mins.partition_point(|m| *m <= value);
            self.mins.insert(at, value);
            self.mins.truncate(self.capacity);
        }
        if value > self.maxs[0] {
            let at = self.maxs.partition_point(|m| *m < value);
            self.maxs.insert(at, value);
            self.maxs.remove(0);
        }
    }

    pub fn merge(&mut self, other: &TailStat) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;

        self.mins.extend_from_slice(&other.mins);
        self.mins.sort_by(f64::total_cmp);
        self.mins.truncate(self.capacity);

        self.maxs.extend_from_slice(&other.maxs);
        self.maxs.sort_by(f64::total_cmp);
        let excess = self.maxs.len().saturating_sub(self.capacity);
        self.maxs.drain(..excess);
    }

    pub fn summary(&self) -> TailSummary {
        if self.count == 0 {
            return TailSummary {
                min: 0.0,
                mean: 0.0,
                std_dev: 0.0,
                max: 0.0,
                count: 0,
            };
        }

        let n = self.count as f64;
        let mean = self.sum / n;
        let std_dev = if self.count < 2 {
            0.0
        } else {
            (self.sum_sq / (n - 1.0) - mean * mean).max(0.0).sqrt()
        };

        TailSummary {
            min: buffer_mean(&self.mins),
            mean,
            std_dev,
            max: buffer_mean(&self.maxs),
            count: self.count,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn sum_sq(&self) -> f64 {
        self.sum_sq
    }

    pub fn mins(&self) -> &[f64] {
        &self.mins
    }

    pub fn maxs(&self) -> &[f64] {
        &self.maxs
    }
}

fn buffer_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sorted(values: &[f64]) -> Vec<f64> {
        let mut out = values.to_vec();
        out.sort_by(f64::total_cmp);
        out
    }

    fn smallest(values: &[f64], k: usize) -> Vec<f64> {
        let mut out = sorted(values);
        out.truncate(k);
        out
    }

    fn largest(values: &[f64], k: usize) -> Vec<f64> {
        let out = sorted(values);
        out[out.len().saturating_sub(k)..].to_vec()
    }

    fn filled(k: usize, values: &[f64]) -> TailStat {
        let mut stat = TailStat::new(k).expect("k >= 1");
        for &v in values {
            stat.add(v);
        }
        stat
    }

    #[test]
    fn new_rejects_zero_capacity() {
        assert!(matches!(
            TailStat::new(0),
            Err(ModelError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn add_keeps_extremes_sorted() {
        let stat = filled(3, &[5.0, 1.0, 9.0, 3.0, 7.0, 0.5, 12.0]);
        assert_eq!(stat.mins(), &[0.5, 1.0, 3.0]);
        assert_eq!(stat.maxs(), &[7.0, 9.0, 12.0]);
        assert_eq!(stat.count(), 7);
    }

    #[test]
    fn add_with_fewer_values_than_capacity_holds_everything() {
        let stat = filled(5, &[2.0, -1.0]);
        assert_eq!(stat.mins(), &[-1.0, 2.0]);
        assert_eq!(stat.maxs(), &[-1.0, 2.0]);
    }

    #[test]
    fn summary_of_empty_stat_is_all_zero() {
        let stat = TailStat::new(4).expect("k >= 1");
        let summary = stat.summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, 0.0);
        assert_eq!(summary.min, 0.0);
        assert_eq!(summary.max, 0.0);
        assert_eq!(summary.std_dev, 0.0);
    }

    #[test]
    fn summary_single_value_has_zero_spread() {
        let summary = filled(2, &[42.0]).summary();
        assert_approx(summary.mean, 42.0);
        assert_approx(summary.min, 42.0);
        assert_approx(summary.max, 42.0);
        assert_eq!(summary.std_dev, 0.0);
    }

    #[test]
    fn summary_averages_tail_buffers() {
        let summary = filled(2, &[1.0, 2.0, 3.0, 4.0, 10.0]).summary();
        assert_approx(summary.min, 1.5);
        assert_approx(summary.max, 7.0);
        assert_approx(summary.mean, 4.0);
        // sum_sq / (n - 1) - mean^2 = 130 / 4 - 16
        assert_approx(summary.std_dev, (130.0_f64 / 4.0 - 16.0).sqrt());
    }

    #[test]
    fn merge_into_empty_copies_other() {
        let other = filled(3, &[4.0, 8.0, 1.0, 6.0]);
        let mut stat = TailStat::new(3).expect("k >= 1");
        stat.merge(&other);
        assert_eq!(stat, other);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_add_tracks_k_smallest_and_largest(
            values in vec(-1.0e6..1.0e6f64, 0..200),
            k in 1usize..12,
        ) {
            let stat = filled(k, &values);
            prop_assert_eq!(stat.count(), values.len() as u64);
            prop_assert_eq!(stat.mins().to_vec(), smallest(&values, k));
            prop_assert_eq!(stat.maxs().to_vec(), largest(&values, k));
        }

        #[test]
        fn prop_merge_matches_single_accumulator(
            values in vec(-1.0e6..1.0e6f64, 0..200),
            split in 0usize..200,
            k in 1usize..12,
        ) {
            let split = split.min(values.len());
            let whole = filled(k, &values);
            let mut left = filled(k, &values[..split]);
            let right = filled(k, &values[split..]);
            left.merge(&right);

            prop_assert_eq!(left.count(), whole.count());
            prop_assert_eq!(left.mins(), whole.mins());
            prop_assert_eq!(left.maxs(), whole.maxs());
            let tol = 1e-6 * (1.0 + whole.sum_sq().abs());
            prop_assert!((left.sum() - whole.sum()).abs() <= tol);
            prop_assert!((left.sum_sq() - whole.sum_sq()).abs() <= tol);
        }
    }
}

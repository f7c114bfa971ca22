use serde::Serialize;
use thiserror::Error;

use super::tail_stat::TailStat;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

fn invalid(msg: &str) -> ModelError {
    ModelError::InvalidConfiguration(msg.to_string())
}

/// Parameters for one simulation run. Rates are fractions, money is in
/// year-0 currency.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub initial_portfolio: f64,
    pub target_income: f64,
    pub min_income: f64,
    pub rtn_mean: f64,
    pub rtn_sd: f64,
    pub min_growth: f64,
    pub inflation: f64,
    /// Mean years between crashes; 0 disables crashes.
    pub crash_interval: u32,
    pub crash_loss: f64,
    pub years_deferred: u32,
    pub years: u32,
    pub trials: u32,
    pub draws_per_year: u32,
    pub tail_size: usize,
    /// Base seed for per-trial generators; `None` seeds from the clock.
    pub seed: Option<u64>,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.min_income > self.target_income {
            return Err(invalid("min income must be <= target income"));
        }
        if self.tail_size < 1 {
            return Err(invalid("tail size must be >= 1"));
        }
        if self.years < 1 {
            return Err(invalid("years must be >= 1"));
        }
        if self.trials < 1 {
            return Err(invalid("trials must be >= 1"));
        }
        if self.draws_per_year < 1 {
            return Err(invalid("draws per year must be >= 1"));
        }
        if !self.rtn_mean.is_finite() {
            return Err(invalid("return mean must be finite"));
        }
        if !self.rtn_sd.is_finite() || self.rtn_sd < 0.0 {
            return Err(invalid("return standard deviation must be finite and >= 0"));
        }
        Ok(())
    }

    pub fn crash_probability(&self) -> f64 {
        if self.crash_interval == 0 {
            0.0
        } else {
            1.0 / self.crash_interval as f64
        }
    }

    pub fn is_deferred(&self, year: u32) -> bool {
        year < self.years_deferred
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            initial_portfolio: 1_000_000.0,
            target_income: 40_000.0,
            min_income: 0.0,
            rtn_mean: 0.07,
            rtn_sd: 0.12,
            min_growth: 0.0,
            inflation: 0.025,
            crash_interval: 0,
            crash_loss: 0.3,
            years_deferred: 0,
            years: 30,
            trials: 10_000,
            draws_per_year: 12,
            tail_size: 10,
            seed: None,
        }
    }
}

/// Per-year tallies across all trials a worker (or the merger) has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearAggregate {
    pub year: u32,
    pub withdrawal_deferred: bool,
    pub crash_count: u64,
    pub bust_count: u64,
    pub portfolio_shrunk_count: u64,
    pub surplus_count: u64,
    pub minimal_income_count: u64,
    pub portfolio: TailStat,
    pub income: TailStat,
}

impl YearAggregate {
    pub fn new(year: u32, withdrawal_deferred: bool, tail_size: usize) -> Result<Self, ModelError> {
        Ok(Self {
            year,
            withdrawal_deferred,
            crash_count: 0,
            bust_count: 0,
            portfolio_shrunk_count: 0,
            surplus_count: 0,
            minimal_income_count: 0,
            portfolio: TailStat::new(tail_size)?,
            income: TailStat::new(tail_size)?,
        })
    }

    /// One empty bucket per simulated year.
    pub fn empty_series(config: &ModelConfig) -> Result<Vec<Self>, ModelError> {
        (0..config.years)
            .map(|year| Self::new(year, config.is_deferred(year), config.tail_size))
            .collect()
    }

    pub fn merge(&mut self, other: &YearAggregate) {
        debug_assert_eq!(self.year, other.year);
        self.crash_count += other.crash_count;
        self.bust_count += other.bust_count;
        self.portfolio_shrunk_count += other.portfolio_shrunk_count;
        self.surplus_count += other.surplus_count;
        self.minimal_income_count += other.minimal_income_count;
        self.portfolio.merge(&other.portfolio);
        self.income.merge(&other.income);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_min_income_above_target() {
        let config = ModelConfig {
            target_income: 100.0,
            min_income: 150.0,
            ..ModelConfig::default()
        };
        let err = config.validate().expect_err("must reject floor above target");
        assert!(matches!(err, ModelError::InvalidConfiguration(ref m) if m.contains("min income")));
    }

    #[test]
    fn validate_rejects_zero_counts() {
        let base = ModelConfig::default();
        for config in [
            ModelConfig { tail_size: 0, ..base.clone() },
            ModelConfig { years: 0, ..base.clone() },
            ModelConfig { trials: 0, ..base.clone() },
            ModelConfig { draws_per_year: 0, ..base.clone() },
            ModelConfig { rtn_sd: -0.1, ..base.clone() },
        ] {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
        assert!(base.validate().is_ok());
    }

    #[test]
    fn crash_probability_is_zero_when_disabled() {
        let mut config = ModelConfig::default();
        assert_eq!(config.crash_probability(), 0.0);
        config.crash_interval = 4;
        assert_eq!(config.crash_probability(), 0.25);
    }

    #[test]
    fn empty_series_marks_deferred_years() {
        let config = ModelConfig {
            years: 4,
            years_deferred: 2,
            ..ModelConfig::default()
        };
        let series = YearAggregate::empty_series(&config).expect("valid tail size");
        let flags: Vec<bool> = series.iter().map(|y| y.withdrawal_deferred).collect();
        assert_eq!(flags, vec![true, true, false, false]);
        assert!(series.iter().enumerate().all(|(i, y)| y.year == i as u32));
    }
}

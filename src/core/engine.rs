use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::types::{ModelConfig, ModelError, YearAggregate};

#[derive(Debug, Clone)]
pub struct TrialState {
    pub portfolio: f64,
    pub current_income: f64,
    /// Last year's return, used as this year's forecast.
    pub current_return: f64,
    pub inflation_factor: f64,
    pub nominal_target_income: f64,
    pub nominal_min_income: f64,
    pub bust: bool,
}

impl TrialState {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            portfolio: config.initial_portfolio,
            current_income: config.target_income,
            current_return: config.rtn_mean,
            inflation_factor: 1.0,
            nominal_target_income: config.target_income,
            nominal_min_income: config.min_income,
            bust: false,
        }
    }

    pub fn reset(&mut self, config: &ModelConfig) {
        *self = Self::new(config);
    }

    /// Returns `true` when the portfolio ran dry during the year.
    fn step_year(
        &mut self,
        config: &ModelConfig,
        year: u32,
        annual_return: f64,
        bucket: &mut YearAggregate,
    ) -> bool {
        let deferred = config.is_deferred(year);

        let withdrawal = if deferred {
            0.0
        } else {
            bucket.income.add(self.current_income / self.inflation_factor);
            self.current_income = self.planned_income(config, bucket);
            self.current_income
        };

        let periods = config.draws_per_year;
        let growth = 1.0 + annual_return;
        if growth <= 0.0 {
            // Losing the whole portfolio or more.
            self.portfolio = 0.0;
            self.bust = true;
        } else {
            let period_mult = growth.powf(1.0 / periods as f64);
            let period_income = withdrawal / periods as f64;
            for _ in 0..periods {
                self.portfolio -= period_income;
                if self.portfolio <= 0.0 {
                    self.portfolio = 0.0;
                    self.bust = true;
                    break;
                }
                self.portfolio *= period_mult;
            }
        }
        self.current_return = annual_return;

        if self.bust {
            return true;
        }

        let real_portfolio = self.portfolio / self.inflation_factor;
        bucket.portfolio.add(real_portfolio);
        if real_portfolio < config.initial_portfolio {
            bucket.portfolio_shrunk_count += 1;
        }

        let step = 1.0 + config.inflation;
        self.inflation_factor *= step;
        self.nominal_target_income *= step;
        self.nominal_min_income *= step;
        if deferred {
            // Drawing opens at the inflated target once deferral ends.
            self.current_income = self.nominal_target_income;
        }
        false
    }

    fn planned_income(&self, config: &ModelConfig, bucket: &mut YearAggregate) -> f64 {
        let available = self.portfolio * self.current_return;
        let desired_growth = self.portfolio * (config.inflation + config.min_growth);
        let income = available - desired_growth;

        if income > self.nominal_target_income {
            bucket.surplus_count += 1;
            self.nominal_target_income
        } else if income < self.nominal_min_income {
            bucket.minimal_income_count += 1;
            self.nominal_min_income
        } else {
            income
        }
    }
}

pub struct TrialRunner<'a> {
    config: &'a ModelConfig,
    returns: Normal<f64>,
    crash_probability: f64,
    base_seed: u64,
    rng: StdRng,
    state: TrialState,
}

impl<'a> TrialRunner<'a> {
    pub fn new(config: &'a ModelConfig, base_seed: u64) -> Result<Self, ModelError> {
        let returns = Normal::new(config.rtn_mean, config.rtn_sd)
            .map_err(|e| ModelError::InvalidConfiguration(format!("return distribution: {e}")))?;
        Ok(Self {
            config,
            returns,
            crash_probability: config.crash_probability(),
            base_seed,
            rng: StdRng::seed_from_u64(base_seed),
            state: TrialState::new(config),
        })
    }

    pub fn run(
        &mut self,
        first_trial: u64,
        count: u64,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<YearAggregate>, ModelError> {
        let mut years = YearAggregate::empty_series(self.config)?;
        for trial in first_trial..first_trial + count {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                break;
            }
            self.run_trial(trial, &mut years);
        }
        Ok(years)
    }

    fn run_trial(&mut self, trial: u64, years: &mut [YearAggregate]) {
        self.rng = StdRng::seed_from_u64(derive_seed(self.base_seed, trial));
        self.state.reset(self.config);

        for year in 0..self.config.years {
            let index = year as usize;
            let mut annual_return = self.returns.sample(&mut self.rng);
            if self.crash_probability > 0.0 && self.rng.random::<f64>() < self.crash_probability
            {
                annual_return = -self.config.crash_loss;
                years[index].crash_count += 1;
            }

            if self.state.step_year(self.config, year, annual_return, &mut years[index]) {
                for bucket in &mut years[index..] {
                    bucket.bust_count += 1;
                }
                return;
            }
        }
    }
}

pub fn derive_seed(base_seed: u64, trial: u64) -> u64 {
    splitmix64(base_seed ^ trial.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

use std::panic;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{Receiver, sync_channel};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use super::engine::TrialRunner;
use super::types::{ModelConfig, ModelError, YearAggregate};

pub struct Simulator {
    config: ModelConfig,
    parallelism: usize,
    cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shard {
    first_trial: u64,
    count: u64,
}

impl Simulator {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        Ok(Self {
            config,
            parallelism: default_parallelism(),
            cancel: None,
        })
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Workers stop picking up new trials once `cancel` is raised.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn run(&self) -> Result<Vec<YearAggregate>, ModelError> {
        let base_seed = self.config.seed.unwrap_or_else(clock_seed);
        run_sharded(
            &self.config,
            self.parallelism,
            base_seed,
            self.cancel.as_deref(),
        )
    }
}

/// Hardware threads minus one, never zero.
pub fn default_parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn worker_count(trials: u32, parallelism: usize) -> usize {
    parallelism.min(trials as usize).max(1)
}

fn partition(trials: u32, workers: usize) -> Vec<Shard> {
    let trials = trials as u64;
    let chunk = trials.div_ceil(workers as u64);
    let mut remaining = trials;
    let mut first_trial = 0;
    (0..workers)
        .map(|index| {
            let count = if index + 1 == workers {
                remaining
            } else {
                chunk.min(remaining)
            };
            let shard = Shard { first_trial, count };
            first_trial += count;
            remaining -= count;
            shard
        })
        .collect()
}

fn run_sharded(
    config: &ModelConfig,
    parallelism: usize,
    base_seed: u64,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<YearAggregate>, ModelError> {
    let workers = worker_count(config.trials, parallelism);
    let shards = partition(config.trials, workers);
    let started = Instant::now();
    info!(
        trials = config.trials,
        years = config.years,
        workers,
        "starting simulation"
    );

    let merged = thread::scope(|scope| {
        let (tx, rx) = sync_channel::<Vec<YearAggregate>>(2 * workers);
        let merger = scope.spawn(move || merge_partials(config, rx));

        let handles: Vec<_> = shards
            .into_iter()
            .enumerate()
            .map(|(worker, shard)| {
                let tx = tx.clone();
                scope.spawn(move || -> Result<(), ModelError> {
                    let mut runner = TrialRunner::new(config, base_seed)?;
                    let partial = runner.run(shard.first_trial, shard.count, cancel)?;
                    debug!(worker, trials = shard.count, "worker finished");
                    let _ = tx.send(partial);
                    Ok(())
                })
            })
            .collect();

        let mut outcome = Ok(());
        for handle in handles {
            match handle.join() {
                Ok(result) => {
                    if outcome.is_ok() {
                        outcome = result;
                    }
                }
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        drop(tx);

        let merged = match merger.join() {
            Ok(merged) => merged,
            Err(payload) => panic::resume_unwind(payload),
        };
        outcome.and(merged)
    })?;

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "simulation finished");
    Ok(merged)
}

fn merge_partials(
    config: &ModelConfig,
    rx: Receiver<Vec<YearAggregate>>,
) -> Result<Vec<YearAggregate>, ModelError> {
    let mut merged = YearAggregate::empty_series(config)?;
    for (received, partial) in rx.into_iter().enumerate() {
        for (total, year) in merged.iter_mut().zip(&partial) {
            total.merge(year);
        }
        debug!(partial = received, "merged partial result");
    }
    Ok(merged)
}

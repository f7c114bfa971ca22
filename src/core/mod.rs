mod engine;
mod report;
mod simulator;
mod tail_stat;
mod types;

pub use engine::{TrialRunner, TrialState, derive_seed};
pub use report::{Report, ReportRow, render_table};
pub use simulator::{Simulator, default_parallelism};
pub use tail_stat::{TailStat, TailSummary};
pub use types::{ModelConfig, ModelError, YearAggregate};

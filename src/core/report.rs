use std::fmt::Write;

use serde::Serialize;

use super::tail_stat::TailSummary;
use super::types::{ModelConfig, YearAggregate};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub year: u32,
    pub withdrawal_deferred: bool,
    pub portfolio: TailSummary,
    pub income: TailSummary,
    pub shrink_fraction: f64,
    pub drawing_covered_fraction: f64,
    pub drawing_minimal_fraction: f64,
    pub bust_fraction: f64,
    pub crash_fraction: f64,
    pub mean_income_as_portfolio_fraction: f64,
    pub mean_nett_return: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub trials: u32,
    pub years: u32,
    pub initial_portfolio: f64,
    pub target_income: f64,
    pub rows: Vec<ReportRow>,
}

impl Report {
    /// Builds rows for years `0, n, 2n, ...` and always the final year.
    /// Year-over-year returns are tracked across hidden years too.
    pub fn build(config: &ModelConfig, years: &[YearAggregate], show_every_n: u32) -> Self {
        let stride = show_every_n.max(1);
        let trials = config.trials as f64;
        let fraction = |count: u64| {
            if config.trials == 0 {
                0.0
            } else {
                count as f64 / trials
            }
        };

        let mut prev_portfolio_mean = config.initial_portfolio;
        let mut rows = Vec::new();
        for (index, year) in years.iter().enumerate() {
            let portfolio = year.portfolio.summary();
            let income = year.income.summary();

            let mean_nett_return = if prev_portfolio_mean == 0.0 {
                0.0
            } else {
                (portfolio.mean - prev_portfolio_mean) / prev_portfolio_mean
            };
            prev_portfolio_mean = portfolio.mean;

            let is_last = index + 1 == years.len();
            if year.year % stride != 0 && !is_last {
                continue;
            }

            rows.push(ReportRow {
                year: year.year,
                withdrawal_deferred: year.withdrawal_deferred,
                portfolio,
                income,
                shrink_fraction: fraction(year.portfolio_shrunk_count),
                drawing_covered_fraction: fraction(year.surplus_count),
                drawing_minimal_fraction: fraction(year.minimal_income_count),
                bust_fraction: fraction(year.bust_count),
                crash_fraction: fraction(year.crash_count),
                mean_income_as_portfolio_fraction: if portfolio.mean == 0.0 {
                    0.0
                } else {
                    income.mean / portfolio.mean
                },
                mean_nett_return,
            });
        }

        Self {
            trials: config.trials,
            years: config.years,
            initial_portfolio: config.initial_portfolio,
            target_income: config.target_income,
            rows,
        }
    }
}

pub fn render_table(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} trials over {} years, starting portfolio {:.0}, target income {:.0} (real terms)",
        report.trials, report.years, report.initial_portfolio, report.target_income
    );
    let _ = writeln!(
        out,
        "{:>4} {:>12} {:>12} {:>12} {:>12} {:>9} {:>9} {:>9} {:>9} {:>6} {:>6} {:>6} {:>6} {:>7} {:>7}",
        "Year",
        "PortMin",
        "PortMean",
        "PortSD",
        "PortMax",
        "IncMin",
        "IncMean",
        "IncSD",
        "IncMax",
        "Shrunk",
        "Cover",
        "Floor",
        "Bust",
        "Inc/Pf",
        "Return",
    );
    let _ = writeln!(out, "{}", "-".repeat(140));

    for row in &report.rows {
        let marker = if row.withdrawal_deferred { "*" } else { " " };
        let _ = writeln!(
            out,
            "{:>3}{} {:>12.0} {:>12.0} {:>12.0} {:>12.0} {:>9.0} {:>9.0} {:>9.0} {:>9.0} {:>5.1}% {:>5.1}% {:>5.1}% {:>5.1}% {:>6.2}% {:>6.2}%",
            row.year,
            marker,
            row.portfolio.min,
            row.portfolio.mean,
            row.portfolio.std_dev,
            row.portfolio.max,
            row.income.min,
            row.income.mean,
            row.income.std_dev,
            row.income.max,
            row.shrink_fraction * 100.0,
            row.drawing_covered_fraction * 100.0,
            row.drawing_minimal_fraction * 100.0,
            row.bust_fraction * 100.0,
            row.mean_income_as_portfolio_fraction * 100.0,
            row.mean_nett_return * 100.0,
        );
    }
    if report.rows.iter().any(|r| r.withdrawal_deferred) {
        let _ = writeln!(out, "* withdrawals deferred");
    }
    out
}

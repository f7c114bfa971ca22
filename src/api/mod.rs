use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{ModelConfig, Report, Simulator, default_parallelism, render_table};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "drawdown",
    about = "Monte Carlo retirement drawdown simulator (adaptive withdrawals, crashes, deferral)"
)]
pub struct Cli {
    #[arg(long, help = "Starting portfolio value")]
    portfolio: f64,
    #[arg(long, help = "Target annual income in today's money")]
    income: f64,
    #[arg(long, default_value_t = 0.0, help = "Income floor in today's money")]
    min_income: f64,
    #[arg(long, default_value_t = 2.5, help = "Annual inflation in percent")]
    inflation: f64,
    #[arg(
        long = "return",
        default_value_t = 7.0,
        help = "Expected annual return in percent"
    )]
    rtn: f64,
    #[arg(
        long,
        default_value_t = 12.0,
        help = "Standard deviation of the annual return in percent"
    )]
    return_range: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Real growth the withdrawal rule leaves in the portfolio, in percent"
    )]
    min_return: f64,
    #[arg(long, default_value_t = 0, help = "Years before withdrawals start")]
    defer: u32,
    #[arg(
        long,
        default_value_t = 0,
        help = "Mean years between crashes; 0 disables crashes"
    )]
    crash_interval: u32,
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Portfolio loss in a crash year in percent"
    )]
    crash_prop: f64,
    #[arg(long, default_value_t = 12, help = "Withdrawal periods per year")]
    periods: u32,
    #[arg(long, default_value_t = 30)]
    years: u32,
    #[arg(long, default_value_t = 10_000)]
    trials: u32,
    #[arg(
        long,
        default_value_t = 10,
        help = "Number of extreme samples averaged for the min/max columns"
    )]
    extreme_set_size: usize,
    #[arg(long, default_value_t = 1)]
    show_every_n_years: u32,
    #[arg(long, help = "Base seed for reproducible runs")]
    seed: Option<u64>,
    #[arg(long, help = "Worker threads; defaults to hardware threads minus one")]
    threads: Option<usize>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    portfolio: Option<f64>,
    income: Option<f64>,
    min_income: Option<f64>,
    inflation: Option<f64>,
    #[serde(rename = "return")]
    rtn: Option<f64>,
    return_range: Option<f64>,
    min_return: Option<f64>,
    defer: Option<u32>,
    crash_interval: Option<u32>,
    crash_prop: Option<f64>,
    periods: Option<u32>,
    years: Option<u32>,
    trials: Option<u32>,
    extreme_set_size: Option<usize>,
    show_every_n_years: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunOptions {
    show_every_n_years: u32,
    threads: usize,
}

#[derive(Debug)]
struct ApiRequest {
    config: ModelConfig,
    options: RunOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    seed: Option<u64>,
    workers: usize,
    show_every_n_years: u32,
    report: Report,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_request(cli: Cli) -> Result<ApiRequest, String> {
    if !(cli.portfolio.is_finite() && cli.portfolio > 0.0) {
        return Err("--portfolio must be > 0".to_string());
    }
    if !(cli.income.is_finite() && cli.income > 0.0) {
        return Err("--income must be > 0".to_string());
    }
    if !cli.min_income.is_finite() || cli.min_income < 0.0 {
        return Err("--min-income must be >= 0".to_string());
    }
    if cli.min_income > cli.income {
        return Err("--min-income must be <= --income".to_string());
    }
    if !cli.inflation.is_finite() || cli.inflation <= -100.0 {
        return Err("--inflation must be > -100".to_string());
    }
    if !cli.rtn.is_finite() {
        return Err("--return must be a number".to_string());
    }
    if !cli.return_range.is_finite() || cli.return_range < 0.0 {
        return Err("--return-range must be >= 0".to_string());
    }
    if !cli.min_return.is_finite() {
        return Err("--min-return must be a number".to_string());
    }
    if !(0.0..=100.0).contains(&cli.crash_prop) {
        return Err("--crash-prop must be between 0 and 100".to_string());
    }
    if cli.periods == 0 {
        return Err("--periods must be > 0".to_string());
    }
    if cli.years == 0 {
        return Err("--years must be > 0".to_string());
    }
    if cli.trials == 0 {
        return Err("--trials must be > 0".to_string());
    }
    if cli.extreme_set_size == 0 {
        return Err("--extreme-set-size must be > 0".to_string());
    }
    if cli.show_every_n_years == 0 {
        return Err("--show-every-n-years must be > 0".to_string());
    }
    if cli.threads == Some(0) {
        return Err("--threads must be > 0".to_string());
    }

    let config = ModelConfig {
        initial_portfolio: cli.portfolio,
        target_income: cli.income,
        min_income: cli.min_income,
        rtn_mean: cli.rtn / 100.0,
        rtn_sd: cli.return_range / 100.0,
        min_growth: cli.min_return / 100.0,
        inflation: cli.inflation / 100.0,
        crash_interval: cli.crash_interval,
        crash_loss: cli.crash_prop / 100.0,
        years_deferred: cli.defer,
        years: cli.years,
        trials: cli.trials,
        draws_per_year: cli.periods,
        tail_size: cli.extreme_set_size,
        seed: cli.seed,
    };
    config.validate().map_err(|e| e.to_string())?;

    Ok(ApiRequest {
        config,
        options: RunOptions {
            show_every_n_years: cli.show_every_n_years,
            threads: cli.threads.unwrap_or_else(default_parallelism),
        },
    })
}

fn run_request(request: &ApiRequest) -> Result<Report, String> {
    let simulator = Simulator::new(request.config.clone())
        .map_err(|e| e.to_string())?
        .with_parallelism(request.options.threads);
    let years = simulator.run().map_err(|e| e.to_string())?;
    Ok(Report::build(
        simulator.config(),
        &years,
        request.options.show_every_n_years,
    ))
}

/// Parses `args`, runs the simulation and returns the rendered report.
/// Argument errors and `--help` are handled by clap and exit the process.
pub fn run_cli<I, T>(args: I) -> Result<String, String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let json = cli.json;
    let request = build_request(cli)?;
    let report = run_request(&request)?;

    if json {
        serde_json::to_string_pretty(&report).map_err(|e| format!("Failed to encode report: {e}"))
    } else {
        Ok(render_table(&report))
    }
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = tokio::task::spawn_blocking(move || {
        let report = run_request(&request)?;
        Ok::<_, String>(build_simulate_response(&request, report))
    })
    .await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(msg)) => error_response(StatusCode::BAD_REQUEST, &msg),
        Err(e) => {
            warn!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.portfolio {
        cli.portfolio = v;
    }
    if let Some(v) = payload.income {
        cli.income = v;
    }
    if let Some(v) = payload.min_income {
        cli.min_income = v;
    }
    if let Some(v) = payload.inflation {
        cli.inflation = v;
    }
    if let Some(v) = payload.rtn {
        cli.rtn = v;
    }
    if let Some(v) = payload.return_range {
        cli.return_range = v;
    }
    if let Some(v) = payload.min_return {
        cli.min_return = v;
    }
    if let Some(v) = payload.defer {
        cli.defer = v;
    }
    if let Some(v) = payload.crash_interval {
        cli.crash_interval = v;
    }
    if let Some(v) = payload.crash_prop {
        cli.crash_prop = v;
    }
    if let Some(v) = payload.periods {
        cli.periods = v;
    }
    if let Some(v) = payload.years {
        cli.years = v;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if let Some(v) = payload.extreme_set_size {
        cli.extreme_set_size = v;
    }
    if let Some(v) = payload.show_every_n_years {
        cli.show_every_n_years = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = Some(v);
    }

    build_request(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        portfolio: 1_000_000.0,
        income: 40_000.0,
        min_income: 25_000.0,
        inflation: 2.5,
        rtn: 7.0,
        return_range: 12.0,
        min_return: 0.0,
        defer: 0,
        crash_interval: 0,
        crash_prop: 30.0,
        periods: 12,
        years: 30,
        trials: 10_000,
        extreme_set_size: 10,
        show_every_n_years: 1,
        seed: None,
        threads: None,
        json: true,
    }
}

fn build_simulate_response(request: &ApiRequest, report: Report) -> SimulateResponse {
    SimulateResponse {
        seed: request.config.seed,
        workers: request
            .options
            .threads
            .min(request.config.trials as usize)
            .max(1),
        show_every_n_years: request.options.show_every_n_years,
        report,
    }
}

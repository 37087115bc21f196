use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    BaselineReport, CyclePolicy, MonteCarloConfig, MonteCarloReport, MonteCarloRunner,
    Orchestrator, PlanInputs, ProjectionConfig, SolveReport, SolverConfig,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCyclePolicy {
    Fallback,
    Reject,
}

impl From<CliCyclePolicy> for CyclePolicy {
    fn from(value: CliCyclePolicy) -> Self {
        match value {
            CliCyclePolicy::Fallback => CyclePolicy::Fallback,
            CliCyclePolicy::Reject => CyclePolicy::Reject,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "lifeplan",
    about = "Milestone-driven household balance sheet projections, goal solving and Monte Carlo sampling"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Project the baseline of every scenario/sub-scenario combination.
    Project(PlanArgs),
    /// Solve every goal against its anchor balance.
    Solve {
        #[command(flatten)]
        plan: PlanArgs,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Sample every numeric scenario override.
    MonteCarlo {
        #[command(flatten)]
        plan: PlanArgs,
        #[arg(long)]
        iterations: Option<u32>,
        #[arg(long, help = "Standard deviation of the draws; defaults to 10% of the value")]
        sigma: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    #[arg(long, help = "Plan JSON: milestones, scenario values, goals and targets")]
    input: PathBuf,
    #[arg(long, help = "Growth for income/expense streams without their own rate")]
    inflation: Option<f64>,
    #[arg(long, value_enum)]
    cycles: Option<CliCyclePolicy>,
}

impl PlanArgs {
    fn load(&self) -> Result<PlanPayload, String> {
        let json = fs::read_to_string(&self.input)
            .map_err(|e| format!("Cannot read {}: {e}", self.input.display()))?;
        let mut payload = plan_from_json(&json)?;
        let mut projection = payload.projection.unwrap_or_default();
        if let Some(v) = self.inflation {
            projection.inflation_default = v;
        }
        if let Some(v) = self.cycles {
            projection.cycle_policy = v.into();
        }
        payload.projection = Some(projection);
        Ok(payload)
    }
}

/// Request body shared by every endpoint and by `--input` files.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    #[serde(flatten)]
    inputs: PlanInputs,
    projection: Option<ProjectionConfig>,
    solver: Option<SolverConfig>,
    monte_carlo: Option<MonteCarloConfig>,
}

impl PlanPayload {
    fn validate(&self) -> Result<(), String> {
        if self.inputs.milestones.is_empty() {
            return Err("milestones must not be empty".to_string());
        }
        if let Some(projection) = &self.projection {
            if !projection.inflation_default.is_finite() || projection.inflation_default <= -1.0 {
                return Err("projection.inflationDefault must be finite and > -1".to_string());
            }
        }
        Ok(())
    }

    fn orchestrator(self) -> Orchestrator {
        Orchestrator::new(
            self.inputs,
            self.projection.unwrap_or_default(),
            self.solver.unwrap_or_default(),
        )
    }
}

fn plan_from_json(json: &str) -> Result<PlanPayload, String> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| format!("Invalid plan JSON payload: {e}"))?;
    payload.validate()?;
    Ok(payload)
}

fn project_plan(payload: PlanPayload) -> Result<BaselineReport, String> {
    Ok(payload.orchestrator().project_baselines())
}

fn solve_plan(payload: PlanPayload) -> Result<SolveReport, String> {
    if payload.inputs.goals.is_empty() {
        return Err("goals must not be empty".to_string());
    }
    Ok(payload.orchestrator().solve_all())
}

fn sample_plan(payload: PlanPayload) -> Result<MonteCarloReport, String> {
    if payload.inputs.scenario_parameter_values.is_empty() {
        return Err("scenarioParameterValues must not be empty".to_string());
    }
    MonteCarloRunner::new(
        payload.monte_carlo.unwrap_or_default(),
        payload.projection.unwrap_or_default(),
    )
    .run(&payload.inputs)
    .map_err(|e| e.to_string())
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Project(plan) => print_json(&project_plan(plan.load()?)?),
        Command::Solve {
            plan,
            max_iterations,
            tolerance,
        } => {
            let mut payload = plan.load()?;
            let mut solver = payload.solver.unwrap_or_default();
            if let Some(v) = max_iterations {
                solver.max_iterations = v;
            }
            if let Some(v) = tolerance {
                solver.tolerance = v;
            }
            payload.solver = Some(solver);
            print_json(&solve_plan(payload)?)
        }
        Command::MonteCarlo {
            plan,
            iterations,
            sigma,
            seed,
        } => {
            let mut payload = plan.load()?;
            let mut config = payload.monte_carlo.unwrap_or_default();
            if let Some(v) = iterations {
                config.iterations = v;
            }
            if sigma.is_some() {
                config.sigma = sigma;
            }
            if let Some(v) = seed {
                config.seed = v;
            }
            payload.monte_carlo = Some(config);
            print_json(&sample_plan(payload)?)
        }
        Command::Serve { port } => run_http_server(port)
            .await
            .map_err(|e| format!("Server error: {e}")),
    }
}

fn print_json<T: Serialize>(body: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(body)
        .map_err(|e| format!("Cannot serialize result: {e}"))?;
    println!("{json}");
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/api/project", post(project_handler))
        .route("/api/solve", post(solve_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "lifeplan HTTP API listening");

    axum::serve(listener, router()).await
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(payload: Result<Json<PlanPayload>, JsonRejection>) -> Response {
    handle(payload, project_plan).await
}

async fn solve_handler(payload: Result<Json<PlanPayload>, JsonRejection>) -> Response {
    handle(payload, solve_plan).await
}

async fn monte_carlo_handler(payload: Result<Json<PlanPayload>, JsonRejection>) -> Response {
    handle(payload, sample_plan).await
}

async fn handle<T, F>(payload: Result<Json<PlanPayload>, JsonRejection>, work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(PlanPayload) -> Result<T, String> + Send + 'static,
{
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid plan JSON payload: {}", rejection.body_text()),
            );
        }
    };
    if let Err(msg) = payload.validate() {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }

    match tokio::task::spawn_blocking(move || work(payload)).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(msg)) => error_response(StatusCode::BAD_REQUEST, &msg),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Computation failed: {e}"),
        ),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
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

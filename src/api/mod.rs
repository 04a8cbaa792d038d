use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    BenefitParams, DEFAULT_ITERATIONS, EngineError, HouseholdParams, SimulationParams,
    SimulationResult, XorShiftSource, run_simulation,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulateRequest {
    pub params: SimulationParams,
    pub iterations: Option<u32>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SuccessBody {
    success: bool,
    result: SimulationResult,
}

#[derive(Debug, Serialize)]
struct FailureBody {
    success: bool,
    error: String,
}

fn success_body(result: SimulationResult) -> SuccessBody {
    SuccessBody {
        success: true,
        result,
    }
}

fn failure_body(error: &EngineError) -> FailureBody {
    FailureBody {
        success: false,
        error: error.to_string(),
    }
}

/// Synchronous engine invocation shared by the HTTP handler (via a blocking
/// task) and the CLI. Seeded requests are reproducible; unseeded ones draw
/// from platform entropy.
fn simulate_blocking(request: SimulateRequest) -> Result<SimulationResult, EngineError> {
    let iterations = request.iterations.unwrap_or(DEFAULT_ITERATIONS);
    let mut source = match request.seed {
        Some(seed) => XorShiftSource::seeded(seed),
        None => XorShiftSource::from_entropy(),
    };
    run_simulation(&request.params, iterations, &mut source)
}

async fn execute(request: SimulateRequest) -> Result<SimulationResult, EngineError> {
    // The run is CPU-bound and must stay off the interactive runtime threads.
    // A panic inside the blocking task surfaces as a join error here and is
    // reported through the normal failure shape instead of crashing the host.
    tokio::task::spawn_blocking(move || simulate_blocking(request))
        .await
        .unwrap_or_else(|join_error| {
            Err(EngineError::Internal(format!(
                "simulation task aborted: {join_error}"
            )))
        })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_usage_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("glidepath HTTP API listening on http://{addr}");
    println!("POST /api/simulate with {{\"params\": ..., \"iterations\": ...}}");

    axum::serve(listener, app).await
}

async fn simulate_post_handler(Json(request): Json<SimulateRequest>) -> Response {
    match execute(request).await {
        Ok(result) => json_response(StatusCode::OK, success_body(result)),
        Err(error) => {
            let status = match error {
                EngineError::InvalidParams(_) => StatusCode::BAD_REQUEST,
                EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            log::warn!("simulation request rejected: {error}");
            json_response(status, failure_body(&error))
        }
    }
}

async fn simulate_usage_handler() -> Response {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        FailureBody {
            success: false,
            error: "POST a JSON body of the form {\"params\": {...}, \"iterations\": 5000}"
                .to_string(),
        },
    )
}

async fn not_found_handler() -> Response {
    json_response(
        StatusCode::NOT_FOUND,
        FailureBody {
            success: false,
            error: "Not found".to_string(),
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

#[derive(Parser, Debug)]
#[command(
    name = "glidepath",
    about = "Monte Carlo retirement projection engine (stratified sampling + correlated market factors)"
)]
struct Cli {
    #[arg(long, default_value_t = 45)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(long, default_value_t = 300_000.0)]
    starting_savings: f64,
    #[arg(long, default_value_t = 20_000.0)]
    annual_contribution: f64,
    #[arg(long, default_value_t = 5_000.0, help = "Planned retirement spending per month")]
    monthly_spending: f64,
    #[arg(long, default_value_t = 0.6, help = "Equity allocation weight")]
    stocks: f64,
    #[arg(long, default_value_t = 0.4, help = "Bond allocation weight")]
    bonds: f64,
    #[arg(long, default_value_t = 0.0, help = "Cash allocation weight")]
    cash: f64,
    #[arg(long, help = "Monthly insurance benefit at full retirement age")]
    monthly_benefit: Option<f64>,
    #[arg(long, default_value_t = 67, help = "Age the benefit is claimed")]
    claiming_age: u32,
    #[arg(long, default_value_t = 67)]
    full_retirement_age: u32,
    #[arg(long, help = "Minimum acceptable ending balance")]
    legacy_goal: Option<f64>,
    #[arg(long, help = "Planning horizon as a life expectancy age")]
    life_expectancy: Option<u32>,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,
    #[arg(long, help = "Fixed seed for reproducible runs")]
    seed: Option<u64>,
}

fn params_from_cli(cli: &Cli) -> SimulationParams {
    let mut params = SimulationParams {
        current_age: cli.current_age,
        retirement_age: cli.retirement_age,
        starting_savings: cli.starting_savings,
        annual_contribution: cli.annual_contribution,
        monthly_spending: cli.monthly_spending,
        ..SimulationParams::default()
    };
    params.allocation.stocks = cli.stocks;
    params.allocation.bonds = cli.bonds;
    params.allocation.cash = cli.cash;

    if let Some(monthly_benefit) = cli.monthly_benefit {
        params.benefits = Some(BenefitParams {
            monthly_benefit,
            claiming_age: cli.claiming_age,
            full_retirement_age: cli.full_retirement_age,
            ..BenefitParams::default()
        });
    }

    if cli.legacy_goal.is_some() || cli.life_expectancy.is_some() {
        let mut household = HouseholdParams::default();
        if let Some(goal) = cli.legacy_goal {
            household.legacy_goal = goal;
        }
        if let Some(life_expectancy) = cli.life_expectancy {
            household.life_expectancy = life_expectancy;
        }
        params.household = Some(household);
    }

    params
}

pub fn run_cli() -> Result<(), String> {
    let cli = Cli::parse();
    let request = SimulateRequest {
        params: params_from_cli(&cli),
        iterations: Some(cli.iterations),
        seed: cli.seed,
    };

    match simulate_blocking(request) {
        Ok(result) => {
            let body = serde_json::to_string_pretty(&success_body(result))
                .map_err(|e| format!("failed to serialize result: {e}"))?;
            println!("{body}");
            Ok(())
        }
        Err(error) => {
            let body = serde_json::to_string(&failure_body(&error))
                .map_err(|e| format!("failed to serialize error: {e}"))?;
            println!("{body}");
            Err(error.to_string())
        }
    }
}

use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    Assumptions, BaselineCash, ContributionOption, EngineConfig, Evaluation, GoalSolveConfig,
    GoalSolveIteration, GoalSolveResult, GoalType, IncomeAggregationMode, LevySchedule,
    OneOffTaxBasis, SavingsPolicy, ScenarioResult, ScoringWeights, TaperRule, TaxSchedule,
    WithdrawalAssumptions, evaluate, solve_goal,
};

const TAPER_REDUCTION_RATIO: f64 = 0.5;
const MAX_YEARS_TO_HORIZON: u32 = 100;

const USAGE: &str = "Usage: pension-planner <serve [port] | evaluate [flags] | solve [flags]>";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliAggregationMode {
    Total,
    OneOffOnly,
}

impl From<CliAggregationMode> for IncomeAggregationMode {
    fn from(value: CliAggregationMode) -> Self {
        match value {
            CliAggregationMode::Total => IncomeAggregationMode::Total,
            CliAggregationMode::OneOffOnly => IncomeAggregationMode::OneOffOnly,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliSavingsPolicy {
    Capped,
    Uncapped,
}

impl From<CliSavingsPolicy> for SavingsPolicy {
    fn from(value: CliSavingsPolicy) -> Self {
        match value {
            CliSavingsPolicy::Capped => SavingsPolicy::Capped,
            CliSavingsPolicy::Uncapped => SavingsPolicy::Uncapped,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliOneOffTaxBasis {
    Standalone,
    MarginalOverSalary,
}

impl From<CliOneOffTaxBasis> for OneOffTaxBasis {
    fn from(value: CliOneOffTaxBasis) -> Self {
        match value {
            CliOneOffTaxBasis::Standalone => OneOffTaxBasis::Standalone,
            CliOneOffTaxBasis::MarginalOverSalary => OneOffTaxBasis::MarginalOverSalary,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliGoalType {
    RequiredContribution,
    MaxContribution,
}

impl From<CliGoalType> for GoalType {
    fn from(value: CliGoalType) -> Self {
        match value {
            CliGoalType::RequiredContribution => GoalType::RequiredContribution,
            CliGoalType::MaxContribution => GoalType::MaxContribution,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiAggregationMode {
    #[serde(alias = "TOTAL")]
    Total,
    #[serde(alias = "oneOffOnly", alias = "one_off_only", alias = "ONE_OFF_ONLY")]
    OneOffOnly,
}

impl From<ApiAggregationMode> for CliAggregationMode {
    fn from(value: ApiAggregationMode) -> Self {
        match value {
            ApiAggregationMode::Total => CliAggregationMode::Total,
            ApiAggregationMode::OneOffOnly => CliAggregationMode::OneOffOnly,
        }
    }
}

impl From<IncomeAggregationMode> for ApiAggregationMode {
    fn from(value: IncomeAggregationMode) -> Self {
        match value {
            IncomeAggregationMode::Total => ApiAggregationMode::Total,
            IncomeAggregationMode::OneOffOnly => ApiAggregationMode::OneOffOnly,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiSavingsPolicy {
    Capped,
    Uncapped,
}

impl From<ApiSavingsPolicy> for CliSavingsPolicy {
    fn from(value: ApiSavingsPolicy) -> Self {
        match value {
            ApiSavingsPolicy::Capped => CliSavingsPolicy::Capped,
            ApiSavingsPolicy::Uncapped => CliSavingsPolicy::Uncapped,
        }
    }
}

impl From<SavingsPolicy> for ApiSavingsPolicy {
    fn from(value: SavingsPolicy) -> Self {
        match value {
            SavingsPolicy::Capped => ApiSavingsPolicy::Capped,
            SavingsPolicy::Uncapped => ApiSavingsPolicy::Uncapped,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiOneOffTaxBasis {
    Standalone,
    #[serde(alias = "marginalOverSalary", alias = "marginal_over_salary", alias = "marginal")]
    MarginalOverSalary,
}

impl From<ApiOneOffTaxBasis> for CliOneOffTaxBasis {
    fn from(value: ApiOneOffTaxBasis) -> Self {
        match value {
            ApiOneOffTaxBasis::Standalone => CliOneOffTaxBasis::Standalone,
            ApiOneOffTaxBasis::MarginalOverSalary => CliOneOffTaxBasis::MarginalOverSalary,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiGoalType {
    #[serde(alias = "requiredContribution", alias = "required_contribution")]
    RequiredContribution,
    #[serde(alias = "maxContribution", alias = "max_contribution")]
    MaxContribution,
}

impl From<ApiGoalType> for CliGoalType {
    fn from(value: ApiGoalType) -> Self {
        match value {
            ApiGoalType::RequiredContribution => CliGoalType::RequiredContribution,
            ApiGoalType::MaxContribution => CliGoalType::MaxContribution,
        }
    }
}

impl From<GoalType> for ApiGoalType {
    fn from(value: GoalType) -> Self {
        match value {
            GoalType::RequiredContribution => ApiGoalType::RequiredContribution,
            GoalType::MaxContribution => ApiGoalType::MaxContribution,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionPayload {
    label: Option<String>,
    #[serde(default)]
    extra_pension_contribution: f64,
    #[serde(default)]
    savings_contribution: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EvaluatePayload {
    gross_annual_income: Option<f64>,
    one_off_income: Option<f64>,
    current_pension_balance: Option<f64>,
    recurring_pension_contribution: Option<f64>,
    years_to_horizon: Option<u32>,
    pension_growth_rate: Option<f64>,
    savings_growth_rate: Option<f64>,
    income_aggregation: Option<ApiAggregationMode>,

    options: Option<Vec<OptionPayload>>,
    option_labels: Option<String>,
    option_extra_pension: Option<String>,
    option_savings: Option<String>,

    personal_allowance: Option<f64>,
    basic_rate_limit: Option<f64>,
    higher_rate_limit: Option<f64>,
    basic_rate: Option<f64>,
    higher_rate: Option<f64>,
    additional_rate: Option<f64>,
    allowance_taper: Option<bool>,
    taper_start: Option<f64>,

    levy_primary_threshold: Option<f64>,
    levy_upper_threshold: Option<f64>,
    levy_main_rate: Option<f64>,
    levy_upper_rate: Option<f64>,

    pension_withdrawal_rate: Option<f64>,
    savings_withdrawal_rate: Option<f64>,
    tax_free_fraction: Option<f64>,
    retirement_tax_rate: Option<f64>,
    cash_weight: Option<f64>,
    income_weight: Option<f64>,
    savings_policy: Option<ApiSavingsPolicy>,
    one_off_tax_basis: Option<ApiOneOffTaxBasis>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolvePayload {
    #[serde(flatten)]
    plan: EvaluatePayload,
    goal_type: Option<ApiGoalType>,
    target: Option<f64>,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
    option_index: Option<usize>,
}

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "evaluate",
    about = "Compare pension and ISA contribution options against shared salary and growth assumptions"
)]
struct Cli {
    #[arg(long, default_value_t = 50000.0, help = "Annual salary")]
    gross_annual_income: f64,
    #[arg(long, default_value_t = 0.0, help = "One-off income such as a bonus")]
    one_off_income: f64,
    #[arg(long, default_value_t = 20000.0)]
    current_pension_balance: f64,
    #[arg(long, default_value_t = 5000.0)]
    recurring_pension_contribution: f64,
    #[arg(long, default_value_t = 30)]
    years_to_horizon: u32,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Expected annual pension growth in percent"
    )]
    pension_growth_rate: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Expected annual ISA growth in percent"
    )]
    savings_growth_rate: f64,
    #[arg(
        long,
        value_enum,
        default_value_t = CliAggregationMode::Total,
        help = "Taxable base: salary plus one-off income, or the one-off income alone"
    )]
    income_aggregation: CliAggregationMode,
    #[arg(
        long,
        value_delimiter = ',',
        default_values = ["Option 1", "Option 2", "Option 3"],
        help = "Comma separated option labels; missing labels become \"Option N\""
    )]
    option_labels: Vec<String>,
    #[arg(
        long,
        value_delimiter = ',',
        default_values = ["10000", "15000", "20000"],
        help = "Comma separated extra pension contribution per option"
    )]
    option_extra_pension: Vec<f64>,
    #[arg(
        long,
        value_delimiter = ',',
        default_values = ["5000", "10000", "15000"],
        help = "Comma separated ISA contribution per option"
    )]
    option_savings: Vec<f64>,
    #[arg(long, default_value_t = 12570.0, help = "Zero-rate personal allowance")]
    uk_personal_allowance: f64,
    #[arg(
        long,
        default_value_t = 50270.0,
        help = "Upper income bound for the basic rate band"
    )]
    uk_basic_rate_limit: f64,
    #[arg(
        long,
        default_value_t = 125140.0,
        help = "Upper income bound for the higher rate band"
    )]
    uk_higher_rate_limit: f64,
    #[arg(long, default_value_t = 20.0, help = "Basic tax rate in percent")]
    uk_basic_rate: f64,
    #[arg(long, default_value_t = 40.0, help = "Higher tax rate in percent")]
    uk_higher_rate: f64,
    #[arg(long, default_value_t = 45.0, help = "Additional tax rate in percent")]
    uk_additional_rate: f64,
    #[arg(long, help = "Keep the full personal allowance at every income")]
    no_allowance_taper: bool,
    #[arg(
        long,
        default_value_t = 100000.0,
        help = "Income where the personal allowance taper starts"
    )]
    uk_allowance_taper_start: f64,
    #[arg(long, default_value_t = 12570.0)]
    levy_primary_threshold: f64,
    #[arg(long, default_value_t = 50270.0)]
    levy_upper_threshold: f64,
    #[arg(
        long,
        default_value_t = 8.0,
        help = "National Insurance style rate between the thresholds, in percent"
    )]
    levy_main_rate: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Rate above the upper threshold, in percent"
    )]
    levy_upper_rate: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Share of the pension pot drawn each year in retirement, in percent"
    )]
    pension_withdrawal_rate: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Share of the ISA pot drawn each year in retirement, in percent"
    )]
    savings_withdrawal_rate: f64,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Tax-free share of pension withdrawals in percent"
    )]
    tax_free_fraction: f64,
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Effective tax rate on the taxable share of pension withdrawals in percent"
    )]
    retirement_tax_rate: f64,
    #[arg(long, default_value_t = 0.5, help = "Scoring weight for cash available")]
    cash_weight: f64,
    #[arg(
        long,
        default_value_t = 0.5,
        help = "Scoring weight for projected monthly income"
    )]
    income_weight: f64,
    #[arg(long, value_enum, default_value_t = CliSavingsPolicy::Capped)]
    savings_policy: CliSavingsPolicy,
    #[arg(
        long,
        value_enum,
        default_value_t = CliOneOffTaxBasis::Standalone,
        help = "How one-off income is taxed in one-off-only mode"
    )]
    one_off_tax_basis: CliOneOffTaxBasis,
}

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "solve",
    about = "Find the extra pension contribution that meets an income target or a cash floor"
)]
struct SolveCli {
    #[command(flatten)]
    plan: Cli,
    #[arg(long, value_enum, default_value_t = CliGoalType::RequiredContribution)]
    goal: CliGoalType,
    #[arg(
        long,
        help = "Monthly income target (required-contribution) or annual cash floor (max-contribution)"
    )]
    target: f64,
    #[arg(long, default_value_t = 0.0)]
    search_min: f64,
    #[arg(long, default_value_t = 100000.0)]
    search_max: f64,
    #[arg(long, default_value_t = 1.0)]
    tolerance: f64,
    #[arg(long, default_value_t = 60)]
    max_iterations: u32,
    #[arg(
        long,
        default_value_t = 0,
        help = "Option whose label and ISA contribution the solver keeps fixed"
    )]
    option_index: usize,
}

#[derive(Debug)]
struct EvaluateRequest {
    assumptions: Assumptions,
    options: Vec<ContributionOption>,
    config: EngineConfig,
}

#[derive(Debug)]
struct SolveRequest {
    plan: EvaluateRequest,
    option: ContributionOption,
    goal: GoalSolveConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartBreakdown {
    labels: Vec<String>,
    pension: Vec<f64>,
    tax: Vec<f64>,
    levy: Vec<f64>,
    savings: Vec<f64>,
    cash: Vec<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    income_aggregation: ApiAggregationMode,
    savings_policy: ApiSavingsPolicy,
    years_to_horizon: u32,
    recommended: Option<String>,
    recommended_index: Option<usize>,
    baseline: BaselineCash,
    results: Vec<ScenarioResult>,
    breakdown: ChartBreakdown,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveResponse {
    goal_type: ApiGoalType,
    target: f64,
    search_min: f64,
    search_max: f64,
    tolerance: f64,
    max_iterations: u32,
    solved_value: Option<f64>,
    solved_result: Option<ScenarioResult>,
    iterations: Vec<GoalSolveIteration>,
    converged: bool,
    feasible: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_options(cli: &Cli) -> Result<Vec<ContributionOption>, String> {
    if cli.option_extra_pension.len() != cli.option_savings.len() {
        return Err(
            "--option-extra-pension and --option-savings must list the same number of options"
                .to_string(),
        );
    }

    let mut options = Vec::with_capacity(cli.option_extra_pension.len());
    for (idx, (&extra, &savings)) in cli
        .option_extra_pension
        .iter()
        .zip(&cli.option_savings)
        .enumerate()
    {
        if !extra.is_finite() || extra < 0.0 {
            return Err("--option-extra-pension values must be >= 0".to_string());
        }
        if !savings.is_finite() || savings < 0.0 {
            return Err("--option-savings values must be >= 0".to_string());
        }
        let label = cli
            .option_labels
            .get(idx)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| format!("Option {}", idx + 1));
        options.push(ContributionOption::new(label, extra, savings));
    }
    Ok(options)
}

fn build_request(cli: Cli) -> Result<EvaluateRequest, String> {
    for (name, value) in [
        ("--gross-annual-income", cli.gross_annual_income),
        ("--one-off-income", cli.one_off_income),
        ("--current-pension-balance", cli.current_pension_balance),
        (
            "--recurring-pension-contribution",
            cli.recurring_pension_contribution,
        ),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    for (name, rate) in [
        ("--pension-growth-rate", cli.pension_growth_rate),
        ("--savings-growth-rate", cli.savings_growth_rate),
    ] {
        if !rate.is_finite() || rate < -100.0 {
            return Err(format!("{name} must be >= -100"));
        }
    }

    if cli.years_to_horizon > MAX_YEARS_TO_HORIZON {
        return Err(format!("--years-to-horizon must be <= {MAX_YEARS_TO_HORIZON}"));
    }

    for (name, rate) in [
        ("--uk-basic-rate", cli.uk_basic_rate),
        ("--uk-higher-rate", cli.uk_higher_rate),
        ("--uk-additional-rate", cli.uk_additional_rate),
        ("--levy-main-rate", cli.levy_main_rate),
        ("--levy-upper-rate", cli.levy_upper_rate),
        ("--pension-withdrawal-rate", cli.pension_withdrawal_rate),
        ("--savings-withdrawal-rate", cli.savings_withdrawal_rate),
        ("--tax-free-fraction", cli.tax_free_fraction),
        ("--retirement-tax-rate", cli.retirement_tax_rate),
    ] {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    if cli.uk_personal_allowance <= 0.0 || cli.levy_primary_threshold <= 0.0 {
        return Err("--uk-personal-allowance and --levy-primary-threshold must be > 0".to_string());
    }

    if cli.uk_basic_rate_limit <= cli.uk_personal_allowance {
        return Err("--uk-basic-rate-limit must be > --uk-personal-allowance".to_string());
    }

    if cli.uk_higher_rate_limit <= cli.uk_basic_rate_limit {
        return Err("--uk-higher-rate-limit must be > --uk-basic-rate-limit".to_string());
    }

    if !cli.no_allowance_taper
        && (!cli.uk_allowance_taper_start.is_finite() || cli.uk_allowance_taper_start < 0.0)
    {
        return Err("--uk-allowance-taper-start must be >= 0".to_string());
    }

    if cli.levy_upper_threshold <= cli.levy_primary_threshold {
        return Err("--levy-upper-threshold must be > --levy-primary-threshold".to_string());
    }

    let options = build_options(&cli)?;

    let taper = if cli.no_allowance_taper {
        None
    } else {
        Some(
            TaperRule::new(
                cli.uk_allowance_taper_start,
                cli.uk_allowance_taper_start + cli.uk_personal_allowance / TAPER_REDUCTION_RATIO,
                TAPER_REDUCTION_RATIO,
            )
            .map_err(|e| e.to_string())?,
        )
    };
    let tax = TaxSchedule::uk_bands(
        cli.uk_personal_allowance,
        cli.uk_basic_rate_limit,
        cli.uk_higher_rate_limit,
        [
            cli.uk_basic_rate / 100.0,
            cli.uk_higher_rate / 100.0,
            cli.uk_additional_rate / 100.0,
        ],
        taper,
    )
    .map_err(|e| e.to_string())?;
    let levy = LevySchedule::thresholds(
        cli.levy_primary_threshold,
        cli.levy_upper_threshold,
        cli.levy_main_rate / 100.0,
        cli.levy_upper_rate / 100.0,
    )
    .map_err(|e| e.to_string())?;
    let withdrawal = WithdrawalAssumptions::new(
        cli.pension_withdrawal_rate / 100.0,
        cli.savings_withdrawal_rate / 100.0,
        cli.tax_free_fraction / 100.0,
        cli.retirement_tax_rate / 100.0,
        12.0,
    )
    .map_err(|e| e.to_string())?;
    let scoring = ScoringWeights::new(cli.cash_weight, cli.income_weight).map_err(|_| {
        "--cash-weight and --income-weight must be >= 0 and not both zero".to_string()
    })?;

    let config = EngineConfig::new(tax, levy, withdrawal, scoring)
        .with_savings_policy(cli.savings_policy.into())
        .with_one_off_tax_basis(cli.one_off_tax_basis.into());

    Ok(EvaluateRequest {
        assumptions: Assumptions {
            gross_annual_income: cli.gross_annual_income,
            one_off_income: cli.one_off_income,
            current_pension_balance: cli.current_pension_balance,
            recurring_pension_contribution: cli.recurring_pension_contribution,
            years_to_horizon: cli.years_to_horizon,
            pension_growth_rate: cli.pension_growth_rate / 100.0,
            savings_growth_rate: cli.savings_growth_rate / 100.0,
            income_aggregation: cli.income_aggregation.into(),
        },
        options,
        config,
    })
}

fn build_solve_request(cli: SolveCli) -> Result<SolveRequest, String> {
    let plan = build_request(cli.plan)?;
    let Some(option) = plan.options.get(cli.option_index).cloned() else {
        return Err(format!(
            "--option-index must be < {} (number of options)",
            plan.options.len()
        ));
    };

    if !cli.target.is_finite() {
        return Err("--target must be a finite number".to_string());
    }
    if cli.search_min < 0.0 || cli.search_max <= cli.search_min {
        return Err("--search-max must be > --search-min >= 0".to_string());
    }
    if !cli.tolerance.is_finite() || cli.tolerance <= 0.0 {
        return Err("--tolerance must be > 0".to_string());
    }
    if cli.max_iterations == 0 {
        return Err("--max-iterations must be > 0".to_string());
    }

    Ok(SolveRequest {
        plan,
        option,
        goal: GoalSolveConfig {
            goal_type: cli.goal.into(),
            target: cli.target,
            search_min: cli.search_min,
            search_max: cli.search_max,
            tolerance: cli.tolerance,
            max_iterations: cli.max_iterations,
        },
    })
}

/// Runs the `evaluate` or `solve` subcommand and returns the response as pretty JSON.
pub fn run_cli(args: &[String]) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("evaluate") => {
            let cli = Cli::try_parse_from(args).map_err(|e| e.to_string())?;
            let request = build_request(cli)?;
            let evaluation = evaluate(&request.assumptions, &request.options, &request.config);
            to_pretty_json(&build_evaluate_response(&request, &evaluation))
        }
        Some("solve") => {
            let cli = SolveCli::try_parse_from(args).map_err(|e| e.to_string())?;
            let request = build_solve_request(cli)?;
            let result = run_solve(&request)?;
            to_pretty_json(&build_solve_response(&result))
        }
        _ => Err(USAGE.to_string()),
    }
}

fn to_pretty_json<T: Serialize>(body: &T) -> Result<String, String> {
    serde_json::to_string_pretty(body).map_err(|e| format!("Failed to serialize response: {e}"))
}

fn run_solve(request: &SolveRequest) -> Result<GoalSolveResult, String> {
    solve_goal(
        &request.plan.assumptions,
        &request.option,
        &request.plan.config,
        request.goal,
    )
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route(
            "/api/evaluate",
            get(evaluate_get_handler).post(evaluate_post_handler),
        )
        .route("/api/solve", post(solve_post_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(target: "planner.api", %addr, "Pension planner HTTP API listening");
    info!(target: "planner.api", "Local access: http://127.0.0.1:{port}/api/evaluate");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn evaluate_get_handler(Query(payload): Query<EvaluatePayload>) -> Response {
    evaluate_handler_impl(payload).await
}

async fn evaluate_post_handler(Json(payload): Json<EvaluatePayload>) -> Response {
    evaluate_handler_impl(payload).await
}

async fn evaluate_handler_impl(payload: EvaluatePayload) -> Response {
    let request = match evaluate_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            warn!(target: "planner.api", error = %msg, "Rejected evaluate request");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    let evaluation = evaluate(&request.assumptions, &request.options, &request.config);
    info!(
        target: "planner.api",
        options = request.options.len(),
        recommended = evaluation.recommended().unwrap_or("-"),
        "Evaluation served"
    );
    json_response(
        StatusCode::OK,
        build_evaluate_response(&request, &evaluation),
    )
}

async fn solve_post_handler(Json(payload): Json<SolvePayload>) -> Response {
    let result = solve_request_from_payload(payload).and_then(|request| run_solve(&request));
    match result {
        Ok(result) => {
            info!(
                target: "planner.api",
                feasible = result.feasible,
                converged = result.converged,
                iterations = result.iterations.len(),
                "Goal solve served"
            );
            json_response(StatusCode::OK, build_solve_response(&result))
        }
        Err(msg) => {
            warn!(target: "planner.api", error = %msg, "Rejected solve request");
            error_response(StatusCode::BAD_REQUEST, &msg)
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
fn evaluate_request_from_json(json: &str) -> Result<EvaluateRequest, String> {
    let payload = serde_json::from_str::<EvaluatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    evaluate_request_from_payload(payload)
}

fn parse_list<T: std::str::FromStr>(name: &str, raw: &str) -> Result<Vec<T>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|_| format!("{name} contains an invalid value: {s}"))
        })
        .collect()
}

fn apply_payload(cli: &mut Cli, payload: EvaluatePayload) -> Result<(), String> {
    if let Some(v) = payload.gross_annual_income {
        cli.gross_annual_income = v;
    }
    if let Some(v) = payload.one_off_income {
        cli.one_off_income = v;
    }
    if let Some(v) = payload.current_pension_balance {
        cli.current_pension_balance = v;
    }
    if let Some(v) = payload.recurring_pension_contribution {
        cli.recurring_pension_contribution = v;
    }
    if let Some(v) = payload.years_to_horizon {
        cli.years_to_horizon = v;
    }
    if let Some(v) = payload.pension_growth_rate {
        cli.pension_growth_rate = v;
    }
    if let Some(v) = payload.savings_growth_rate {
        cli.savings_growth_rate = v;
    }
    if let Some(v) = payload.income_aggregation {
        cli.income_aggregation = v.into();
    }

    if let Some(options) = payload.options {
        cli.option_labels = options
            .iter()
            .enumerate()
            .map(|(idx, o)| {
                o.label
                    .clone()
                    .unwrap_or_else(|| format!("Option {}", idx + 1))
            })
            .collect();
        cli.option_extra_pension = options.iter().map(|o| o.extra_pension_contribution).collect();
        cli.option_savings = options.iter().map(|o| o.savings_contribution).collect();
    } else {
        if let Some(raw) = payload.option_labels {
            cli.option_labels = parse_list("optionLabels", &raw)?;
        }
        if let Some(raw) = payload.option_extra_pension {
            cli.option_extra_pension = parse_list("optionExtraPension", &raw)?;
        }
        if let Some(raw) = payload.option_savings {
            cli.option_savings = parse_list("optionSavings", &raw)?;
        }
    }

    if let Some(v) = payload.personal_allowance {
        cli.uk_personal_allowance = v;
    }
    if let Some(v) = payload.basic_rate_limit {
        cli.uk_basic_rate_limit = v;
    }
    if let Some(v) = payload.higher_rate_limit {
        cli.uk_higher_rate_limit = v;
    }
    if let Some(v) = payload.basic_rate {
        cli.uk_basic_rate = v;
    }
    if let Some(v) = payload.higher_rate {
        cli.uk_higher_rate = v;
    }
    if let Some(v) = payload.additional_rate {
        cli.uk_additional_rate = v;
    }
    if let Some(v) = payload.allowance_taper {
        cli.no_allowance_taper = !v;
    }
    if let Some(v) = payload.taper_start {
        cli.uk_allowance_taper_start = v;
    }

    if let Some(v) = payload.levy_primary_threshold {
        cli.levy_primary_threshold = v;
    }
    if let Some(v) = payload.levy_upper_threshold {
        cli.levy_upper_threshold = v;
    }
    if let Some(v) = payload.levy_main_rate {
        cli.levy_main_rate = v;
    }
    if let Some(v) = payload.levy_upper_rate {
        cli.levy_upper_rate = v;
    }

    if let Some(v) = payload.pension_withdrawal_rate {
        cli.pension_withdrawal_rate = v;
    }
    if let Some(v) = payload.savings_withdrawal_rate {
        cli.savings_withdrawal_rate = v;
    }
    if let Some(v) = payload.tax_free_fraction {
        cli.tax_free_fraction = v;
    }
    if let Some(v) = payload.retirement_tax_rate {
        cli.retirement_tax_rate = v;
    }
    if let Some(v) = payload.cash_weight {
        cli.cash_weight = v;
    }
    if let Some(v) = payload.income_weight {
        cli.income_weight = v;
    }
    if let Some(v) = payload.savings_policy {
        cli.savings_policy = v.into();
    }
    if let Some(v) = payload.one_off_tax_basis {
        cli.one_off_tax_basis = v.into();
    }
    Ok(())
}

fn evaluate_request_from_payload(payload: EvaluatePayload) -> Result<EvaluateRequest, String> {
    let mut cli = default_cli_for_api();
    apply_payload(&mut cli, payload)?;
    build_request(cli)
}

fn solve_request_from_payload(payload: SolvePayload) -> Result<SolveRequest, String> {
    let mut plan = default_cli_for_api();
    apply_payload(&mut plan, payload.plan)?;

    let Some(target) = payload.target else {
        return Err("target is required".to_string());
    };
    let mut cli = SolveCli {
        plan,
        goal: CliGoalType::RequiredContribution,
        target,
        search_min: 0.0,
        search_max: 100_000.0,
        tolerance: 1.0,
        max_iterations: 60,
        option_index: 0,
    };
    if let Some(v) = payload.goal_type {
        cli.goal = v.into();
    }
    if let Some(v) = payload.search_min {
        cli.search_min = v;
    }
    if let Some(v) = payload.search_max {
        cli.search_max = v;
    }
    if let Some(v) = payload.tolerance {
        cli.tolerance = v;
    }
    if let Some(v) = payload.max_iterations {
        cli.max_iterations = v;
    }
    if let Some(v) = payload.option_index {
        cli.option_index = v;
    }

    build_solve_request(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        gross_annual_income: 50_000.0,
        one_off_income: 0.0,
        current_pension_balance: 20_000.0,
        recurring_pension_contribution: 5_000.0,
        years_to_horizon: 30,
        pension_growth_rate: 5.0,
        savings_growth_rate: 4.0,
        income_aggregation: CliAggregationMode::Total,
        option_labels: vec![
            "Option 1".to_string(),
            "Option 2".to_string(),
            "Option 3".to_string(),
        ],
        option_extra_pension: vec![10_000.0, 15_000.0, 20_000.0],
        option_savings: vec![5_000.0, 10_000.0, 15_000.0],
        uk_personal_allowance: 12_570.0,
        uk_basic_rate_limit: 50_270.0,
        uk_higher_rate_limit: 125_140.0,
        uk_basic_rate: 20.0,
        uk_higher_rate: 40.0,
        uk_additional_rate: 45.0,
        no_allowance_taper: false,
        uk_allowance_taper_start: 100_000.0,
        levy_primary_threshold: 12_570.0,
        levy_upper_threshold: 50_270.0,
        levy_main_rate: 8.0,
        levy_upper_rate: 2.0,
        pension_withdrawal_rate: 4.0,
        savings_withdrawal_rate: 4.0,
        tax_free_fraction: 25.0,
        retirement_tax_rate: 20.0,
        cash_weight: 0.5,
        income_weight: 0.5,
        savings_policy: CliSavingsPolicy::Capped,
        one_off_tax_basis: CliOneOffTaxBasis::Standalone,
    }
}

fn build_breakdown(results: &[ScenarioResult]) -> ChartBreakdown {
    ChartBreakdown {
        labels: results.iter().map(|r| r.label.clone()).collect(),
        pension: results.iter().map(|r| r.total_pension_contribution).collect(),
        tax: results.iter().map(|r| r.tax_paid).collect(),
        levy: results.iter().map(|r| r.levy_paid).collect(),
        savings: results.iter().map(|r| r.savings_contribution_used).collect(),
        cash: results.iter().map(|r| r.cash_available).collect(),
    }
}

fn build_evaluate_response(request: &EvaluateRequest, evaluation: &Evaluation) -> EvaluateResponse {
    EvaluateResponse {
        income_aggregation: request.assumptions.income_aggregation.into(),
        savings_policy: request.config.savings_policy.into(),
        years_to_horizon: request.assumptions.years_to_horizon,
        recommended: evaluation.recommended().map(str::to_string),
        recommended_index: evaluation.recommended_index,
        baseline: evaluation.baseline,
        results: evaluation.results.clone(),
        breakdown: build_breakdown(&evaluation.results),
    }
}

fn build_solve_response(result: &GoalSolveResult) -> SolveResponse {
    SolveResponse {
        goal_type: result.goal_type.into(),
        target: result.target,
        search_min: result.search_min,
        search_max: result.search_max,
        tolerance: result.tolerance,
        max_iterations: result.max_iterations,
        solved_value: result.solved_value,
        solved_result: result.solved_result.clone(),
        iterations: result.iterations.clone(),
        converged: result.converged,
        feasible: result.feasible,
        message: result.message.clone(),
    }
}

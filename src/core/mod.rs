mod config;
mod engine;
mod scoring;
mod solver;
mod tax;
mod types;

pub use config::{
    Band, BandSchedule, ConfigError, EngineConfig, LevySchedule, ScoringWeights, TaperRule,
    TaxSchedule, UK_BASIC_RATE_LIMIT, UK_HIGHER_RATE_LIMIT, UK_PERSONAL_ALLOWANCE, UK_TAPER_END,
    UK_TAPER_START, WithdrawalAssumptions,
};
pub use engine::{
    baseline_cash, evaluate, evaluate_option, gross_base, project, resolve_cash,
    retirement_income,
};
pub use scoring::{normalize, recommend, recommend_index, score_metrics};
pub use solver::{GoalSolveConfig, GoalSolveIteration, GoalSolveResult, GoalType, solve_goal};
pub use tax::{compute_levy, compute_tax, marginal_slice_tax, tapered_allowance};
pub use types::{
    Assumptions, BaselineCash, CashResolution, ContributionOption, Evaluation,
    IncomeAggregationMode, OneOffTaxBasis, RetirementIncome, SavingsPolicy, ScenarioResult,
};

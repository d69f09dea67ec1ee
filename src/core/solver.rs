use serde::Serialize;

use super::config::EngineConfig;
use super::engine::evaluate_option;
use super::types::{Assumptions, ContributionOption, ScenarioResult};

/// Grid points checked for the first income bracket before bisecting.
const SCAN_STEPS: u32 = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GoalType {
    /// Smallest extra pension contribution whose projected monthly income reaches the target.
    ///
    /// Income is not monotone in the contribution: once a capped ISA contribution binds,
    /// every extra pound into the pension is a pound out of the ISA. The search scans the
    /// range for the first grid point that meets the target and bisects the step below it,
    /// so a feasible window narrower than one scan step can be missed.
    RequiredContribution,
    /// Largest extra pension contribution that keeps cash available at or above the target.
    MaxContribution,
}

#[derive(Debug, Clone, Copy)]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    pub target: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub cash_available: f64,
    pub monthly_income: f64,
}

#[derive(Debug, Clone)]
pub struct GoalSolveResult {
    pub goal_type: GoalType,
    pub target: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub solved_value: Option<f64>,
    pub solved_result: Option<ScenarioResult>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

struct Candidate<'a> {
    assumptions: &'a Assumptions,
    option: &'a ContributionOption,
    config: &'a EngineConfig,
}

impl Candidate<'_> {
    fn evaluate(&self, extra_pension: f64) -> ScenarioResult {
        let option = ContributionOption {
            extra_pension_contribution: extra_pension,
            ..self.option.clone()
        };
        evaluate_option(self.assumptions, &option, self.config)
    }
}

fn meets_goal(goal: &GoalSolveConfig, result: &ScenarioResult) -> bool {
    match goal.goal_type {
        GoalType::RequiredContribution => {
            result.projected_monthly_income + 1e-9 >= goal.target
        }
        GoalType::MaxContribution => result.cash_available + 1e-9 >= goal.target,
    }
}

/// Searches the option's extra pension contribution until the goal boundary is bracketed
/// within `tolerance`.
pub fn solve_goal(
    assumptions: &Assumptions,
    option: &ContributionOption,
    engine: &EngineConfig,
    config: GoalSolveConfig,
) -> Result<GoalSolveResult, String> {
    validate_config(config)?;

    let candidate = Candidate {
        assumptions,
        option,
        config: engine,
    };
    let low_eval = candidate.evaluate(config.search_min);
    let high_eval = candidate.evaluate(config.search_max);

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let mut solved_value = None;
    let mut converged = false;
    let feasible;
    let message;

    match config.goal_type {
        GoalType::RequiredContribution => {
            if meets_goal(&config, &low_eval) {
                solved_value = Some(config.search_min);
                converged = true;
                feasible = true;
                message = "Already meets target at lower contribution bound.".to_string();
            } else if let Some((lo, hi)) =
                first_feasible_bracket(&candidate, &config, &high_eval)
            {
                let (lo, hi) = bisect(
                    &candidate,
                    &config,
                    lo,
                    hi,
                    &mut iterations,
                    |met, lo, hi, mid| if met { (lo, mid) } else { (mid, hi) },
                );
                converged = (hi - lo).abs() <= config.tolerance;
                solved_value = Some(hi);
                feasible = true;
                message = if converged {
                    "Solved required pension contribution.".to_string()
                } else {
                    "Reached max iterations before tolerance was met; returning best estimate."
                        .to_string()
                };
            } else {
                feasible = false;
                message = "No feasible contribution found within the search bounds.".to_string();
            }
        }
        GoalType::MaxContribution => {
            if !meets_goal(&config, &low_eval) {
                feasible = false;
                message = "Cash target is not met even at the lower contribution bound.".to_string();
            } else if meets_goal(&config, &high_eval) {
                solved_value = Some(config.search_max);
                converged = true;
                feasible = true;
                message = "Upper contribution bound still keeps the cash target; increase search max."
                    .to_string();
            } else {
                let (lo, hi) = bisect(
                    &candidate,
                    &config,
                    config.search_min,
                    config.search_max,
                    &mut iterations,
                    |met, lo, hi, mid| if met { (mid, hi) } else { (lo, mid) },
                );
                converged = (hi - lo).abs() <= config.tolerance;
                solved_value = Some(lo);
                feasible = true;
                message = if converged {
                    "Solved maximum affordable pension contribution.".to_string()
                } else {
                    "Reached max iterations before tolerance was met; returning best estimate."
                        .to_string()
                };
            }
        }
    }

    let solved_result = solved_value.map(|value| candidate.evaluate(value));

    Ok(GoalSolveResult {
        goal_type: config.goal_type,
        target: config.target,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        solved_value,
        solved_result,
        iterations,
        converged,
        feasible,
        message,
    })
}

/// Walks the search range on a fixed grid and returns the step ending at the first point
/// that meets the goal. The lower bound is known to miss it.
fn first_feasible_bracket(
    candidate: &Candidate<'_>,
    config: &GoalSolveConfig,
    high_eval: &ScenarioResult,
) -> Option<(f64, f64)> {
    let width = (config.search_max - config.search_min) / f64::from(SCAN_STEPS);
    let mut previous = config.search_min;
    for step in 1..SCAN_STEPS {
        let point = config.search_min + width * f64::from(step);
        if meets_goal(config, &candidate.evaluate(point)) {
            return Some((previous, point));
        }
        previous = point;
    }
    meets_goal(config, high_eval).then_some((previous, config.search_max))
}

fn bisect(
    candidate: &Candidate<'_>,
    config: &GoalSolveConfig,
    mut lo: f64,
    mut hi: f64,
    iterations: &mut Vec<GoalSolveIteration>,
    step: impl Fn(bool, f64, f64, f64) -> (f64, f64),
) -> (f64, f64) {
    let mut it = 0;
    while it < config.max_iterations {
        it += 1;
        let mid = (lo + hi) * 0.5;
        let eval = candidate.evaluate(mid);
        iterations.push(GoalSolveIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate_value: mid,
            cash_available: eval.cash_available,
            monthly_income: eval.projected_monthly_income,
        });

        (lo, hi) = step(meets_goal(config, &eval), lo, hi, mid);
        if (hi - lo).abs() <= config.tolerance {
            break;
        }
    }
    (lo, hi)
}

fn validate_config(config: GoalSolveConfig) -> Result<(), String> {
    if !config.target.is_finite() {
        return Err("target must be finite".to_string());
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err("search bounds must be finite".to_string());
    }
    if config.search_min < 0.0 {
        return Err("search min must be >= 0".to_string());
    }
    if config.search_max <= config.search_min {
        return Err("search max must be > search min".to_string());
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err("tolerance must be > 0".to_string());
    }
    if config.max_iterations == 0 {
        return Err("max iterations must be > 0".to_string());
    }
    Ok(())
}

use tracing::debug;

use super::config::{EngineConfig, WithdrawalAssumptions};
use super::scoring::{recommend_index, score_metrics};
use super::tax::{compute_levy, compute_tax, marginal_slice_tax};
use super::types::{
    Assumptions, BaselineCash, CashResolution, ContributionOption, Evaluation,
    IncomeAggregationMode, OneOffTaxBasis, RetirementIncome, SavingsPolicy, ScenarioResult,
};

#[derive(Debug, Clone, Copy)]
struct ProjectedPots {
    pension: f64,
    savings: f64,
    income: RetirementIncome,
}

/// Runs every option against the shared assumptions and picks a recommendation.
pub fn evaluate(
    assumptions: &Assumptions,
    options: &[ContributionOption],
    config: &EngineConfig,
) -> Evaluation {
    let evaluated: Vec<(CashResolution, ProjectedPots)> = options
        .iter()
        .map(|option| {
            let cash = resolve_cash(assumptions, option, config);
            let pots = project_pots(assumptions, option, &cash, &config.withdrawal);
            debug!(
                target: "planner.engine",
                option = %option.label,
                cash_available = cash.cash_available,
                pension_pot = pots.pension,
                savings_pot = pots.savings,
                monthly_income = pots.income.total_monthly,
                "Option evaluated"
            );
            (cash, pots)
        })
        .collect();

    let cash_values: Vec<f64> = evaluated.iter().map(|(c, _)| c.cash_available).collect();
    let income_values: Vec<f64> = evaluated
        .iter()
        .map(|(_, p)| p.income.total_monthly)
        .collect();
    let scores = score_metrics(&cash_values, &income_values, &config.scoring);

    let results: Vec<ScenarioResult> = options
        .iter()
        .zip(evaluated)
        .zip(scores)
        .map(|((option, (cash, pots)), score)| ScenarioResult {
            label: option.label.clone(),
            total_pension_contribution: cash.total_pension_contribution,
            taxable_income: cash.taxable_income,
            tax_paid: cash.tax_paid,
            levy_paid: cash.levy_paid,
            savings_contribution_used: cash.savings_used,
            cash_available: cash.cash_available,
            projected_pension_pot: pots.pension,
            projected_savings_pot: pots.savings,
            projected_monthly_income: pots.income.total_monthly,
            score,
        })
        .collect();

    let recommended_index = recommend_index(&results);
    if let Some(idx) = recommended_index {
        debug!(
            target: "planner.engine",
            option = %results[idx].label,
            score = results[idx].score,
            "Recommended option"
        );
    }

    Evaluation {
        results,
        recommended_index,
        baseline: baseline_cash(assumptions, config),
    }
}

/// Evaluates a single option with the same stages as [`evaluate`]. With nothing to rank
/// against, the score is the sum of the scoring weights.
pub fn evaluate_option(
    assumptions: &Assumptions,
    option: &ContributionOption,
    config: &EngineConfig,
) -> ScenarioResult {
    let mut evaluation = evaluate(assumptions, std::slice::from_ref(option), config);
    evaluation.results.remove(0)
}

pub fn gross_base(assumptions: &Assumptions) -> f64 {
    let salary = assumptions.gross_annual_income.max(0.0);
    let one_off = assumptions.one_off_income.max(0.0);
    match assumptions.income_aggregation {
        IncomeAggregationMode::Total => salary + one_off,
        IncomeAggregationMode::OneOffOnly => one_off,
    }
}

pub fn resolve_cash(
    assumptions: &Assumptions,
    option: &ContributionOption,
    config: &EngineConfig,
) -> CashResolution {
    let gross_base = gross_base(assumptions);
    let total_pension_contribution = assumptions.recurring_pension_contribution.max(0.0)
        + option.extra_pension_contribution.max(0.0);
    let taxable_income = (gross_base - total_pension_contribution).max(0.0);

    let tax_paid = match (assumptions.income_aggregation, config.one_off_tax_basis) {
        (IncomeAggregationMode::OneOffOnly, OneOffTaxBasis::MarginalOverSalary) => {
            let total_income =
                assumptions.gross_annual_income.max(0.0) + assumptions.one_off_income.max(0.0);
            marginal_slice_tax(total_income, taxable_income, &config.tax)
        }
        _ => compute_tax(taxable_income, &config.tax),
    };
    let levy_paid = compute_levy(taxable_income, &config.levy);
    let disposable_before_savings = taxable_income - tax_paid - levy_paid;

    let requested_savings = option.savings_contribution.max(0.0);
    let savings_used = match config.savings_policy {
        SavingsPolicy::Uncapped => requested_savings,
        SavingsPolicy::Capped => requested_savings.min(disposable_before_savings.max(0.0)),
    };

    CashResolution {
        gross_base,
        total_pension_contribution,
        taxable_income,
        tax_paid,
        levy_paid,
        disposable_before_savings,
        savings_used,
        cash_available: disposable_before_savings - savings_used,
    }
}

pub fn baseline_cash(assumptions: &Assumptions, config: &EngineConfig) -> BaselineCash {
    let cash = resolve_cash(
        assumptions,
        &ContributionOption::new("baseline", 0.0, 0.0),
        config,
    );
    BaselineCash {
        taxable_income: cash.taxable_income,
        tax_paid: cash.tax_paid,
        levy_paid: cash.levy_paid,
        cash_available: cash.cash_available,
    }
}

/// Future value after `years` periods of a starting balance, a contribution made once per
/// period, and a single contribution made now.
pub fn project(
    balance: f64,
    recurring_contribution: f64,
    one_off_contribution: f64,
    growth_rate: f64,
    years: u32,
) -> f64 {
    let n = years as f64;
    let growth = (1.0 + growth_rate).powf(n);
    let annuity = if growth_rate.abs() < 1e-9 {
        recurring_contribution * n
    } else {
        recurring_contribution * ((growth - 1.0) / growth_rate)
    };
    balance * growth + annuity + one_off_contribution * growth
}

pub fn retirement_income(
    pension_pot: f64,
    savings_pot: f64,
    withdrawal: &WithdrawalAssumptions,
) -> RetirementIncome {
    let annual_pension_draw = pension_pot * withdrawal.pension_withdrawal_rate;
    let tax_free = annual_pension_draw * withdrawal.tax_free_fraction;
    let taxed = annual_pension_draw
        * (1.0 - withdrawal.tax_free_fraction)
        * (1.0 - withdrawal.retirement_tax_rate);
    let pension_monthly = (tax_free + taxed) / withdrawal.periods_per_year;
    let savings_monthly =
        savings_pot * withdrawal.savings_withdrawal_rate / withdrawal.periods_per_year;

    RetirementIncome {
        pension_monthly,
        savings_monthly,
        total_monthly: pension_monthly + savings_monthly,
    }
}

fn project_pots(
    assumptions: &Assumptions,
    option: &ContributionOption,
    cash: &CashResolution,
    withdrawal: &WithdrawalAssumptions,
) -> ProjectedPots {
    let years = assumptions.years_to_horizon;
    let pension = project(
        assumptions.current_pension_balance.max(0.0),
        assumptions.recurring_pension_contribution.max(0.0),
        option.extra_pension_contribution.max(0.0),
        assumptions.pension_growth_rate,
        years,
    );
    let savings = project(
        0.0,
        0.0,
        cash.savings_used,
        assumptions.savings_growth_rate,
        years,
    );

    ProjectedPots {
        pension,
        savings,
        income: retirement_income(pension, savings, withdrawal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{LevySchedule, TaxSchedule};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn sample_assumptions() -> Assumptions {
        Assumptions {
            gross_annual_income: 50_000.0,
            one_off_income: 0.0,
            current_pension_balance: 20_000.0,
            recurring_pension_contribution: 5_000.0,
            years_to_horizon: 30,
            pension_growth_rate: 0.05,
            savings_growth_rate: 0.04,
            income_aggregation: IncomeAggregationMode::Total,
        }
    }

    fn end_to_end_assumptions() -> Assumptions {
        Assumptions {
            gross_annual_income: 77_000.0,
            one_off_income: 58_000.0,
            current_pension_balance: 20_000.0,
            recurring_pension_contribution: 3_300.0,
            years_to_horizon: 25,
            pension_growth_rate: 0.057,
            savings_growth_rate: 0.07,
            income_aggregation: IncomeAggregationMode::Total,
        }
    }

    fn end_to_end_options() -> Vec<ContributionOption> {
        vec![
            ContributionOption::new("Option 1", 0.0, 0.0),
            ContributionOption::new("Option 2", 10_554.0, 0.0),
            ContributionOption::new("Option 3", 35_000.0, 0.0),
        ]
    }

    #[test]
    fn project_with_zero_growth_sums_contributions() {
        assert_approx(project(0.0, 1_000.0, 0.0, 0.0, 25), 25_000.0);
        assert_approx(project(500.0, 1_000.0, 250.0, 0.0, 4), 4_750.0);
    }

    #[test]
    fn project_single_period_annuity_equals_contribution() {
        for rate in [-0.5, 0.01, 0.057, 0.25] {
            assert_approx(project(0.0, 3_300.0, 0.0, rate, 1), 3_300.0);
        }
    }

    #[test]
    fn project_compounds_balance_and_one_off_alike() {
        let growth = 1.05f64.powi(10);
        assert_approx(project(10_000.0, 0.0, 0.0, 0.05, 10), 10_000.0 * growth);
        assert_approx(project(0.0, 0.0, 10_000.0, 0.05, 10), 10_000.0 * growth);
        assert_approx(
            project(0.0, 1_000.0, 0.0, 0.05, 10),
            1_000.0 * (growth - 1.0) / 0.05,
        );
    }

    #[test]
    fn project_with_zero_years_returns_starting_amounts() {
        assert_approx(project(20_000.0, 5_000.0, 1_000.0, 0.05, 0), 21_000.0);
    }

    #[test]
    fn retirement_income_splits_tax_free_and_taxed_portions() {
        let income = retirement_income(300_000.0, 120_000.0, &WithdrawalAssumptions::default());
        // 12,000 drawn: 3,000 tax free + 9,000 * 80%
        assert_approx(income.pension_monthly, (3_000.0 + 7_200.0) / 12.0);
        assert_approx(income.savings_monthly, 4_800.0 / 12.0);
        assert_approx(income.total_monthly, 850.0 + 400.0);
    }

    #[test]
    fn resolve_cash_total_mode_deducts_pension_before_tax() {
        let assumptions = sample_assumptions();
        let config = EngineConfig::default();
        let option = ContributionOption::new("A", 10_000.0, 5_000.0);
        let cash = resolve_cash(&assumptions, &option, &config);

        assert_approx(cash.gross_base, 50_000.0);
        assert_approx(cash.total_pension_contribution, 15_000.0);
        assert_approx(cash.taxable_income, 35_000.0);
        assert_approx(cash.tax_paid, (35_000.0 - 12_570.0) * 0.20);
        assert_approx(cash.levy_paid, (35_000.0 - 12_570.0) * 0.08);
        assert_approx(
            cash.disposable_before_savings,
            35_000.0 - cash.tax_paid - cash.levy_paid,
        );
        assert_approx(cash.savings_used, 5_000.0);
        assert_approx(cash.cash_available, cash.disposable_before_savings - 5_000.0);
    }

    #[test]
    fn resolve_cash_one_off_only_uses_one_off_as_base() {
        let mut assumptions = sample_assumptions();
        assumptions.one_off_income = 20_000.0;
        assumptions.income_aggregation = IncomeAggregationMode::OneOffOnly;
        let option = ContributionOption::new("A", 0.0, 0.0);
        let cash = resolve_cash(&assumptions, &option, &EngineConfig::default());

        assert_approx(cash.gross_base, 20_000.0);
        assert_approx(cash.taxable_income, 15_000.0);
        assert_approx(cash.tax_paid, (15_000.0 - 12_570.0) * 0.20);
    }

    #[test]
    fn marginal_over_salary_taxes_one_off_above_salary() {
        let mut assumptions = sample_assumptions();
        assumptions.one_off_income = 20_000.0;
        assumptions.income_aggregation = IncomeAggregationMode::OneOffOnly;
        let option = ContributionOption::new("A", 0.0, 0.0);

        let standalone = resolve_cash(&assumptions, &option, &EngineConfig::default());
        let marginal = resolve_cash(
            &assumptions,
            &option,
            &EngineConfig::default().with_one_off_tax_basis(OneOffTaxBasis::MarginalOverSalary),
        );

        // 15,000 slice sits on 55,000 of salary + recurring pension, so all of it is at 40%.
        assert_approx(marginal.tax_paid, 15_000.0 * 0.40);
        assert!(marginal.tax_paid >= standalone.tax_paid);
        assert_approx(marginal.levy_paid, standalone.levy_paid);
    }

    #[test]
    fn marginal_basis_is_ignored_in_total_mode() {
        let assumptions = sample_assumptions();
        let option = ContributionOption::new("A", 1_000.0, 0.0);
        let plain = resolve_cash(&assumptions, &option, &EngineConfig::default());
        let marginal = resolve_cash(
            &assumptions,
            &option,
            &EngineConfig::default().with_one_off_tax_basis(OneOffTaxBasis::MarginalOverSalary),
        );
        assert_approx(plain.tax_paid, marginal.tax_paid);
    }

    #[test]
    fn contributions_above_income_clamp_taxable_income_to_zero() {
        let mut assumptions = sample_assumptions();
        assumptions.gross_annual_income = 8_000.0;
        let option = ContributionOption::new("A", 10_000.0, 1_000.0);
        let cash = resolve_cash(&assumptions, &option, &EngineConfig::default());

        assert_approx(cash.taxable_income, 0.0);
        assert_approx(cash.tax_paid, 0.0);
        assert_approx(cash.levy_paid, 0.0);
        assert_approx(cash.savings_used, 0.0);
        assert_approx(cash.cash_available, 0.0);
    }

    #[test]
    fn capped_policy_limits_savings_to_disposable_cash() {
        let mut assumptions = sample_assumptions();
        assumptions.gross_annual_income = 20_000.0;
        assumptions.recurring_pension_contribution = 0.0;
        let option = ContributionOption::new("A", 0.0, 50_000.0);
        let cash = resolve_cash(&assumptions, &option, &EngineConfig::default());

        assert_approx(cash.savings_used, cash.disposable_before_savings);
        assert_approx(cash.cash_available, 0.0);
    }

    #[test]
    fn uncapped_policy_can_leave_negative_cash() {
        let mut assumptions = sample_assumptions();
        assumptions.gross_annual_income = 20_000.0;
        let option = ContributionOption::new("A", 0.0, 50_000.0);
        let config = EngineConfig::default().with_savings_policy(SavingsPolicy::Uncapped);
        let cash = resolve_cash(&assumptions, &option, &config);

        assert_approx(cash.savings_used, 50_000.0);
        assert!(cash.cash_available < 0.0);
    }

    #[test]
    fn savings_pot_compounds_only_savings_used() {
        let mut assumptions = sample_assumptions();
        assumptions.gross_annual_income = 20_000.0;
        assumptions.recurring_pension_contribution = 0.0;
        let options = [ContributionOption::new("A", 0.0, 50_000.0)];
        let evaluation = evaluate(&assumptions, &options, &EngineConfig::default());
        let result = &evaluation.results[0];

        assert_approx_tol(
            result.projected_savings_pot,
            result.savings_contribution_used * 1.04f64.powi(30),
            1e-6,
        );
        assert!(result.savings_contribution_used < 50_000.0);
    }

    #[test]
    fn baseline_ignores_option_contributions() {
        let assumptions = sample_assumptions();
        let baseline = baseline_cash(&assumptions, &EngineConfig::default());
        assert_approx(baseline.taxable_income, 45_000.0);
        let tax = (45_000.0 - 12_570.0) * 0.20;
        let levy = (45_000.0 - 12_570.0) * 0.08;
        assert_approx(baseline.tax_paid, tax);
        assert_approx(baseline.levy_paid, levy);
        assert_approx(baseline.cash_available, 45_000.0 - tax - levy);
    }

    #[test]
    fn evaluate_end_to_end_orders_options_by_contribution() {
        let assumptions = end_to_end_assumptions();
        let options = end_to_end_options();
        let evaluation = evaluate(&assumptions, &options, &EngineConfig::default());

        assert_eq!(evaluation.results.len(), 3);
        let r = &evaluation.results;
        assert!(r[0].cash_available > r[1].cash_available);
        assert!(r[1].cash_available > r[2].cash_available);
        assert!(r[0].projected_pension_pot < r[1].projected_pension_pot);
        assert!(r[1].projected_pension_pot < r[2].projected_pension_pot);
        assert!(r[0].projected_monthly_income < r[1].projected_monthly_income);
        assert!(r[1].projected_monthly_income < r[2].projected_monthly_income);
        assert!(r[0].tax_paid > r[1].tax_paid);

        assert_eq!(r[0].label, "Option 1");
        assert_approx(r[0].total_pension_contribution, 3_300.0);
        assert_approx(r[2].total_pension_contribution, 38_300.0);
        for result in r {
            assert!((0.0..=1.0).contains(&result.score));
            assert_approx(result.projected_savings_pot, 0.0);
        }

        let recommended = evaluation.recommended().expect("one option recommended");
        assert!(options.iter().any(|o| o.label == recommended));
        let best = evaluation.recommended_result().expect("recommended result");
        assert!(r.iter().all(|other| other.score <= best.score));
    }

    #[test]
    fn evaluate_end_to_end_taxes_first_option_with_full_taper() {
        let assumptions = end_to_end_assumptions();
        let options = end_to_end_options();
        let evaluation = evaluate(&assumptions, &options, &EngineConfig::default());
        let first = &evaluation.results[0];

        // 131,700 taxable: allowance fully tapered away
        assert_approx(first.taxable_income, 131_700.0);
        assert_approx(
            first.tax_paid,
            50_270.0 * 0.20 + 74_870.0 * 0.40 + (131_700.0 - 125_140.0) * 0.45,
        );
        assert_approx(
            first.levy_paid,
            37_700.0 * 0.08 + (131_700.0 - 50_270.0) * 0.02,
        );
    }

    #[test]
    fn evaluate_with_no_options_recommends_nothing() {
        let evaluation = evaluate(&sample_assumptions(), &[], &EngineConfig::default());
        assert!(evaluation.results.is_empty());
        assert!(evaluation.recommended().is_none());
        assert!(evaluation.baseline.cash_available > 0.0);
    }

    #[test]
    fn evaluate_option_matches_batch_evaluation_except_score() {
        let assumptions = sample_assumptions();
        let config = EngineConfig::default();
        let options = [
            ContributionOption::new("A", 10_000.0, 5_000.0),
            ContributionOption::new("B", 15_000.0, 10_000.0),
        ];
        let batch = evaluate(&assumptions, &options, &config);
        let single = evaluate_option(&assumptions, &options[1], &config);

        assert_eq!(single.label, "B");
        assert_approx(single.cash_available, batch.results[1].cash_available);
        assert_approx(
            single.projected_monthly_income,
            batch.results[1].projected_monthly_income,
        );
        assert_approx(single.score, 1.0);
    }

    #[test]
    fn levy_rate_override_changes_cash_only_through_levy() {
        let assumptions = sample_assumptions();
        let option = ContributionOption::new("A", 0.0, 0.0);
        let mut config = EngineConfig::default();
        let base = resolve_cash(&assumptions, &option, &config);
        config.levy = LevySchedule::thresholds(12_570.0, 50_270.0, 0.12, 0.02).expect("valid");
        let higher = resolve_cash(&assumptions, &option, &config);

        assert_approx(higher.tax_paid, base.tax_paid);
        assert_approx(
            base.cash_available - higher.cash_available,
            higher.levy_paid - base.levy_paid,
        );
    }

    #[test]
    fn removing_taper_lowers_tax_for_high_earners() {
        let assumptions = end_to_end_assumptions();
        let option = ContributionOption::new("A", 0.0, 0.0);
        let mut config = EngineConfig::default();
        let tapered = resolve_cash(&assumptions, &option, &config);
        config.tax = TaxSchedule::uk_bands(12_570.0, 50_270.0, 125_140.0, [0.2, 0.4, 0.45], None)
            .expect("valid schedule");
        let untapered = resolve_cash(&assumptions, &option, &config);
        assert_approx(tapered.tax_paid - untapered.tax_paid, 12_570.0 * 0.20);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        #[test]
        fn prop_capped_cash_is_never_negative(
            salary in 0u32..300_000,
            one_off in 0u32..100_000,
            recurring in 0u32..40_000,
            extra in 0u32..80_000,
            savings in 0u32..100_000,
            one_off_only in proptest::bool::ANY,
        ) {
            let mut assumptions = sample_assumptions();
            assumptions.gross_annual_income = salary as f64;
            assumptions.one_off_income = one_off as f64;
            assumptions.recurring_pension_contribution = recurring as f64;
            if one_off_only {
                assumptions.income_aggregation = IncomeAggregationMode::OneOffOnly;
            }
            let option = ContributionOption::new("A", extra as f64, savings as f64);
            let cash = resolve_cash(&assumptions, &option, &EngineConfig::default());

            prop_assert!(cash.disposable_before_savings >= 0.0);
            prop_assert!(cash.cash_available >= 0.0);
            prop_assert!(cash.savings_used <= savings as f64 + 1e-9);
            prop_assert!(cash.taxable_income >= 0.0);
        }

        #[test]
        fn prop_more_extra_pension_means_less_cash_and_bigger_pot(
            salary in 0u32..300_000,
            extra in 0u32..60_000,
            bump in 1u32..20_000,
        ) {
            let mut assumptions = sample_assumptions();
            assumptions.gross_annual_income = salary as f64;
            let config = EngineConfig::default();
            let low = ContributionOption::new("low", extra as f64, 0.0);
            let high = ContributionOption::new("high", (extra + bump) as f64, 0.0);
            let evaluation = evaluate(&assumptions, &[low, high], &config);
            let (l, h) = (&evaluation.results[0], &evaluation.results[1]);

            prop_assert!(h.cash_available <= l.cash_available + 1e-9);
            prop_assert!(h.projected_pension_pot > l.projected_pension_pot);
        }

        #[test]
        fn prop_zero_growth_annuity_is_linear(contribution in 0u32..100_000, years in 0u32..60) {
            let value = project(0.0, contribution as f64, 0.0, 0.0, years);
            prop_assert!((value - contribution as f64 * years as f64).abs() <= 1e-6);
        }
    }
}

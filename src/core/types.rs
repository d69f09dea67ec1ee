use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IncomeAggregationMode {
    Total,
    OneOffOnly,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SavingsPolicy {
    Capped,
    Uncapped,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OneOffTaxBasis {
    Standalone,
    MarginalOverSalary,
}

/// Shared what-if assumptions. Every option in a run is evaluated against the same record.
#[derive(Debug, Clone)]
pub struct Assumptions {
    pub gross_annual_income: f64,
    pub one_off_income: f64,
    pub current_pension_balance: f64,
    pub recurring_pension_contribution: f64,
    pub years_to_horizon: u32,
    pub pension_growth_rate: f64,
    pub savings_growth_rate: f64,
    pub income_aggregation: IncomeAggregationMode,
}

#[derive(Debug, Clone)]
pub struct ContributionOption {
    pub label: String,
    pub extra_pension_contribution: f64,
    pub savings_contribution: f64,
}

impl ContributionOption {
    pub fn new(label: impl Into<String>, extra_pension: f64, savings: f64) -> Self {
        Self {
            label: label.into(),
            extra_pension_contribution: extra_pension,
            savings_contribution: savings,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CashResolution {
    pub gross_base: f64,
    pub total_pension_contribution: f64,
    pub taxable_income: f64,
    pub tax_paid: f64,
    pub levy_paid: f64,
    pub disposable_before_savings: f64,
    pub savings_used: f64,
    pub cash_available: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RetirementIncome {
    pub pension_monthly: f64,
    pub savings_monthly: f64,
    pub total_monthly: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub label: String,
    pub total_pension_contribution: f64,
    pub taxable_income: f64,
    pub tax_paid: f64,
    pub levy_paid: f64,
    pub savings_contribution_used: f64,
    pub cash_available: f64,
    pub projected_pension_pot: f64,
    pub projected_savings_pot: f64,
    pub projected_monthly_income: f64,
    pub score: f64,
}

/// Cash available with only the recurring pension contribution deducted.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineCash {
    pub taxable_income: f64,
    pub tax_paid: f64,
    pub levy_paid: f64,
    pub cash_available: f64,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub results: Vec<ScenarioResult>,
    pub recommended_index: Option<usize>,
    pub baseline: BaselineCash,
}

impl Evaluation {
    pub fn recommended(&self) -> Option<&str> {
        self.recommended_result().map(|r| r.label.as_str())
    }

    pub fn recommended_result(&self) -> Option<&ScenarioResult> {
        self.recommended_index.and_then(|idx| self.results.get(idx))
    }
}

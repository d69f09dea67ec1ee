use super::config::{Band, LevySchedule, TaxSchedule};

/// Income tax on `income` after contribution deductions.
///
/// With a taper rule the allowance band's upper edge shrinks once income passes the taper
/// start; the edges of every higher band stay where they are.
pub fn compute_tax(income: f64, schedule: &TaxSchedule) -> f64 {
    let income = income.max(0.0);
    let bands = schedule.bands();
    let allowance = tapered_allowance(income, schedule);

    let mut tax = 0.0;
    for (idx, band) in bands.iter().enumerate() {
        let (lower, upper) = match (schedule.taper().is_some(), idx) {
            (true, 0) => (0.0, Some(allowance)),
            (true, 1) => (allowance, band.upper),
            _ => (band.lower, band.upper),
        };
        tax += slice_in_band(income, lower, upper) * band.rate;
    }
    tax.max(0.0)
}

/// Allowance left after the taper for this income. Without a taper rule this is the full
/// zero-rate band.
pub fn tapered_allowance(income: f64, schedule: &TaxSchedule) -> f64 {
    let nominal = schedule.nominal_allowance();
    let Some(taper) = schedule.taper() else {
        return nominal;
    };

    let income = income.max(0.0);
    let reduction = (income - taper.start).max(0.0) * taper.reduction_ratio;
    (nominal - reduction).clamp(0.0, nominal)
}

/// Secondary levy on the same post-deduction income.
pub fn compute_levy(income: f64, schedule: &LevySchedule) -> f64 {
    banded_liability(income.max(0.0), schedule.bands())
}

/// Tax on the top slice of `total_income`, i.e. the increase caused by adding `slice` on
/// top of everything below it.
pub fn marginal_slice_tax(total_income: f64, slice: f64, schedule: &TaxSchedule) -> f64 {
    let total = total_income.max(0.0);
    let below = (total - slice.max(0.0)).max(0.0);
    (compute_tax(total, schedule) - compute_tax(below, schedule)).max(0.0)
}

fn banded_liability(income: f64, bands: &[Band]) -> f64 {
    bands
        .iter()
        .map(|band| slice_in_band(income, band.lower, band.upper) * band.rate)
        .sum()
}

fn slice_in_band(income: f64, lower: f64, upper: Option<f64>) -> f64 {
    let top = upper.map_or(income, |u| income.min(u));
    (top - lower).max(0.0)
}

use super::config::ScoringWeights;
use super::types::ScenarioResult;

/// Min-max normalisation into [0, 1]. When every value is equal each entry scores 1, as if
/// it were the maximum.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|v| if span > 0.0 { (v - min) / span } else { 1.0 })
        .collect()
}

/// Weighted sum of the normalised cash and monthly income metrics, one score per option.
pub fn score_metrics(cash: &[f64], income: &[f64], weights: &ScoringWeights) -> Vec<f64> {
    normalize(cash)
        .into_iter()
        .zip(normalize(income))
        .map(|(c, i)| weights.cash * c + weights.income * i)
        .collect()
}

/// Index of the highest score; the first one wins a tie.
pub fn recommend_index(results: &[ScenarioResult]) -> Option<usize> {
    results
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, r)| match best {
            Some((_, score)) if r.score <= score => best,
            _ => Some((idx, r.score)),
        })
        .map(|(idx, _)| idx)
}

pub fn recommend(results: &[ScenarioResult]) -> Option<&str> {
    recommend_index(results).map(|idx| results[idx].label.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn result(label: &str, cash: f64, income: f64, score: f64) -> ScenarioResult {
        ScenarioResult {
            label: label.to_string(),
            total_pension_contribution: 0.0,
            taxable_income: 0.0,
            tax_paid: 0.0,
            levy_paid: 0.0,
            savings_contribution_used: 0.0,
            cash_available: cash,
            projected_pension_pot: 0.0,
            projected_savings_pot: 0.0,
            projected_monthly_income: income,
            score,
        }
    }

    #[test]
    fn normalize_maps_range_onto_unit_interval() {
        assert_eq!(normalize(&[10.0, 20.0, 15.0]), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn normalize_ties_score_as_maximum() {
        assert_eq!(normalize(&[7.0, 7.0, 7.0]), vec![1.0, 1.0, 1.0]);
        assert_eq!(normalize(&[3.0]), vec![1.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn score_metrics_weights_each_metric() {
        let weights = ScoringWeights::default();
        let scores = score_metrics(&[100.0, 0.0, 50.0], &[0.0, 10.0, 5.0], &weights);
        assert_eq!(scores, vec![0.5, 0.5, 0.5]);

        let scores = score_metrics(&[100.0, 0.0], &[0.0, 10.0], &ScoringWeights::cash_only());
        assert_eq!(scores, vec![1.0, 0.0]);
    }

    #[test]
    fn recommend_picks_highest_score() {
        let results = vec![
            result("Option 1", 10.0, 1.0, 0.2),
            result("Option 2", 20.0, 2.0, 0.9),
            result("Option 3", 30.0, 3.0, 0.4),
        ];
        assert_eq!(recommend(&results), Some("Option 2"));
    }

    #[test]
    fn recommend_breaks_ties_by_first_seen() {
        let results = vec![
            result("Option 1", 10.0, 1.0, 0.5),
            result("Option 2", 20.0, 2.0, 0.8),
            result("Option 3", 30.0, 3.0, 0.8),
        ];
        assert_eq!(recommend_index(&results), Some(1));
    }

    #[test]
    fn recommend_on_empty_is_none() {
        assert_eq!(recommend(&[]), None);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_recommendation_is_deterministic(
            cash in proptest::collection::vec(-50_000i32..150_000, 3),
            income in proptest::collection::vec(0u32..10_000, 3),
        ) {
            let cash: Vec<f64> = cash.into_iter().map(f64::from).collect();
            let income: Vec<f64> = income.into_iter().map(f64::from).collect();
            let scores = score_metrics(&cash, &income, &ScoringWeights::default());
            let results: Vec<ScenarioResult> = (0..3)
                .map(|i| result(&format!("Option {}", i + 1), cash[i], income[i], scores[i]))
                .collect();

            let first = recommend(&results);
            prop_assert!(first.is_some());
            prop_assert_eq!(first, recommend(&results));
            for score in &scores {
                prop_assert!((0.0..=1.0).contains(score));
            }
        }
    }
}

use thiserror::Error;

use super::types::{OneOffTaxBasis, SavingsPolicy};

pub const UK_PERSONAL_ALLOWANCE: f64 = 12_570.0;
pub const UK_BASIC_RATE_LIMIT: f64 = 50_270.0;
pub const UK_HIGHER_RATE_LIMIT: f64 = 125_140.0;
pub const UK_TAPER_START: f64 = 100_000.0;
pub const UK_TAPER_END: f64 = 125_140.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("band schedule must contain at least one band")]
    EmptySchedule,
    #[error("first band must start at 0, found {0}")]
    FirstBandNotAtZero(f64),
    #[error("band {index}: bounds must be finite and >= 0")]
    InvalidBound { index: usize },
    #[error("band {index}: upper bound must be greater than lower bound")]
    NotAscending { index: usize },
    #[error("band {index}: lower bound {lower} does not meet previous upper bound {previous_upper}")]
    NotContiguous {
        index: usize,
        lower: f64,
        previous_upper: f64,
    },
    #[error("band {index}: only the last band may be unbounded")]
    UnboundedNotLast { index: usize },
    #[error("{name} must be between 0 and 1, found {value}")]
    RateOutOfRange { name: String, value: f64 },
    #[error("taper end {end} must be greater than taper start {start}")]
    InvalidTaperRange { start: f64, end: f64 },
    #[error("taper reduction ratio must be finite and > 0, found {0}")]
    InvalidTaperRatio(f64),
    #[error("allowance taper requires a zero-rate first band")]
    TaperWithoutAllowanceBand,
    #[error("taper end {end} must be where the allowance reaches zero ({expected})")]
    TaperEndMismatch { end: f64, expected: f64 },
    #[error("{0} must be finite and > 0")]
    NonPositive(String),
    #[error("scoring weights must be finite, >= 0 and not both zero")]
    InvalidWeights,
}

fn check_rate(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RateOutOfRange {
            name: name.to_string(),
            value,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub lower: f64,
    pub upper: Option<f64>,
    pub rate: f64,
}

impl Band {
    pub fn bounded(lower: f64, upper: f64, rate: f64) -> Self {
        Self {
            lower,
            upper: Some(upper),
            rate,
        }
    }

    pub fn unbounded(lower: f64, rate: f64) -> Self {
        Self {
            lower,
            upper: None,
            rate,
        }
    }
}

/// Contiguous, ascending list of rate bands starting at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSchedule {
    bands: Vec<Band>,
}

impl BandSchedule {
    pub fn new(bands: Vec<Band>) -> Result<Self, ConfigError> {
        if bands.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        if bands[0].lower != 0.0 {
            return Err(ConfigError::FirstBandNotAtZero(bands[0].lower));
        }

        let last = bands.len() - 1;
        for (index, band) in bands.iter().enumerate() {
            if !band.lower.is_finite() || band.lower < 0.0 {
                return Err(ConfigError::InvalidBound { index });
            }
            match band.upper {
                Some(upper) if !upper.is_finite() => {
                    return Err(ConfigError::InvalidBound { index });
                }
                Some(upper) if upper <= band.lower => {
                    return Err(ConfigError::NotAscending { index });
                }
                None if index != last => return Err(ConfigError::UnboundedNotLast { index }),
                _ => {}
            }
            check_rate(&format!("band {index} rate"), band.rate)?;

            if index > 0 {
                let previous_upper = bands[index - 1].upper.unwrap_or(f64::INFINITY);
                if band.lower != previous_upper {
                    return Err(ConfigError::NotContiguous {
                        index,
                        lower: band.lower,
                        previous_upper,
                    });
                }
            }
        }

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }
}

/// Linear withdrawal of the allowance band once income passes `start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaperRule {
    pub start: f64,
    pub end: f64,
    pub reduction_ratio: f64,
}

impl TaperRule {
    pub fn new(start: f64, end: f64, reduction_ratio: f64) -> Result<Self, ConfigError> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
            return Err(ConfigError::InvalidTaperRange { start, end });
        }
        if !reduction_ratio.is_finite() || reduction_ratio <= 0.0 {
            return Err(ConfigError::InvalidTaperRatio(reduction_ratio));
        }
        Ok(Self {
            start,
            end,
            reduction_ratio,
        })
    }

    pub fn uk() -> Self {
        Self {
            start: UK_TAPER_START,
            end: UK_TAPER_END,
            reduction_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxSchedule {
    bands: BandSchedule,
    taper: Option<TaperRule>,
}

impl TaxSchedule {
    pub fn new(bands: BandSchedule, taper: Option<TaperRule>) -> Result<Self, ConfigError> {
        if taper.is_some() {
            let first = bands.bands()[0];
            if first.rate != 0.0 || first.upper.is_none() {
                return Err(ConfigError::TaperWithoutAllowanceBand);
            }
        }
        if let Some(rule) = &taper {
            let expected = rule.start + bands.bands()[0].upper.unwrap_or(0.0) / rule.reduction_ratio;
            if (rule.end - expected).abs() > 0.01 {
                return Err(ConfigError::TaperEndMismatch {
                    end: rule.end,
                    expected,
                });
            }
        }
        Ok(Self { bands, taper })
    }

    /// Allowance, basic, higher and additional bands.
    pub fn uk_bands(
        personal_allowance: f64,
        basic_rate_limit: f64,
        higher_rate_limit: f64,
        rates: [f64; 3],
        taper: Option<TaperRule>,
    ) -> Result<Self, ConfigError> {
        let [basic, higher, additional] = rates;
        let bands = BandSchedule::new(vec![
            Band::bounded(0.0, personal_allowance, 0.0),
            Band::bounded(personal_allowance, basic_rate_limit, basic),
            Band::bounded(basic_rate_limit, higher_rate_limit, higher),
            Band::unbounded(higher_rate_limit, additional),
        ])?;
        Self::new(bands, taper)
    }

    pub fn bands(&self) -> &[Band] {
        self.bands.bands()
    }

    pub fn taper(&self) -> Option<&TaperRule> {
        self.taper.as_ref()
    }

    pub fn nominal_allowance(&self) -> f64 {
        let first = self.bands()[0];
        if first.rate == 0.0 {
            first.upper.unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

impl Default for TaxSchedule {
    fn default() -> Self {
        Self {
            bands: BandSchedule {
                bands: vec![
                    Band::bounded(0.0, UK_PERSONAL_ALLOWANCE, 0.0),
                    Band::bounded(UK_PERSONAL_ALLOWANCE, UK_BASIC_RATE_LIMIT, 0.20),
                    Band::bounded(UK_BASIC_RATE_LIMIT, UK_HIGHER_RATE_LIMIT, 0.40),
                    Band::unbounded(UK_HIGHER_RATE_LIMIT, 0.45),
                ],
            },
            taper: Some(TaperRule::uk()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevySchedule {
    bands: BandSchedule,
}

impl LevySchedule {
    pub fn new(bands: BandSchedule) -> Self {
        Self { bands }
    }

    /// Nil band below `primary_threshold`, `main_rate` up to `upper_threshold`, `upper_rate` above.
    pub fn thresholds(
        primary_threshold: f64,
        upper_threshold: f64,
        main_rate: f64,
        upper_rate: f64,
    ) -> Result<Self, ConfigError> {
        let bands = BandSchedule::new(vec![
            Band::bounded(0.0, primary_threshold, 0.0),
            Band::bounded(primary_threshold, upper_threshold, main_rate),
            Band::unbounded(upper_threshold, upper_rate),
        ])?;
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        self.bands.bands()
    }
}

impl Default for LevySchedule {
    fn default() -> Self {
        Self {
            bands: BandSchedule {
                bands: vec![
                    Band::bounded(0.0, UK_PERSONAL_ALLOWANCE, 0.0),
                    Band::bounded(UK_PERSONAL_ALLOWANCE, UK_BASIC_RATE_LIMIT, 0.08),
                    Band::unbounded(UK_BASIC_RATE_LIMIT, 0.02),
                ],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalAssumptions {
    pub pension_withdrawal_rate: f64,
    pub savings_withdrawal_rate: f64,
    pub tax_free_fraction: f64,
    pub retirement_tax_rate: f64,
    pub periods_per_year: f64,
}

impl WithdrawalAssumptions {
    pub fn new(
        pension_withdrawal_rate: f64,
        savings_withdrawal_rate: f64,
        tax_free_fraction: f64,
        retirement_tax_rate: f64,
        periods_per_year: f64,
    ) -> Result<Self, ConfigError> {
        check_rate("pension withdrawal rate", pension_withdrawal_rate)?;
        check_rate("savings withdrawal rate", savings_withdrawal_rate)?;
        check_rate("tax-free fraction", tax_free_fraction)?;
        check_rate("retirement tax rate", retirement_tax_rate)?;
        if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
            return Err(ConfigError::NonPositive("periods per year".to_string()));
        }
        Ok(Self {
            pension_withdrawal_rate,
            savings_withdrawal_rate,
            tax_free_fraction,
            retirement_tax_rate,
            periods_per_year,
        })
    }
}

impl Default for WithdrawalAssumptions {
    fn default() -> Self {
        Self {
            pension_withdrawal_rate: 0.04,
            savings_withdrawal_rate: 0.04,
            tax_free_fraction: 0.25,
            retirement_tax_rate: 0.20,
            periods_per_year: 12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub cash: f64,
    pub income: f64,
}

impl ScoringWeights {
    pub fn new(cash: f64, income: f64) -> Result<Self, ConfigError> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(cash) || !valid(income) || cash + income <= 0.0 {
            return Err(ConfigError::InvalidWeights);
        }
        Ok(Self { cash, income })
    }

    /// Rank on cash available only.
    pub fn cash_only() -> Self {
        Self {
            cash: 1.0,
            income: 0.0,
        }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            cash: 0.5,
            income: 0.5,
        }
    }
}

/// Every tunable constant the engine reads.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub tax: TaxSchedule,
    pub levy: LevySchedule,
    pub withdrawal: WithdrawalAssumptions,
    pub scoring: ScoringWeights,
    pub savings_policy: SavingsPolicy,
    pub one_off_tax_basis: OneOffTaxBasis,
}

impl EngineConfig {
    pub fn new(
        tax: TaxSchedule,
        levy: LevySchedule,
        withdrawal: WithdrawalAssumptions,
        scoring: ScoringWeights,
    ) -> Self {
        Self {
            tax,
            levy,
            withdrawal,
            scoring,
            savings_policy: SavingsPolicy::Capped,
            one_off_tax_basis: OneOffTaxBasis::Standalone,
        }
    }

    pub fn with_savings_policy(mut self, policy: SavingsPolicy) -> Self {
        self.savings_policy = policy;
        self
    }

    pub fn with_one_off_tax_basis(mut self, basis: OneOffTaxBasis) -> Self {
        self.one_off_tax_basis = basis;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(
            TaxSchedule::default(),
            LevySchedule::default(),
            WithdrawalAssumptions::default(),
            ScoringWeights::default(),
        )
    }
}

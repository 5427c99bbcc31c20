//! # Configuration
//!
//! Runtime options for the analytics pipeline. Every field has a default so a
//! caller can deserialize a partial JSON object and override only what it needs.

use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::portfolio::scenarios::DEFAULT_SCENARIOS;
use crate::quant::portfolio::types::MAX_DISPLAY_DECIMALS;
use crate::quant::portfolio::DuplicatePolicy;
use crate::quant::portfolio::SolverKind;

/// Options recognized by [`crate::quant::portfolio::PortfolioEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyticsConfig {
  /// Length of the price window handed to the estimator, in years.
  pub lookback_years: Option<u32>,
  /// Scenario count for the stochastic optimizer mode.
  pub num_scenarios: usize,
  /// Annual risk-free rate used in Sharpe ratios.
  pub risk_free_rate: f64,
  /// Monte Carlo trial count for VaR.
  pub simulations: usize,
  /// VaR holding period in trading days.
  pub holding_days: u32,
  /// VaR confidence level in `(0, 1)`.
  pub confidence_interval: f64,
  /// Per-asset weight cap `U`.
  pub weight_upper_bound: f64,
  /// Periods per year; scales mean and covariance for reporting.
  pub annualization_factor: f64,
  /// Portfolio notional used by the VaR engine.
  pub portfolio_value: f64,
  /// Decimal places for presentation weights. `None` disables rounding.
  pub display_decimals: Option<u32>,
  pub duplicate_policy: DuplicatePolicy,
  pub solver: SolverKind,
  pub max_iterations: u64,
  pub tolerance: f64,
  /// Fixed seed for reproducible runs. `None` draws from process entropy.
  pub seed: Option<u64>,
}

impl Default for AnalyticsConfig {
  fn default() -> Self {
    Self {
      lookback_years: None,
      num_scenarios: DEFAULT_SCENARIOS,
      risk_free_rate: 0.02,
      simulations: 100_000,
      holding_days: 5,
      confidence_interval: 0.95,
      weight_upper_bound: 1.0,
      annualization_factor: 252.0,
      portfolio_value: 10_000.0,
      display_decimals: None,
      duplicate_policy: DuplicatePolicy::Sum,
      solver: SolverKind::ProjectedGradient,
      max_iterations: 1000,
      tolerance: 1e-9,
      seed: None,
    }
  }
}

impl AnalyticsConfig {
  /// Reject values outside their valid domain with `InvalidParameter`.
  pub fn validate(&self) -> Result<()> {
    if let Some(0) = self.lookback_years {
      return Err(PortfolioError::invalid("lookbackYears", "must be >= 1"));
    }
    if self.num_scenarios == 0 {
      return Err(PortfolioError::invalid("numScenarios", "must be >= 1"));
    }
    if !self.risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid("riskFreeRate", "must be finite"));
    }
    if self.simulations == 0 {
      return Err(PortfolioError::invalid("simulations", "must be >= 1"));
    }
    if self.holding_days == 0 {
      return Err(PortfolioError::invalid("holdingDays", "must be >= 1"));
    }
    if !(self.confidence_interval > 0.0 && self.confidence_interval < 1.0) {
      return Err(PortfolioError::invalid(
        "confidenceInterval",
        format!("must lie in (0, 1), got {}", self.confidence_interval),
      ));
    }
    if !(self.weight_upper_bound > 0.0 && self.weight_upper_bound <= 1.0) {
      return Err(PortfolioError::invalid(
        "weightUpperBound",
        format!("must lie in (0, 1], got {}", self.weight_upper_bound),
      ));
    }
    if !(self.annualization_factor.is_finite() && self.annualization_factor > 0.0) {
      return Err(PortfolioError::invalid(
        "annualizationFactor",
        "must be finite and positive",
      ));
    }
    if !self.portfolio_value.is_finite() {
      return Err(PortfolioError::invalid("portfolioValue", "must be finite"));
    }
    if self.display_decimals.is_some_and(|d| d > MAX_DISPLAY_DECIMALS) {
      return Err(PortfolioError::invalid(
        "displayDecimals",
        format!("must be <= {MAX_DISPLAY_DECIMALS}"),
      ));
    }
    if self.max_iterations == 0 {
      return Err(PortfolioError::invalid("maxIterations", "must be >= 1"));
    }
    if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
      return Err(PortfolioError::invalid("tolerance", "must be finite and positive"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let cfg = AnalyticsConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.num_scenarios, DEFAULT_SCENARIOS);
    assert_eq!(cfg.simulations, 100_000);
    assert_eq!(cfg.holding_days, 5);
  }

  #[test]
  fn partial_json_keeps_defaults() {
    let cfg: AnalyticsConfig =
      serde_json::from_str(r#"{"weightUpperBound": 0.5, "solver": "nelder-mead"}"#).unwrap();
    assert_eq!(cfg.weight_upper_bound, 0.5);
    assert_eq!(cfg.solver, SolverKind::NelderMead);
    assert_eq!(cfg.risk_free_rate, 0.02);
    assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Sum);
  }

  #[test]
  fn rejects_out_of_domain_values() {
    let cfg = AnalyticsConfig {
      confidence_interval: 1.0,
      ..Default::default()
    };
    assert!(matches!(
      cfg.validate(),
      Err(PortfolioError::InvalidParameter { ref name, .. }) if name == "confidenceInterval"
    ));

    let cfg = AnalyticsConfig {
      holding_days: 0,
      ..Default::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = AnalyticsConfig {
      weight_upper_bound: 0.0,
      ..Default::default()
    };
    assert!(cfg.validate().is_err());
    let cfg = AnalyticsConfig {
      display_decimals: Some(400),
      ..Default::default()
    };
    assert!(matches!(
      cfg.validate(),
      Err(PortfolioError::InvalidParameter { ref name, .. }) if name == "displayDecimals"
    ));
  }
}

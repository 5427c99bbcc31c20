//! # Portfolio Metrics
//!
//! $$
//! \mu_p = A\,\mu^\top w,\qquad \sigma_p = \sqrt{A\,w^\top \Sigma w},\qquad S = \frac{\mu_p - r_f}{\sigma_p}
//! $$
//!
//! Expected return, volatility and Sharpe ratio of a weight vector, either from
//! moments or from a scenario set. `A` is the annualization factor; pass `1.0`
//! for per-period figures.

use ndarray::Array1;
use ndarray::Array2;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::stats::population_std;
use crate::stats::sample_mean;

/// Return/risk snapshot of one weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
}

fn check_len(what: &str, expected: usize, weights: &Array1<f64>) -> Result<()> {
  if weights.len() != expected {
    return Err(PortfolioError::invalid(
      "weights",
      format!("{} weights for {expected} {what}", weights.len()),
    ));
  }
  Ok(())
}

/// `dot(mean, w) * A`.
pub fn expected_return(mean: &Array1<f64>, weights: &Array1<f64>, annualization: f64) -> f64 {
  mean.dot(weights) * annualization
}

/// `wᵀ Σ w`.
pub fn portfolio_variance(covariance: &Array2<f64>, weights: &Array1<f64>) -> f64 {
  weights.dot(&covariance.dot(weights))
}

/// `sqrt(wᵀ Σ w * A)`. Round-off negatives are floored at zero.
pub fn volatility(covariance: &Array2<f64>, weights: &Array1<f64>, annualization: f64) -> f64 {
  (portfolio_variance(covariance, weights) * annualization)
    .max(0.0)
    .sqrt()
}

/// `(expected_return - risk_free) / volatility`; zero volatility is a
/// `DivisionError`.
pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free: f64) -> Result<f64> {
  if !(volatility > 0.0) || !volatility.is_finite() {
    return Err(PortfolioError::DivisionError(format!(
      "Sharpe ratio undefined for volatility {volatility}"
    )));
  }
  Ok((expected_return - risk_free) / volatility)
}

/// Metrics of `weights` under `(mean, covariance)`.
pub fn evaluate(
  mean: &Array1<f64>,
  covariance: &Array2<f64>,
  weights: &Array1<f64>,
  annualization: f64,
  risk_free: f64,
) -> Result<PortfolioMetrics> {
  check_len("assets", mean.len(), weights)?;
  if covariance.dim() != (mean.len(), mean.len()) {
    return Err(PortfolioError::invalid(
      "covariance",
      format!("shape {:?} does not match {} assets", covariance.dim(), mean.len()),
    ));
  }

  let expected_return = expected_return(mean, weights, annualization);
  let volatility = volatility(covariance, weights, annualization);
  let sharpe_ratio = sharpe_ratio(expected_return, volatility, risk_free)?;

  Ok(PortfolioMetrics {
    expected_return,
    volatility,
    sharpe_ratio,
  })
}

/// Portfolio return of every scenario row.
pub fn scenario_returns(scenarios: &Array2<f64>, weights: &Array1<f64>) -> Result<Vec<f64>> {
  check_len("scenario columns", scenarios.ncols(), weights)?;
  Ok(scenarios.dot(weights).to_vec())
}

/// Metrics of `weights` over a scenario set: sample mean and population
/// standard deviation of the portfolio returns, annualized by `A` and `√A`.
pub fn evaluate_scenarios(
  scenarios: &Array2<f64>,
  weights: &Array1<f64>,
  annualization: f64,
  risk_free: f64,
) -> Result<PortfolioMetrics> {
  let returns = scenario_returns(scenarios, weights)?;
  if returns.is_empty() {
    return Err(PortfolioError::invalid("numScenarios", "scenario set is empty"));
  }

  let m = sample_mean(&returns);
  let expected_return = m * annualization;
  let volatility = population_std(&returns, m) * annualization.sqrt();
  let sharpe_ratio = sharpe_ratio(expected_return, volatility, risk_free)?;

  Ok(PortfolioMetrics {
    expected_return,
    volatility,
    sharpe_ratio,
  })
}

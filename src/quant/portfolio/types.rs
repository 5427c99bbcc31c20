//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums and result containers for portfolio optimization.

use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;

/// Most decimal places [`OptimizationResult::display_weights`] will round to.
pub const MAX_DISPLAY_DECIMALS: u32 = 12;

/// Source of the moments the Sharpe objective is evaluated on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationMode {
  /// Sample mean and covariance of historical log returns.
  #[default]
  Historical,
  /// Multivariate-normal scenarios drawn from the (repaired) historical moments.
  Stochastic,
}

/// Output of a Sharpe optimization run.
///
/// Metrics are computed from the unrounded optimal weights; use
/// [`OptimizationResult::display_weights`] for presentation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
  /// `(ticker, weight)` in input order. Serialized as a `{ticker: weight}`
  /// object with the same key order.
  #[serde(serialize_with = "weights_as_map")]
  pub weights: Vec<(String, f64)>,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
  pub mode: OptimizationMode,
  /// Solver iterations; zero when no solve was needed.
  pub iterations: u64,
  pub termination: String,
  /// Whether the covariance estimate had to be projected onto the PSD cone.
  pub covariance_repaired: bool,
}

impl OptimizationResult {
  /// Weights rounded to `decimals` (capped at [`MAX_DISPLAY_DECIMALS`]),
  /// rescaled by their sum only when rounding pushed it above one.
  pub fn display_weights(&self, decimals: u32) -> Vec<(String, f64)> {
    let scale = 10_f64.powi(decimals.min(MAX_DISPLAY_DECIMALS) as i32);
    let rounded: Vec<(String, f64)> = self
      .weights
      .iter()
      .map(|(t, w)| (t.clone(), (w * scale).round() / scale))
      .collect();

    let total: f64 = rounded.iter().map(|(_, w)| w).sum();
    if total > 1.0 {
      rounded.into_iter().map(|(t, w)| (t, w / total)).collect()
    } else {
      rounded
    }
  }
}

/// Serialize ordered `(ticker, weight)` pairs as a JSON object.
pub fn weights_as_map<S: Serializer>(
  weights: &[(String, f64)],
  serializer: S,
) -> Result<S::Ok, S::Error> {
  serializer.collect_map(weights.iter().map(|(t, w)| (t, w)))
}

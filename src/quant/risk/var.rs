//! # Monte Carlo Value-at-Risk
//!
//! $$
//! \mathrm{PnL} = V\mu d + V\sigma\sqrt d\,Z,\qquad Z\sim\mathcal N(0,1),\qquad
//! \mathrm{VaR}_c = -Q_{100(1-c)}(\mathrm{PnL})
//! $$
//!
//! Single-factor normal-shock simulation of the holding-period P&L of a
//! portfolio with per-period expected return `μ` and volatility `σ`.
//!
//! Source:
//! - Jorion, P., *Value at Risk*, 3rd ed., ch. 12

use impl_new_derive::ImplNew;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::portfolio::scenarios::stream_seed;
use crate::stats::percentile;
use crate::stats::sample_mean;

const CHUNK: usize = 8192;

/// Simulation parameters. `expected_return` and `volatility` are per period.
#[derive(Clone, Copy, Debug, ImplNew)]
pub struct MonteCarloVar {
  pub portfolio_value: f64,
  pub expected_return: f64,
  pub volatility: f64,
  pub holding_days: u32,
  pub simulations: usize,
  pub confidence: f64,
}

/// Simulated P&L distribution and the risk figures read off it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaRResult {
  /// Loss not exceeded with probability `confidence`; positive means a loss.
  pub var: f64,
  /// Mean loss over the trials at or beyond the VaR quantile.
  pub expected_shortfall: f64,
  pub confidence: f64,
  pub holding_days: u32,
  /// Per-period expected return fed to the simulation.
  pub expected_return: f64,
  /// Per-period volatility fed to the simulation.
  pub volatility: f64,
  /// P&L of every trial, in trial order.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub scenarios: Vec<f64>,
}

impl MonteCarloVar {
  pub fn validate(&self) -> Result<()> {
    if !(self.confidence > 0.0 && self.confidence < 1.0) {
      return Err(PortfolioError::invalid(
        "confidenceInterval",
        format!("must lie in (0, 1), got {}", self.confidence),
      ));
    }
    if self.holding_days == 0 {
      return Err(PortfolioError::invalid("holdingDays", "must be >= 1"));
    }
    if self.simulations == 0 {
      return Err(PortfolioError::invalid("simulations", "must be >= 1"));
    }
    if !self.portfolio_value.is_finite() {
      return Err(PortfolioError::invalid("portfolioValue", "must be finite"));
    }
    if !self.expected_return.is_finite() {
      return Err(PortfolioError::invalid("expectedReturn", "must be finite"));
    }
    if !(self.volatility.is_finite() && self.volatility >= 0.0) {
      return Err(PortfolioError::invalid(
        "volatility",
        format!("must be finite and non-negative, got {}", self.volatility),
      ));
    }
    Ok(())
  }

  /// Holding-period P&L for a standard normal shock `z`.
  pub fn pnl(&self, z: f64) -> f64 {
    let days = self.holding_days as f64;
    self.portfolio_value * self.expected_return * days
      + self.portfolio_value * self.volatility * z * days.sqrt()
  }

  /// Run the simulation. Trials are split into chunks drawn in parallel,
  /// each on its own stream seeded from one draw of `rng`.
  pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R, cancel: Option<&CancelToken>) -> Result<VaRResult> {
    self.validate()?;

    let n = self.simulations;
    let base: u64 = rng.gen();
    let chunks: Vec<Vec<f64>> = (0..n.div_ceil(CHUNK))
      .into_par_iter()
      .map(|c| {
        if let Some(token) = cancel {
          token.check()?;
        }
        let trials = CHUNK.min(n - c * CHUNK);
        let mut stream = StdRng::seed_from_u64(stream_seed(base, c));
        Ok(
          (0..trials)
            .map(|_| self.pnl(StandardNormal.sample(&mut stream)))
            .collect(),
        )
      })
      .collect::<Result<_>>()?;

    let scenarios: Vec<f64> = chunks.into_iter().flatten().collect();
    let (var, expected_shortfall) = var_from_pnl(&scenarios, self.confidence)?;
    debug!(
      var,
      expected_shortfall,
      simulations = n,
      confidence = self.confidence,
      "monte carlo var"
    );

    Ok(VaRResult {
      var,
      expected_shortfall,
      confidence: self.confidence,
      holding_days: self.holding_days,
      expected_return: self.expected_return,
      volatility: self.volatility,
      scenarios,
    })
  }

  /// Closed-form normal VaR for the same inputs; the simulated figure
  /// converges to it as the trial count grows.
  pub fn parametric(&self) -> Result<f64> {
    self.validate()?;
    parametric_var(
      self.portfolio_value,
      self.expected_return,
      self.volatility,
      self.holding_days,
      self.confidence,
    )
  }
}

/// `(VaR, expected shortfall)` of a P&L sample at confidence `c`.
pub fn var_from_pnl(pnl: &[f64], confidence: f64) -> Result<(f64, f64)> {
  if pnl.is_empty() {
    return Err(PortfolioError::invalid("simulations", "P&L sample is empty"));
  }
  if !(confidence > 0.0 && confidence < 1.0) {
    return Err(PortfolioError::invalid(
      "confidenceInterval",
      format!("must lie in (0, 1), got {confidence}"),
    ));
  }

  let mut sorted = pnl.to_vec();
  sorted.sort_by(|a, b| a.total_cmp(b));
  let cutoff = percentile(&sorted, 100.0 * (1.0 - confidence));

  let tail: Vec<f64> = sorted.iter().copied().take_while(|&x| x <= cutoff).collect();
  let shortfall = if tail.is_empty() {
    -cutoff
  } else {
    -sample_mean(&tail)
  };

  Ok((-cutoff, shortfall))
}

/// `-(Vμd + Vσ√d Φ⁻¹(1-c))`.
pub fn parametric_var(
  portfolio_value: f64,
  expected_return: f64,
  volatility: f64,
  holding_days: u32,
  confidence: f64,
) -> Result<f64> {
  let std_normal =
    Normal::new(0.0, 1.0).map_err(|e| PortfolioError::invalid("confidenceInterval", e.to_string()))?;
  let z = std_normal.inverse_cdf(1.0 - confidence);
  let days = holding_days as f64;
  Ok(-(portfolio_value * expected_return * days + portfolio_value * volatility * days.sqrt() * z))
}

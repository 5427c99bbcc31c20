//! # Sharpe Optimizer
//!
//! $$
//! \max_{\mathbf w}\ \frac{A\,\mu^\top\mathbf w-r_f}{\sqrt{A\,\mathbf w^\top\Sigma\mathbf w}}
//! \quad\text{s.t.}\quad 0\le w_i\le U,\ \ \mathbf 1^\top\mathbf w=1
//! $$
//!
//! Long-only maximum-Sharpe allocation on the capped simplex. Historical mode
//! uses the estimated moments directly; stochastic mode evaluates the ratio on
//! a scenario set. The scenario objective is exactly the moment objective
//! under the scenario column means and population covariance, so both share
//! one closed-form gradient.

use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use tracing::debug;

use super::covariance::ensure_psd;
use super::metrics::evaluate;
use super::metrics::evaluate_scenarios;
use super::metrics::PortfolioMetrics;
use super::solver::Bounds;
use super::solver::Constraint;
use super::solver::Objective;
use super::solver::Solver;
use super::types::OptimizationMode;
use super::types::OptimizationResult;
use crate::error::PortfolioError;
use crate::error::Result;

/// Negative Sharpe ratio of `(mean, covariance)` as a minimization target.
#[derive(Clone, Debug)]
pub struct SharpeObjective {
  mean: Array1<f64>,
  covariance: Array2<f64>,
  annualization: f64,
  risk_free: f64,
}

impl SharpeObjective {
  pub fn new(mean: Array1<f64>, covariance: Array2<f64>, annualization: f64, risk_free: f64) -> Self {
    Self {
      mean,
      covariance,
      annualization,
      risk_free,
    }
  }

  /// Objective over scenario rows: column means and population covariance.
  pub fn from_scenarios(scenarios: &Array2<f64>, annualization: f64, risk_free: f64) -> Result<Self> {
    let n = scenarios.nrows();
    let mean = scenarios
      .mean_axis(Axis(0))
      .ok_or_else(|| PortfolioError::invalid("numScenarios", "scenario set is empty"))?;
    let centered = scenarios - &mean;
    let covariance = centered.t().dot(&centered) / n as f64;
    Ok(Self::new(mean, covariance, annualization, risk_free))
  }

  /// `(excess return, volatility, Σw)` at `x`.
  fn parts(&self, x: &[f64]) -> (f64, f64, Array1<f64>) {
    let w = ArrayView1::from(x);
    let sigma_w = self.covariance.dot(&w);
    let excess = self.annualization * self.mean.dot(&w) - self.risk_free;
    let vol = (self.annualization * w.dot(&sigma_w)).max(0.0).sqrt();
    (excess, vol, sigma_w)
  }
}

impl Objective for SharpeObjective {
  fn value(&self, x: &[f64]) -> f64 {
    let (excess, vol, _) = self.parts(x);
    if vol > 0.0 {
      -excess / vol
    } else {
      f64::INFINITY
    }
  }

  // -dS/dw = -(A mu / vol - excess * A Σw / vol^3)
  fn gradient(&self, x: &[f64]) -> Vec<f64> {
    let (excess, vol, sigma_w) = self.parts(x);
    if !(vol > 0.0) {
      return vec![f64::NAN; x.len()];
    }
    let a = self.annualization;
    let vol3 = vol * vol * vol;
    self
      .mean
      .iter()
      .zip(sigma_w.iter())
      .map(|(m, s)| -(a * m / vol - excess * a * s / vol3))
      .collect()
  }
}

/// Problem-level knobs shared by both modes.
#[derive(Clone, Copy, Debug, ImplNew)]
pub struct OptimizerSettings {
  /// Per-asset weight cap `U`.
  pub upper_bound: f64,
  pub annualization_factor: f64,
  pub risk_free_rate: f64,
}

impl OptimizerSettings {
  fn validate(&self, n_assets: usize) -> Result<()> {
    let u = self.upper_bound;
    if !(u > 0.0 && u <= 1.0) {
      return Err(PortfolioError::invalid(
        "weightUpperBound",
        format!("must be in (0, 1], got {u}"),
      ));
    }
    if (n_assets as f64) * u < 1.0 - 1e-12 {
      return Err(PortfolioError::invalid(
        "weightUpperBound",
        format!("{n_assets} assets capped at {u} cannot sum to 1"),
      ));
    }
    if !(self.annualization_factor > 0.0) || !self.annualization_factor.is_finite() {
      return Err(PortfolioError::invalid("annualizationFactor", "must be positive"));
    }
    if !self.risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid("riskFreeRate", "must be finite"));
    }
    Ok(())
  }
}

fn check_tickers(tickers: &[String], n: usize) -> Result<()> {
  if n == 0 {
    return Err(PortfolioError::invalid("tickers", "no assets to optimize"));
  }
  if tickers.len() != n {
    return Err(PortfolioError::invalid(
      "tickers",
      format!("{} tickers for {n} assets", tickers.len()),
    ));
  }
  Ok(())
}

fn solve(
  tickers: &[String],
  objective: &SharpeObjective,
  settings: &OptimizerSettings,
  solver: &dyn Solver,
  mode: OptimizationMode,
  metrics: impl Fn(&Array1<f64>) -> Result<PortfolioMetrics>,
) -> Result<OptimizationResult> {
  let n = tickers.len();
  settings.validate(n)?;

  let (weights, iterations, termination) = if n == 1 {
    (Array1::from_elem(1, 1.0), 0, "single asset".to_string())
  } else {
    let initial = vec![1.0 / n as f64; n];
    if !objective.value(&initial).is_finite() {
      return Err(PortfolioError::DivisionError(
        "portfolio volatility is zero at equal weights".into(),
      ));
    }
    let sol = solver.minimize(
      objective,
      &initial,
      &Bounds::uniform(n, 0.0, settings.upper_bound),
      &[Constraint::WeightSum(1.0)],
    )?;
    debug!(
      ?mode,
      iterations = sol.iterations,
      sharpe = -sol.value,
      "sharpe optimization converged"
    );
    (Array1::from_vec(sol.x), sol.iterations, sol.termination)
  };

  let m = metrics(&weights)?;
  Ok(OptimizationResult {
    weights: tickers.iter().cloned().zip(weights.iter().copied()).collect(),
    expected_return: m.expected_return,
    volatility: m.volatility,
    sharpe_ratio: m.sharpe_ratio,
    mode,
    iterations,
    termination,
    covariance_repaired: false,
  })
}

/// Maximum-Sharpe weights from per-period moments. A covariance that is not
/// PSD is projected to the nearest PSD matrix first and the result is flagged
/// `covariance_repaired`.
pub fn optimize_historical(
  tickers: &[String],
  mean: &Array1<f64>,
  covariance: &Array2<f64>,
  settings: &OptimizerSettings,
  solver: &dyn Solver,
) -> Result<OptimizationResult> {
  check_tickers(tickers, mean.len())?;
  if covariance.dim() != (mean.len(), mean.len()) {
    return Err(PortfolioError::invalid(
      "covariance",
      format!("shape {:?} does not match {} assets", covariance.dim(), mean.len()),
    ));
  }

  let repaired = ensure_psd(covariance)?;
  let objective = SharpeObjective::new(
    mean.clone(),
    repaired.matrix.clone(),
    settings.annualization_factor,
    settings.risk_free_rate,
  );
  let mut result = solve(
    tickers,
    &objective,
    settings,
    solver,
    OptimizationMode::Historical,
    |w| {
      evaluate(
        mean,
        &repaired.matrix,
        w,
        settings.annualization_factor,
        settings.risk_free_rate,
      )
    },
  )?;
  result.covariance_repaired = repaired.repaired;
  Ok(result)
}

/// Maximum-Sharpe weights over a per-period scenario set (`n_scenarios x n_assets`).
pub fn optimize_stochastic(
  tickers: &[String],
  scenarios: &Array2<f64>,
  settings: &OptimizerSettings,
  solver: &dyn Solver,
) -> Result<OptimizationResult> {
  check_tickers(tickers, scenarios.ncols())?;
  let objective = SharpeObjective::from_scenarios(
    scenarios,
    settings.annualization_factor,
    settings.risk_free_rate,
  )?;
  solve(
    tickers,
    &objective,
    settings,
    solver,
    OptimizationMode::Stochastic,
    |w| {
      evaluate_scenarios(
        scenarios,
        w,
        settings.annualization_factor,
        settings.risk_free_rate,
      )
    },
  )
}

//! # Portfolio Engine
//!
//! $$
//! \text{prices}\ \to\ (\hat\mu, \hat\Sigma)\ \to\ \tilde\Sigma\ \to\ \mathbf w^\*,\qquad
//! (\hat\mu, \hat\Sigma, \mathbf w)\ \to\ \mathrm{VaR}
//! $$
//!
//! High-level orchestration API: one configured engine runs the optimization
//! and VaR pipelines over caller-supplied price histories. It holds no mutable
//! state, so a single engine can serve many requests concurrently.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::info;

use super::covariance::ensure_psd;
use super::data::aggregate_holdings;
use super::data::estimate_moments;
use super::data::normalize_holdings;
use super::data::Holding;
use super::data::MomentEstimate;
use super::data::PriceSeries;
use super::metrics::expected_return;
use super::metrics::volatility;
use super::optimizers::optimize_historical;
use super::optimizers::optimize_stochastic;
use super::optimizers::OptimizerSettings;
use super::scenarios::stream_seed;
use super::scenarios::ScenarioGenerator;
use super::types::OptimizationMode;
use super::types::OptimizationResult;
use crate::cancel::CancelToken;
use crate::config::AnalyticsConfig;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::quant::risk::MonteCarloVar;
use crate::quant::risk::VaRResult;

/// One independent optimization request for [`PortfolioEngine::optimize_batch`].
#[derive(Clone, Debug)]
pub struct OptimizationRequest {
  pub prices: Vec<PriceSeries>,
  /// Falls back to the configured rate when `None`.
  pub risk_free_rate: Option<f64>,
  pub mode: OptimizationMode,
}

/// Single entry-point engine for optimization and VaR workflows.
#[derive(Clone, Debug)]
pub struct PortfolioEngine {
  config: AnalyticsConfig,
}

impl PortfolioEngine {
  /// Construct an engine; the configuration is validated once here.
  pub fn new(config: AnalyticsConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &AnalyticsConfig {
    &self.config
  }

  /// Random source for a single call: seeded when the configuration carries a
  /// seed, entropy-seeded otherwise.
  pub fn rng(&self) -> StdRng {
    self.request_rng(0)
  }

  fn request_rng(&self, index: usize) -> StdRng {
    match self.config.seed {
      Some(seed) => StdRng::seed_from_u64(stream_seed(seed, index)),
      None => StdRng::from_entropy(),
    }
  }

  fn window(&self, prices: &[PriceSeries]) -> Vec<PriceSeries> {
    match self.config.lookback_years {
      Some(years) => prices.iter().map(|p| p.trailing_years(years)).collect(),
      None => prices.to_vec(),
    }
  }

  /// Per-period moments of the configured look-back window. Repeated tickers
  /// follow the configured duplicate policy.
  pub fn estimate(&self, prices: &[PriceSeries]) -> Result<MomentEstimate> {
    estimate_moments(
      &self.window(prices),
      self.config.annualization_factor,
      self.config.duplicate_policy,
    )
  }

  /// Maximum-Sharpe weights for `prices` at `risk_free_rate`.
  pub fn optimize<R: Rng + ?Sized>(
    &self,
    prices: &[PriceSeries],
    risk_free_rate: f64,
    mode: OptimizationMode,
    rng: &mut R,
    cancel: Option<&CancelToken>,
  ) -> Result<OptimizationResult> {
    let moments = self.estimate(prices)?;
    let settings = OptimizerSettings::new(
      self.config.weight_upper_bound,
      self.config.annualization_factor,
      risk_free_rate,
    );
    let solver = self
      .config
      .solver
      .build(self.config.max_iterations, self.config.tolerance, cancel.cloned());

    info!(
      assets = moments.n_assets(),
      observations = moments.observations,
      ?mode,
      "optimizing portfolio"
    );

    match mode {
      OptimizationMode::Historical => optimize_historical(
        &moments.tickers,
        &moments.mean,
        &moments.covariance,
        &settings,
        solver.as_ref(),
      ),
      OptimizationMode::Stochastic => {
        let repaired = ensure_psd(&moments.covariance)?;
        let scenarios = ScenarioGenerator::new(&moments.mean, &repaired.matrix)?.sample(
          self.config.num_scenarios,
          rng,
          cancel,
        )?;
        let mut result =
          optimize_stochastic(&moments.tickers, &scenarios, &settings, solver.as_ref())?;
        result.covariance_repaired = repaired.repaired;
        Ok(result)
      }
    }
  }

  /// Serve independent requests on the rayon pool. Each request gets its own
  /// random stream; results come back in request order.
  pub fn optimize_batch(
    &self,
    requests: &[OptimizationRequest],
    cancel: Option<&CancelToken>,
  ) -> Vec<Result<OptimizationResult>> {
    requests
      .par_iter()
      .enumerate()
      .map(|(i, req)| {
        let mut rng = self.request_rng(i);
        let rate = req.risk_free_rate.unwrap_or(self.config.risk_free_rate);
        self.optimize(&req.prices, rate, req.mode, &mut rng, cancel)
      })
      .collect()
  }

  /// Monte Carlo VaR of a portfolio over `prices`.
  ///
  /// With `holdings`, duplicates are collapsed per the configured policy,
  /// non-positive positions dropped and the rest normalized; every remaining
  /// ticker must have a price series. Without holdings all distinct assets
  /// are equally weighted.
  pub fn value_at_risk<R: Rng + ?Sized>(
    &self,
    prices: &[PriceSeries],
    holdings: Option<&[Holding]>,
    rng: &mut R,
    cancel: Option<&CancelToken>,
  ) -> Result<VaRResult> {
    let (series, weights) = match holdings {
      Some(h) => {
        let positions = normalize_holdings(&aggregate_holdings(h, self.config.duplicate_policy)?)?;
        let mut series = Vec::with_capacity(positions.len());
        for p in &positions {
          let s = prices
            .iter()
            .find(|s| s.ticker() == p.ticker)
            .ok_or_else(|| PortfolioError::InvalidTicker {
              ticker: p.ticker.clone(),
            })?;
          series.push(s.clone());
        }
        let weights: Vec<f64> = positions.iter().map(|p| p.weight).collect();
        (series, Some(weights))
      }
      None => (prices.to_vec(), None),
    };

    let moments = self.estimate(&series)?;
    let n = moments.n_assets();
    let w = Array1::from_vec(weights.unwrap_or_else(|| vec![1.0 / n as f64; n]));
    let mu = expected_return(&moments.mean, &w, 1.0);
    let sigma = volatility(&moments.covariance, &w, 1.0);

    info!(
      assets = moments.n_assets(),
      mu,
      sigma,
      simulations = self.config.simulations,
      "simulating portfolio P&L"
    );

    MonteCarloVar::new(
      self.config.portfolio_value,
      mu,
      sigma,
      self.config.holding_days,
      self.config.simulations,
      self.config.confidence_interval,
    )
    .simulate(rng, cancel)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::Duration;
  use chrono::NaiveDate;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;
  use crate::quant::portfolio::DuplicatePolicy;

  fn synthetic(ticker: &str, drift: f64, vol: f64, days: usize, seed: u64) -> PriceSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let shock = Normal::new(drift, vol).unwrap();
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let mut price = 100.0;
    let points = (0..days)
      .map(|i| {
        if i > 0 {
          price *= f64::exp(shock.sample(&mut rng));
        }
        (start + Duration::days(i as i64), price)
      })
      .collect();
    PriceSeries::new(ticker, points).unwrap()
  }

  fn universe() -> Vec<PriceSeries> {
    vec![
      synthetic("AAA", 0.0008, 0.015, 600, 1),
      synthetic("BBB", 0.0003, 0.010, 600, 2),
      synthetic("CCC", 0.0005, 0.020, 600, 3),
    ]
  }

  fn engine(config: AnalyticsConfig) -> PortfolioEngine {
    PortfolioEngine::new(config).unwrap()
  }

  #[test]
  fn historical_optimization_is_feasible() {
    let eng = engine(AnalyticsConfig {
      weight_upper_bound: 0.5,
      ..Default::default()
    });
    let r = eng
      .optimize(&universe(), 0.02, OptimizationMode::Historical, &mut eng.rng(), None)
      .unwrap();

    let total: f64 = r.weights.iter().map(|(_, w)| w).sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
    assert!(r.weights.iter().all(|(_, w)| *w <= 0.5 + 1e-12));
    assert_eq!(r.weights[0].0, "AAA");
  }

  #[test]
  fn seeded_stochastic_runs_are_reproducible() {
    let eng = engine(AnalyticsConfig {
      seed: Some(9),
      ..Default::default()
    });
    let a = eng
      .optimize(&universe(), 0.02, OptimizationMode::Stochastic, &mut eng.rng(), None)
      .unwrap();
    let b = eng
      .optimize(&universe(), 0.02, OptimizationMode::Stochastic, &mut eng.rng(), None)
      .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.mode, OptimizationMode::Stochastic);
  }

  #[test]
  fn batch_preserves_request_order() {
    let eng = engine(AnalyticsConfig {
      seed: Some(1),
      ..Default::default()
    });
    let prices = universe();
    let requests = vec![
      OptimizationRequest {
        prices: prices.clone(),
        risk_free_rate: None,
        mode: OptimizationMode::Historical,
      },
      OptimizationRequest {
        prices: prices[..1].to_vec(),
        risk_free_rate: Some(0.0),
        mode: OptimizationMode::Historical,
      },
      OptimizationRequest {
        prices: Vec::new(),
        risk_free_rate: None,
        mode: OptimizationMode::Historical,
      },
    ];

    let out = eng.optimize_batch(&requests, None);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].as_ref().unwrap().weights.len(), 3);
    assert_eq!(out[1].as_ref().unwrap().weights, vec![("AAA".to_string(), 1.0)]);
    assert!(out[2].is_err());
  }

  #[test]
  fn var_uses_holdings_when_given() {
    let eng = engine(AnalyticsConfig {
      simulations: 20_000,
      ..Default::default()
    });
    let prices = universe();
    let holdings = [
      Holding::new("BBB", 1.0),
      Holding::new("BBB", 1.0),
      Holding::new("AAA", 2.0),
      Holding::new("CCC", 0.0),
    ];

    let r = eng
      .value_at_risk(&prices, Some(&holdings), &mut StdRng::seed_from_u64(5), None)
      .unwrap();

    let moments = eng.estimate(&prices[..2]).unwrap();
    // BBB and AAA at 50% each after summing duplicates.
    let w = ndarray::array![0.5, 0.5];
    assert_abs_diff_eq!(r.expected_return, moments.mean.dot(&w), epsilon = 1e-12);
    assert_eq!(r.scenarios.len(), 20_000);
    assert_eq!(r.holding_days, 5);
    assert!(r.var > 0.0);
  }

  #[test]
  fn var_rejects_unknown_holdings() {
    let eng = engine(AnalyticsConfig::default());
    let res = eng.value_at_risk(
      &universe(),
      Some(&[Holding::new("ZZZ", 1.0)]),
      &mut StdRng::seed_from_u64(5),
      None,
    );
    assert!(matches!(res, Err(PortfolioError::InvalidTicker { .. })));
  }

  #[test]
  fn lookback_trims_history() {
    let eng = engine(AnalyticsConfig {
      lookback_years: Some(1),
      ..Default::default()
    });
    let m = eng.estimate(&universe()).unwrap();
    assert!(m.observations <= 365);
  }

  #[test]
  fn invalid_config_is_rejected() {
    let res = PortfolioEngine::new(AnalyticsConfig {
      simulations: 0,
      ..Default::default()
    });
    assert!(matches!(res, Err(PortfolioError::InvalidParameter { .. })));
  }

  #[test]
  fn repeated_price_series_follow_the_configured_policy() {
    let prices = universe();
    let repeated = [prices[0].clone(), prices[1].clone(), prices[0].clone()];

    let eng = engine(AnalyticsConfig::default());
    let r = eng
      .optimize(&repeated, 0.02, OptimizationMode::Historical, &mut eng.rng(), None)
      .unwrap();
    let tickers: Vec<&str> = r.weights.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(tickers, ["AAA", "BBB"]);
    let total: f64 = r.weights.iter().map(|(_, w)| w).sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);

    let var = eng
      .value_at_risk(&repeated, None, &mut StdRng::seed_from_u64(4), None)
      .unwrap();
    let moments = eng.estimate(&prices[..2]).unwrap();
    assert_abs_diff_eq!(
      var.expected_return,
      moments.mean.dot(&ndarray::array![0.5, 0.5]),
      epsilon = 1e-12
    );

    let strict = engine(AnalyticsConfig {
      duplicate_policy: DuplicatePolicy::Reject,
      ..Default::default()
    });
    let res = strict.optimize(&repeated, 0.02, OptimizationMode::Historical, &mut strict.rng(), None);
    assert!(matches!(res, Err(PortfolioError::InvalidParameter { ref name, .. }) if name == "prices"));
  }

  #[test]
  fn sample_covariance_needs_no_repair() {
    let eng = engine(AnalyticsConfig {
      seed: Some(3),
      ..Default::default()
    });
    for mode in [OptimizationMode::Historical, OptimizationMode::Stochastic] {
      let r = eng
        .optimize(&universe(), 0.02, mode, &mut eng.rng(), None)
        .unwrap();
      assert!(!r.covariance_repaired, "{mode:?}");
    }
  }

  #[test]
  fn cancelled_token_stops_the_pipeline() {
    let eng = engine(AnalyticsConfig::default());
    let token = CancelToken::new();
    token.cancel();
    let res = eng.optimize(
      &universe(),
      0.02,
      OptimizationMode::Historical,
      &mut eng.rng(),
      Some(&token),
    );
    assert!(matches!(res, Err(PortfolioError::Cancelled(_))));
  }
}

use approx::assert_abs_diff_eq;
use chrono::Duration;
use chrono::NaiveDate;
use ndarray::array;
use portfolio_engine::quant::portfolio::estimate_moments;
use portfolio_engine::quant::portfolio::evaluate;
use portfolio_engine::quant::portfolio::DuplicatePolicy;
use portfolio_engine::quant::portfolio::Holding;
use portfolio_engine::quant::portfolio::SolverKind;
use portfolio_engine::AnalyticsConfig;
use portfolio_engine::CancelToken;
use portfolio_engine::OptimizationMode;
use portfolio_engine::PortfolioEngine;
use portfolio_engine::PortfolioError;
use portfolio_engine::PriceSeries;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;

fn walk(ticker: &str, drift: f64, vol: f64, days: usize, seed: u64) -> PriceSeries {
  let mut rng = StdRng::seed_from_u64(seed);
  let shock = Normal::new(drift, vol).unwrap();
  let start = NaiveDate::from_ymd_opt(2019, 3, 1).unwrap();
  let mut price = 50.0;
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
    walk("EQ1", 0.0007, 0.018, 750, 10),
    walk("EQ2", 0.0004, 0.012, 750, 20),
    walk("BND", 0.0002, 0.004, 750, 30),
    walk("CMD", 0.0003, 0.022, 750, 40),
  ]
}

#[test]
fn worked_example_metrics() {
  let m = evaluate(
    &array![0.001, 0.0005],
    &array![[0.0004, 0.0001], [0.0001, 0.0002]],
    &array![0.6, 0.4],
    252.0,
    0.02,
  )
  .unwrap();

  assert_abs_diff_eq!(m.expected_return, 0.2016, epsilon = 1e-12);
  assert_abs_diff_eq!(m.volatility, 0.2376, epsilon = 1e-4);
  assert_abs_diff_eq!(m.sharpe_ratio, 0.764, epsilon = 1e-3);
}

#[test]
fn optimization_end_to_end() {
  let prices = universe();
  for solver in [SolverKind::ProjectedGradient, SolverKind::NelderMead] {
    for mode in [OptimizationMode::Historical, OptimizationMode::Stochastic] {
      let engine = PortfolioEngine::new(AnalyticsConfig {
        weight_upper_bound: 0.5,
        seed: Some(2024),
        solver,
        max_iterations: 5000,
        ..Default::default()
      })
      .unwrap();

      let r = engine
        .optimize(&prices, 0.02, mode, &mut engine.rng(), None)
        .unwrap_or_else(|e| panic!("{solver:?} / {mode:?}: {e}"));

      let total: f64 = r.weights.iter().map(|(_, w)| w).sum();
      assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
      assert!(r.weights.iter().all(|(_, w)| *w >= -1e-12 && *w <= 0.5 + 1e-12));
      assert_eq!(r.mode, mode);
      assert!(!r.covariance_repaired);

      let tickers: Vec<&str> = r.weights.iter().map(|(t, _)| t.as_str()).collect();
      assert_eq!(tickers, ["EQ1", "EQ2", "BND", "CMD"]);

      // Presentation rounding leaves the solved metrics alone.
      let shown = r.display_weights(2);
      let shown_total: f64 = shown.iter().map(|(_, w)| w).sum();
      assert!(shown_total <= 1.0 + 1e-12);
    }
  }
}

#[test]
fn historical_solution_beats_equal_weights() {
  let prices = universe();
  let engine = PortfolioEngine::new(AnalyticsConfig::default()).unwrap();
  let r = engine
    .optimize(&prices, 0.02, OptimizationMode::Historical, &mut engine.rng(), None)
    .unwrap();

  let moments = estimate_moments(&prices, 252.0, DuplicatePolicy::Sum).unwrap();
  let equal = evaluate(
    &moments.mean,
    &moments.covariance,
    &ndarray::Array1::from_elem(4, 0.25),
    252.0,
    0.02,
  )
  .unwrap();
  assert!(r.sharpe_ratio >= equal.sharpe_ratio - 1e-12);
}

#[test]
fn var_end_to_end() {
  let prices = universe();
  let holdings = [
    Holding::new("EQ1", 3.0),
    Holding::new("BND", 1.0),
    Holding::new("EQ1", 1.0),
  ];

  let run = |confidence: f64| {
    let engine = PortfolioEngine::new(AnalyticsConfig {
      confidence_interval: confidence,
      simulations: 50_000,
      ..Default::default()
    })
    .unwrap();
    engine
      .value_at_risk(&prices, Some(&holdings), &mut StdRng::seed_from_u64(77), None)
      .unwrap()
  };

  let v95 = run(0.95);
  let v99 = run(0.99);
  assert!(v99.var > v95.var);
  assert_eq!(v95.scenarios.len(), 50_000);
  assert!(v95.expected_shortfall >= v95.var);
}

#[test]
fn short_or_empty_history_is_rejected() {
  let engine = PortfolioEngine::new(AnalyticsConfig::default()).unwrap();
  let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

  let one_point = vec![
    walk("EQ1", 0.0, 0.01, 30, 1),
    PriceSeries::new("NEW", vec![(day, 10.0)]).unwrap(),
  ];
  let res = engine.optimize(&one_point, 0.02, OptimizationMode::Historical, &mut engine.rng(), None);
  assert!(matches!(res, Err(PortfolioError::InsufficientData { ref ticker, .. }) if ticker == "NEW"));

  let empty = vec![walk("EQ1", 0.0, 0.01, 30, 1), PriceSeries::new("GONE", vec![]).unwrap()];
  let res = engine.optimize(&empty, 0.02, OptimizationMode::Historical, &mut engine.rng(), None);
  assert!(matches!(res, Err(PortfolioError::InvalidTicker { ref ticker }) if ticker == "GONE"));
}

#[test]
fn expired_deadline_cancels_batch() {
  let engine = PortfolioEngine::new(AnalyticsConfig::default()).unwrap();
  let token = CancelToken::with_timeout(std::time::Duration::ZERO);
  let requests = vec![
    portfolio_engine::quant::portfolio::OptimizationRequest {
      prices: universe(),
      risk_free_rate: None,
      mode: OptimizationMode::Stochastic,
    };
    2
  ];

  for res in engine.optimize_batch(&requests, Some(&token)) {
    assert!(matches!(res, Err(PortfolioError::Cancelled(_))));
  }
}

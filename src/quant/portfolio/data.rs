//! # Portfolio Data Utilities
//!
//! $$
//! r_t = \ln\frac{P_t}{P_{t-1}},\qquad \hat\Sigma = \frac{1}{T-1}\sum_t (r_t-\bar r)(r_t-\bar r)^\top
//! $$
//!
//! Price-series validation, calendar alignment, log returns, holdings
//! aggregation and the sample moment estimator.

use std::collections::BTreeSet;
use std::collections::HashMap;

use chrono::Duration;
use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;

/// Per-asset price history with strictly increasing dates.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
  ticker: String,
  points: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
  /// Validate and wrap a price history. An empty history is accepted here and
  /// rejected by the estimator as `InvalidTicker`.
  pub fn new(ticker: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Result<Self> {
    let ticker = ticker.into();

    for w in points.windows(2) {
      if w[1].0 <= w[0].0 {
        return Err(PortfolioError::invalid(
          "prices",
          format!("{ticker}: dates must be strictly increasing ({} then {})", w[0].0, w[1].0),
        ));
      }
    }

    if let Some((date, price)) = points
      .iter()
      .find(|(_, p)| !p.is_finite() || *p <= 0.0)
    {
      return Err(PortfolioError::invalid(
        "prices",
        format!("{ticker}: price on {date} must be finite and positive, got {price}"),
      ));
    }

    Ok(Self { ticker, points })
  }

  pub fn ticker(&self) -> &str {
    &self.ticker
  }

  pub fn points(&self) -> &[(NaiveDate, f64)] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Keep only the observations inside a `years * 365` day window ending on the
  /// last available date.
  pub fn trailing_years(&self, years: u32) -> Self {
    let Some(&(last, _)) = self.points.last() else {
      return self.clone();
    };
    let start = last - Duration::days(i64::from(years) * 365);

    Self {
      ticker: self.ticker.clone(),
      points: self
        .points
        .iter()
        .copied()
        .filter(|(d, _)| *d >= start)
        .collect(),
    }
  }
}

/// Prices of several assets on their common calendar.
#[derive(Clone, Debug)]
pub struct AlignedPrices {
  pub tickers: Vec<String>,
  pub dates: Vec<NaiveDate>,
  /// `dates.len() x tickers.len()` price matrix.
  pub prices: Array2<f64>,
}

/// Inner-join the series on date. Asset order follows the input order.
///
/// A ticker submitted more than once is handled by `policy`: `Sum` keeps the
/// first series for it and drops the rest, `Reject` fails the request.
pub fn align_prices(series: &[PriceSeries], policy: DuplicatePolicy) -> Result<AlignedPrices> {
  if series.is_empty() {
    return Err(PortfolioError::invalid("prices", "at least one asset is required"));
  }

  let mut first: HashMap<&str, &PriceSeries> = HashMap::new();
  let mut unique: Vec<&PriceSeries> = Vec::with_capacity(series.len());
  for s in series {
    if let Some(kept) = first.get(s.ticker()) {
      match policy {
        DuplicatePolicy::Sum => {
          warn!(
            ticker = %s.ticker(),
            identical = kept.points == s.points,
            "dropping repeated price series, keeping the first"
          );
          continue;
        }
        DuplicatePolicy::Reject => {
          return Err(PortfolioError::invalid(
            "prices",
            format!("duplicate price series for {}", s.ticker()),
          ));
        }
      }
    }
    first.insert(s.ticker(), s);

    if s.is_empty() {
      return Err(PortfolioError::InvalidTicker {
        ticker: s.ticker().to_string(),
      });
    }
    if s.len() < 2 {
      return Err(PortfolioError::InsufficientData {
        ticker: s.ticker().to_string(),
        required: 2,
        got: s.len(),
      });
    }
    unique.push(s);
  }
  let series = unique;

  let mut common: BTreeSet<NaiveDate> = series[0].points.iter().map(|(d, _)| *d).collect();
  for s in &series[1..] {
    let dates: BTreeSet<NaiveDate> = s.points.iter().map(|(d, _)| *d).collect();
    common = common.intersection(&dates).copied().collect();
  }

  if common.len() < 2 {
    // Blamed on the shortest history.
    let shortest = series
      .iter()
      .min_by_key(|s| s.len())
      .map(|s| s.ticker().to_string())
      .unwrap_or_default();
    return Err(PortfolioError::InsufficientData {
      ticker: shortest,
      required: 2,
      got: common.len(),
    });
  }

  let dates: Vec<NaiveDate> = common.into_iter().collect();
  let mut prices = Array2::<f64>::zeros((dates.len(), series.len()));

  for (j, s) in series.iter().enumerate() {
    let by_date: HashMap<NaiveDate, f64> = s.points.iter().copied().collect();
    for (t, d) in dates.iter().enumerate() {
      prices[[t, j]] = by_date[d];
    }
  }

  debug!(
    assets = series.len(),
    observations = dates.len(),
    "aligned price histories"
  );

  Ok(AlignedPrices {
    tickers: series.iter().map(|s| s.ticker().to_string()).collect(),
    dates,
    prices,
  })
}

/// Convert close prices to a log-return series.
pub fn log_returns_series(closes: &[f64]) -> Vec<f64> {
  closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Column-wise log returns of an aligned price matrix, `(T - 1) x n`.
pub fn log_return_matrix(aligned: &AlignedPrices) -> Result<Array2<f64>> {
  let (t, n) = aligned.prices.dim();
  let mut returns = Array2::<f64>::zeros((t.saturating_sub(1), n));

  for (j, column) in aligned.prices.axis_iter(Axis(1)).enumerate() {
    let closes: Vec<f64> = column.to_vec();
    for (i, r) in log_returns_series(&closes).into_iter().enumerate() {
      if !r.is_finite() {
        return Err(PortfolioError::invalid(
          "prices",
          format!("{}: undefined log return on {}", aligned.tickers[j], aligned.dates[i + 1]),
        ));
      }
      returns[[i, j]] = r;
    }
  }

  Ok(returns)
}

/// Sample moments of per-period log returns.
#[derive(Clone, Debug)]
pub struct MomentEstimate {
  pub tickers: Vec<String>,
  /// Per-period mean return.
  pub mean: Array1<f64>,
  /// Per-period sample covariance. Not guaranteed PSD.
  pub covariance: Array2<f64>,
  /// Number of return observations behind the estimate.
  pub observations: usize,
  pub annualization_factor: f64,
}

impl MomentEstimate {
  /// Estimate from a `T x n` return matrix.
  ///
  /// With a single return observation the covariance is all zeros, which the
  /// metrics later report as a `DivisionError` instead of a NaN.
  pub fn from_returns(
    tickers: Vec<String>,
    returns: &Array2<f64>,
    annualization_factor: f64,
  ) -> Result<Self> {
    let (t, n) = returns.dim();
    if tickers.len() != n {
      return Err(PortfolioError::invalid(
        "returns",
        format!("{} tickers for {n} return columns", tickers.len()),
      ));
    }
    if t == 0 {
      return Err(PortfolioError::InsufficientData {
        ticker: tickers.first().cloned().unwrap_or_default(),
        required: 2,
        got: 1,
      });
    }
    if !(annualization_factor.is_finite() && annualization_factor > 0.0) {
      return Err(PortfolioError::invalid(
        "annualizationFactor",
        "must be finite and positive",
      ));
    }

    let mean = returns
      .mean_axis(Axis(0))
      .ok_or_else(|| PortfolioError::invalid("returns", "empty return matrix"))?;
    let centered = returns - &mean;
    let denom = (t.saturating_sub(1)).max(1) as f64;
    let covariance = centered.t().dot(&centered) / denom;

    Ok(Self {
      tickers,
      mean,
      covariance,
      observations: t,
      annualization_factor,
    })
  }

  pub fn n_assets(&self) -> usize {
    self.mean.len()
  }

  pub fn annualized_mean(&self) -> Array1<f64> {
    &self.mean * self.annualization_factor
  }

  /// Pearson correlation implied by the covariance.
  pub fn correlation(&self) -> Array2<f64> {
    corr_from_cov(&self.covariance)
  }
}

/// Align, difference and estimate in one go.
pub fn estimate_moments(
  series: &[PriceSeries],
  annualization_factor: f64,
  policy: DuplicatePolicy,
) -> Result<MomentEstimate> {
  let aligned = align_prices(series, policy)?;
  let returns = log_return_matrix(&aligned)?;
  MomentEstimate::from_returns(aligned.tickers, &returns, annualization_factor)
}

pub(crate) fn corr_from_cov(cov: &Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sd: Vec<f64> = (0..n).map(|i| cov[[i, i]].max(0.0).sqrt()).collect();

  Array2::from_shape_fn((n, n), |(i, j)| {
    let denom = sd[i] * sd[j];
    if i == j {
      1.0
    } else if denom > 1e-15 {
      (cov[[i, j]] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

/// How repeated tickers in a price list or a holdings list are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
  /// Sum the weights of repeated holdings, keeping first-seen order. A
  /// repeated price series keeps its first occurrence.
  #[default]
  Sum,
  /// Reject the request.
  Reject,
}

/// A caller-submitted position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Holding {
  pub ticker: String,
  pub weight: f64,
}

impl Holding {
  pub fn new(ticker: impl Into<String>, weight: f64) -> Self {
    Self {
      ticker: ticker.into(),
      weight,
    }
  }
}

/// Collapse repeated tickers according to `policy`.
pub fn aggregate_holdings(holdings: &[Holding], policy: DuplicatePolicy) -> Result<Vec<Holding>> {
  let mut out: Vec<Holding> = Vec::with_capacity(holdings.len());
  let mut index: HashMap<&str, usize> = HashMap::new();

  for h in holdings {
    match index.get(h.ticker.as_str()) {
      Some(&i) => match policy {
        DuplicatePolicy::Sum => out[i].weight += h.weight,
        DuplicatePolicy::Reject => {
          return Err(PortfolioError::invalid(
            "holdings",
            format!("duplicate ticker {}", h.ticker),
          ));
        }
      },
      None => {
        index.insert(h.ticker.as_str(), out.len());
        out.push(h.clone());
      }
    }
  }

  Ok(out)
}

/// Drop non-positive weights and rescale the rest to sum to one.
pub fn normalize_holdings(holdings: &[Holding]) -> Result<Vec<Holding>> {
  let (kept, dropped): (Vec<&Holding>, Vec<&Holding>) = holdings
    .iter()
    .partition(|h| h.weight.is_finite() && h.weight > 0.0);

  for h in &dropped {
    warn!(ticker = %h.ticker, weight = h.weight, "dropping holding with non-positive weight");
  }

  let total: f64 = kept.iter().map(|h| h.weight).sum();
  if kept.is_empty() || total <= 0.0 {
    return Err(PortfolioError::invalid(
      "holdings",
      "no holdings with a positive weight",
    ));
  }

  Ok(
    kept
      .into_iter()
      .map(|h| Holding::new(h.ticker.clone(), h.weight / total))
      .collect(),
  )
}

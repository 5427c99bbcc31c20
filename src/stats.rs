//! # Stats
//!
//! $$
//! Q(p) = x_{(\lfloor r \rfloor)} + (r - \lfloor r \rfloor)\,(x_{(\lceil r \rceil)} - x_{(\lfloor r \rfloor)}),\quad r = \tfrac{p}{100}(n-1)
//! $$
//!
//! Small descriptive statistics shared by the estimator, the optimizer and the
//! VaR engine.

pub fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Population standard deviation (denominator `n`).
pub fn population_std(xs: &[f64], mean: f64) -> f64 {
  if xs.is_empty() {
    return 0.0;
  }

  let acc: f64 = xs.iter().map(|&x| (x - mean) * (x - mean)).sum();
  (acc / xs.len() as f64).sqrt()
}

/// Percentile of already sorted data with linear interpolation between order
/// statistics. `p` is in percent, clamped to `[0, 100]`.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
  if sorted_data.is_empty() {
    return f64::NAN;
  }
  if p <= 0.0 {
    return sorted_data[0];
  }
  if p >= 100.0 {
    return sorted_data[sorted_data.len() - 1];
  }

  let rank = (p / 100.0) * (sorted_data.len() as f64 - 1.0);
  let lower_index = rank.floor() as usize;
  let upper_index = rank.ceil() as usize;

  if lower_index == upper_index {
    sorted_data[lower_index]
  } else {
    let weight = rank - lower_index as f64;
    let lower_val = sorted_data[lower_index];
    let upper_val = sorted_data[upper_index];
    lower_val + weight * (upper_val - lower_val)
  }
}

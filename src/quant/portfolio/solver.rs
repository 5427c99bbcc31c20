//! # Constrained Solvers
//!
//! $$
//! \min_{w}\ f(w)\quad\text{s.t.}\quad l_i \le w_i \le u_i,\ \ \textstyle\sum_i w_i = s
//! $$
//!
//! A small solver abstraction for smooth objectives on a box-capped simplex.
//! Backends only ever report a converged point: hitting the iteration limit or
//! failing a line search is an `OptimizationError` carrying the diagnostic.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::solver::neldermead::NelderMead;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::PortfolioError;
use crate::error::Result;

/// Smooth scalar objective over weight vectors.
pub trait Objective: Sync {
  fn value(&self, x: &[f64]) -> f64;

  /// Defaults to central finite differences.
  fn gradient(&self, x: &[f64]) -> Vec<f64> {
    let mut probe = x.to_vec();
    let mut grad = vec![0.0; x.len()];
    for i in 0..x.len() {
      let h = 1e-6 * x[i].abs().max(1.0);
      probe[i] = x[i] + h;
      let up = self.value(&probe);
      probe[i] = x[i] - h;
      let down = self.value(&probe);
      probe[i] = x[i];
      grad[i] = (up - down) / (2.0 * h);
    }
    grad
  }
}

/// Per-component box constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
  pub lower: Vec<f64>,
  pub upper: Vec<f64>,
}

impl Bounds {
  /// Same `[lower, upper]` interval for all `n` components.
  pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
    Self {
      lower: vec![lower; n],
      upper: vec![upper; n],
    }
  }

  pub fn len(&self) -> usize {
    self.lower.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lower.is_empty()
  }
}

/// Equality constraints understood by the solvers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constraint {
  /// `Σ x_i = target`.
  WeightSum(f64),
}

/// Converged output of a [`Solver`].
#[derive(Clone, Debug)]
pub struct Solution {
  pub x: Vec<f64>,
  pub value: f64,
  pub iterations: u64,
  /// Human-readable reason the solver stopped.
  pub termination: String,
}

/// Pluggable constrained minimizer.
pub trait Solver: Send + Sync {
  fn minimize(
    &self,
    objective: &dyn Objective,
    initial: &[f64],
    bounds: &Bounds,
    constraints: &[Constraint],
  ) -> Result<Solution>;
}

/// Available solver backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
  #[default]
  ProjectedGradient,
  NelderMead,
}

impl SolverKind {
  pub fn build(self, max_iters: u64, tolerance: f64, cancel: Option<CancelToken>) -> Box<dyn Solver> {
    match self {
      Self::ProjectedGradient => Box::new(ProjectedGradient {
        max_iters,
        tolerance,
        cancel,
      }),
      Self::NelderMead => Box::new(NelderMeadSolver {
        max_iters,
        tolerance,
        cancel,
      }),
    }
  }
}

/// `{ l ≤ x ≤ u, Σx = s }` with an exact Euclidean projection.
#[derive(Clone, Debug)]
pub struct FeasibleSet {
  lower: Vec<f64>,
  upper: Vec<f64>,
  total: f64,
}

impl FeasibleSet {
  pub fn new(bounds: &Bounds, constraints: &[Constraint]) -> Result<Self> {
    if bounds.lower.len() != bounds.upper.len() {
      return Err(PortfolioError::invalid("bounds", "lower and upper lengths differ"));
    }
    if bounds.is_empty() {
      return Err(PortfolioError::invalid("bounds", "no variables to optimize"));
    }
    for (l, u) in bounds.lower.iter().zip(&bounds.upper) {
      if !(l.is_finite() && u.is_finite() && l <= u) {
        return Err(PortfolioError::invalid(
          "bounds",
          format!("interval [{l}, {u}] is empty or not finite"),
        ));
      }
    }

    let total = match constraints {
      [Constraint::WeightSum(t)] => *t,
      [] => return Err(PortfolioError::invalid("constraints", "a weight-sum constraint is required")),
      _ => return Err(PortfolioError::invalid("constraints", "only a single weight-sum constraint is supported")),
    };

    let lo: f64 = bounds.lower.iter().sum();
    let hi: f64 = bounds.upper.iter().sum();
    if !(lo <= total + 1e-12 && total <= hi + 1e-12) {
      return Err(PortfolioError::invalid(
        "weightUpperBound",
        format!("no weights within bounds can sum to {total} (bound sums {lo}..{hi})"),
      ));
    }

    Ok(Self {
      lower: bounds.lower.clone(),
      upper: bounds.upper.clone(),
      total,
    })
  }

  fn clamp_shift(&self, y: &[f64], tau: f64) -> f64 {
    y.iter()
      .zip(self.lower.iter().zip(&self.upper))
      .map(|(&yi, (&l, &u))| (yi - tau).clamp(l, u))
      .sum()
  }

  /// Closest feasible point: `x_i = clamp(y_i - τ, l_i, u_i)` with `τ` found by
  /// bisection so the sum matches.
  pub fn project(&self, y: &[f64]) -> Vec<f64> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for (i, &yi) in y.iter().enumerate() {
      lo = lo.min(yi - self.upper[i]);
      hi = hi.max(yi - self.lower[i]);
    }

    // clamp_shift is non-increasing in tau: lo puts everything at the upper
    // bounds, hi everything at the lower bounds.
    for _ in 0..200 {
      let mid = 0.5 * (lo + hi);
      if self.clamp_shift(y, mid) > self.total {
        lo = mid;
      } else {
        hi = mid;
      }
      if hi - lo <= f64::EPSILON * hi.abs().max(1.0) {
        break;
      }
    }

    let tau = 0.5 * (lo + hi);
    y.iter()
      .zip(self.lower.iter().zip(&self.upper))
      .map(|(&yi, (&l, &u))| (yi - tau).clamp(l, u))
      .collect()
  }

  pub fn contains(&self, x: &[f64], tol: f64) -> bool {
    let sum: f64 = x.iter().sum();
    (sum - self.total).abs() <= tol
      && x
        .iter()
        .zip(self.lower.iter().zip(&self.upper))
        .all(|(&xi, (&l, &u))| xi >= l - tol && xi <= u + tol)
  }
}

fn inf_norm_diff(a: &[f64], b: &[f64]) -> f64 {
  a.iter()
    .zip(b)
    .fold(0.0_f64, |m, (x, y)| m.max((x - y).abs()))
}

fn check_cancel(cancel: &Option<CancelToken>) -> Result<()> {
  match cancel {
    Some(token) => token.check(),
    None => Ok(()),
  }
}

/// Projected gradient descent with Armijo backtracking.
///
/// Every accepted step strictly decreases the objective, so the returned value
/// never exceeds the value at the (projected) start point.
#[derive(Clone, Debug)]
pub struct ProjectedGradient {
  pub max_iters: u64,
  pub tolerance: f64,
  pub cancel: Option<CancelToken>,
}

impl Default for ProjectedGradient {
  fn default() -> Self {
    Self {
      max_iters: 1000,
      tolerance: 1e-9,
      cancel: None,
    }
  }
}

impl Solver for ProjectedGradient {
  fn minimize(
    &self,
    objective: &dyn Objective,
    initial: &[f64],
    bounds: &Bounds,
    constraints: &[Constraint],
  ) -> Result<Solution> {
    let set = FeasibleSet::new(bounds, constraints)?;
    if initial.len() != bounds.len() {
      return Err(PortfolioError::invalid("initial", "length does not match bounds"));
    }

    let mut x = set.project(initial);
    let mut f = objective.value(&x);
    if !f.is_finite() {
      return Err(PortfolioError::OptimizationError {
        reason: "objective is not finite at the initial point".into(),
        iterations: 0,
      });
    }

    let mut step = 1.0_f64;
    for iter in 0..self.max_iters {
      check_cancel(&self.cancel)?;

      let g = objective.gradient(&x);
      if g.iter().any(|v| !v.is_finite()) {
        return Err(PortfolioError::OptimizationError {
          reason: "gradient is not finite".into(),
          iterations: iter,
        });
      }

      let descent: Vec<f64> = x.iter().zip(&g).map(|(xi, gi)| xi - gi).collect();
      let stationarity = inf_norm_diff(&set.project(&descent), &x);
      if stationarity <= self.tolerance {
        return Ok(Solution {
          x,
          value: f,
          iterations: iter,
          termination: "projected gradient below tolerance".into(),
        });
      }

      let mut alpha = (step * 2.0).min(1e6);
      let accepted = loop {
        let trial: Vec<f64> = x.iter().zip(&g).map(|(xi, gi)| xi - alpha * gi).collect();
        let y = set.project(&trial);
        let fy = objective.value(&y);
        let moved: f64 = y.iter().zip(&x).map(|(a, b)| (a - b) * (a - b)).sum();
        if fy.is_finite() && fy <= f - 1e-4 * moved / alpha && moved > 0.0 {
          break Some((y, fy));
        }
        alpha *= 0.5;
        if alpha < 1e-16 {
          break None;
        }
      };

      let Some((y, fy)) = accepted else {
        if stationarity <= self.tolerance.sqrt() {
          return Ok(Solution {
            x,
            value: f,
            iterations: iter,
            termination: "no further descent within machine precision".into(),
          });
        }
        return Err(PortfolioError::OptimizationError {
          reason: format!("line search failed (projected gradient {stationarity:e})"),
          iterations: iter,
        });
      };

      let decrease = f - fy;
      let moved = inf_norm_diff(&y, &x);
      x = y;
      f = fy;
      step = alpha;

      if decrease <= self.tolerance * (1.0 + f.abs()) && moved <= self.tolerance.sqrt() {
        debug!(iterations = iter + 1, value = f, "projected gradient converged");
        return Ok(Solution {
          x,
          value: f,
          iterations: iter + 1,
          termination: "objective change below tolerance".into(),
        });
      }
    }

    Err(PortfolioError::OptimizationError {
      reason: format!("maximum iterations ({}) reached", self.max_iters),
      iterations: self.max_iters,
    })
  }
}

/// argmin Nelder-Mead over an unconstrained parameter mapped through the
/// feasible-set projection.
#[derive(Clone, Debug)]
pub struct NelderMeadSolver {
  pub max_iters: u64,
  pub tolerance: f64,
  pub cancel: Option<CancelToken>,
}

impl Default for NelderMeadSolver {
  fn default() -> Self {
    Self {
      max_iters: 5000,
      tolerance: 1e-10,
      cancel: None,
    }
  }
}

struct ProjectedCost<'a> {
  objective: &'a dyn Objective,
  set: &'a FeasibleSet,
  cancel: Option<&'a CancelToken>,
}

impl CostFunction for ProjectedCost<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    if let Some(token) = self.cancel {
      token.check()?;
    }
    let v = self.objective.value(&self.set.project(x));
    Ok(if v.is_finite() { v } else { 1e10 })
  }
}

impl Solver for NelderMeadSolver {
  fn minimize(
    &self,
    objective: &dyn Objective,
    initial: &[f64],
    bounds: &Bounds,
    constraints: &[Constraint],
  ) -> Result<Solution> {
    let set = FeasibleSet::new(bounds, constraints)?;
    let n = bounds.len();
    if initial.len() != n {
      return Err(PortfolioError::invalid("initial", "length does not match bounds"));
    }

    let x0 = set.project(initial);
    if !objective.value(&x0).is_finite() {
      return Err(PortfolioError::OptimizationError {
        reason: "objective is not finite at the initial point".into(),
        iterations: 0,
      });
    }

    let scale = 1.0 / n as f64;
    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(x0.clone());
    for i in 0..n {
      let mut point = x0.clone();
      point[i] += scale;
      simplex.push(point);
    }

    let cost = ProjectedCost {
      objective,
      set: &set,
      cancel: self.cancel.as_ref(),
    };

    let solver = NelderMead::new(simplex)
      .with_sd_tolerance(self.tolerance)
      .map_err(|e| PortfolioError::OptimizationError {
        reason: e.to_string(),
        iterations: 0,
      })?;

    let res = Executor::new(cost, solver)
      .configure(|state| state.max_iters(self.max_iters))
      .run()
      .map_err(|e| match e.downcast::<PortfolioError>() {
        Ok(inner) => inner,
        Err(e) => PortfolioError::OptimizationError {
          reason: e.to_string(),
          iterations: 0,
        },
      })?;

    let iterations = res.state.iter;
    match &res.state.termination_status {
      TerminationStatus::Terminated(TerminationReason::SolverConverged)
      | TerminationStatus::Terminated(TerminationReason::TargetCostReached) => {}
      status => {
        return Err(PortfolioError::OptimizationError {
          reason: format!("{status:?}"),
          iterations,
        });
      }
    }

    let best = res.state.best_param.ok_or_else(|| PortfolioError::OptimizationError {
      reason: "solver returned no parameter".into(),
      iterations,
    })?;
    let x = set.project(&best);
    let value = objective.value(&x);

    debug!(iterations, value, "nelder-mead converged");
    Ok(Solution {
      x,
      value,
      iterations,
      termination: "simplex standard deviation below tolerance".into(),
    })
  }
}

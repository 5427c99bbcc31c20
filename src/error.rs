//! # Errors
//!
//! Every failure the analytics pipeline can report at a request boundary.

use thiserror::Error;

/// Portfolio analytics errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
  /// An asset has no usable price history at all.
  #[error("Invalid ticker: {ticker} has no usable price history")]
  InvalidTicker { ticker: String },

  /// An asset has fewer aligned observations than required.
  #[error("Insufficient data for {ticker}: required {required}, got {got}")]
  InsufficientData {
    ticker: String,
    required: usize,
    got: usize,
  },

  /// A configuration or input value is outside of its valid domain.
  #[error("Invalid parameter: {name} - {reason}")]
  InvalidParameter { name: String, reason: String },

  /// Covariance matrix has a negative eigenvalue. Recoverable through repair.
  #[error("Covariance matrix is not positive semi-definite (min eigenvalue {min_eigenvalue:e})")]
  NonPsdCovariance { min_eigenvalue: f64 },

  /// The constrained solver did not converge.
  #[error("Optimization failed after {iterations} iterations: {reason}")]
  OptimizationError { reason: String, iterations: u64 },

  /// A ratio was requested with a zero denominator.
  #[error("Division error: {0}")]
  DivisionError(String),

  /// The computation was abandoned through a cancel token or deadline.
  #[error("Computation cancelled: {0}")]
  Cancelled(String),
}

impl PortfolioError {
  pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
    Self::InvalidParameter {
      name: name.to_string(),
      reason: reason.into(),
    }
  }

  /// Short machine-readable tag, used by transports to map errors to responses.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::InvalidTicker { .. } => "invalid_ticker",
      Self::InsufficientData { .. } => "insufficient_data",
      Self::InvalidParameter { .. } => "invalid_parameter",
      Self::NonPsdCovariance { .. } => "non_psd_covariance",
      Self::OptimizationError { .. } => "optimization_error",
      Self::DivisionError(_) => "division_error",
      Self::Cancelled(_) => "cancelled",
    }
  }
}

/// Result type alias for portfolio analytics.
pub type Result<T> = std::result::Result<T, PortfolioError>;

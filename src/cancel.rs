//! # Cancellation
//!
//! Cooperative cancellation for long solves and simulations. Solvers and
//! simulation loops poll the token between iterations or chunks and bail out
//! with [`PortfolioError::Cancelled`]; no partial result is ever returned.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crate::error::PortfolioError;
use crate::error::Result;

/// Shared cancel flag with an optional deadline. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
  deadline: Option<Instant>,
}

impl CancelToken {
  /// A token that never fires unless [`CancelToken::cancel`] is called.
  pub fn new() -> Self {
    Self::default()
  }

  /// A token that also fires once `timeout` has elapsed from now.
  pub fn with_timeout(timeout: Duration) -> Self {
    Self {
      flag: Arc::new(AtomicBool::new(false)),
      deadline: Some(Instant::now() + timeout),
    }
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  /// `Err(Cancelled)` once the token has fired.
  pub fn check(&self) -> Result<()> {
    if self.flag.load(Ordering::SeqCst) {
      return Err(PortfolioError::Cancelled("cancelled by caller".into()));
    }
    if self.deadline.is_some_and(|d| Instant::now() >= d) {
      return Err(PortfolioError::Cancelled("deadline exceeded".into()));
    }
    Ok(())
  }
}

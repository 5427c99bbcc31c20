//! # portfolio-engine
//!
//! $$
//! \mathbf w^\* = \arg\max_{\mathbf w\in\Delta_U}\frac{\mathbb E[R_p]-r_f}{\sigma_p},\qquad
//! \mathrm{VaR}_c = -Q_{1-c}(\mathrm{PnL})
//! $$
//!
//! Portfolio analytics on historical price data: sample moments of log
//! returns, nearest-PSD covariance repair, multivariate-normal scenarios,
//! maximum-Sharpe allocation under box and budget constraints, and Monte
//! Carlo Value-at-Risk.
//!
//! Every stochastic entry point takes an explicit random source, so seeded
//! runs are reproducible end to end.

pub mod cancel;
pub mod config;
pub mod error;
pub mod quant;
pub mod stats;

pub use cancel::CancelToken;
pub use config::AnalyticsConfig;
pub use error::PortfolioError;
pub use error::Result;
pub use quant::portfolio::OptimizationMode;
pub use quant::portfolio::OptimizationResult;
pub use quant::portfolio::PortfolioEngine;
pub use quant::portfolio::PriceSeries;
pub use quant::risk::VaRResult;

//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Return estimation, covariance repair, scenario generation and
//! Sharpe-maximizing allocation on the capped simplex.

pub mod covariance;
pub mod data;
pub mod engine;
pub mod metrics;
pub mod optimizers;
pub mod scenarios;
pub mod solver;
pub mod types;

pub use covariance::check_psd;
pub use covariance::ensure_psd;
pub use covariance::nearest_psd;
pub use covariance::RepairedCovariance;
pub use data::aggregate_holdings;
pub use data::align_prices;
pub use data::estimate_moments;
pub use data::log_return_matrix;
pub use data::log_returns_series;
pub use data::normalize_holdings;
pub use data::AlignedPrices;
pub use data::DuplicatePolicy;
pub use data::Holding;
pub use data::MomentEstimate;
pub use data::PriceSeries;
pub use engine::OptimizationRequest;
pub use engine::PortfolioEngine;
pub use metrics::evaluate;
pub use metrics::evaluate_scenarios;
pub use metrics::PortfolioMetrics;
pub use optimizers::optimize_historical;
pub use optimizers::optimize_stochastic;
pub use optimizers::OptimizerSettings;
pub use optimizers::SharpeObjective;
pub use scenarios::generate_scenarios;
pub use scenarios::ScenarioGenerator;
pub use solver::Bounds;
pub use solver::Constraint;
pub use solver::NelderMeadSolver;
pub use solver::Objective;
pub use solver::ProjectedGradient;
pub use solver::Solution;
pub use solver::Solver;
pub use solver::SolverKind;
pub use types::OptimizationMode;
pub use types::OptimizationResult;

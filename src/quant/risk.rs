//! # Risk
//!
//! $$
//! \mathrm{VaR}_c = -Q_{1-c}(\mathrm{PnL})
//! $$
//!
//! Forward P&L simulation and tail-risk measures for a weighted portfolio.

pub mod var;

pub use var::parametric_var;
pub use var::var_from_pnl;
pub use var::MonteCarloVar;
pub use var::VaRResult;

//! # Quant
//!
//! Portfolio construction and risk measurement.

pub mod portfolio;
pub mod risk;

//! # portfolio-rs
//!
//! Long-only portfolio optimization over historical returns: minimum variance
//! (Markowitz), risk parity, maximum Sharpe, Black-Litterman and Hierarchical
//! Risk Parity, plus threshold-based rebalancing plans.
//!
//! ```ignore
//! use portfolio_rs::portfolio::{OptimizationRequest, PortfolioEngine, ReturnsMatrix};
//!
//! let engine = PortfolioEngine::default();
//! let result = engine.optimize_portfolio(&returns, &OptimizationRequest::new("sharpe", "moderate"))?;
//! ```

pub mod config;
pub mod error;
pub mod portfolio;
pub mod traits;

pub use config::EngineConfig;
pub use error::PortfolioError;
pub use portfolio::PortfolioEngine;

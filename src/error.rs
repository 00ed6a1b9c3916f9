//! # Errors
//!
//! Error kinds surfaced by the optimization engine.

use thiserror::Error;

/// Errors returned by the portfolio engine.
#[derive(Error, Debug)]
pub enum PortfolioError {
  /// Malformed inputs, infeasible constraints or bad rebalance arguments.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error(
    "unsupported optimization type `{0}` (expected one of markowitz, risk_parity, sharpe, black_litterman, hrp)"
  )]
  UnsupportedStrategy(String),

  /// Only raised under [`crate::config::ConvergencePolicy::FailFast`].
  #[error("{strategy} solver did not converge for {n_assets} assets after {iterations} iterations: {reason}")]
  NonConvergence {
    strategy: &'static str,
    n_assets: usize,
    iterations: u64,
    reason: String,
  },

  /// Numerical failure, e.g. a singular covariance matrix in a linear solve.
  #[error("{strategy} failed for {n_assets} assets: {detail}")]
  Computation {
    strategy: &'static str,
    n_assets: usize,
    detail: String,
  },

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Toml(#[from] toml::de::Error),
}

impl PortfolioError {
  pub(crate) fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PortfolioError>;

//! # Configuration
//!
//! Engine and solver settings. Every field has a default, so a TOML file only
//! needs to list what it overrides:
//!
//! ```toml
//! risk_free_rate = 0.03
//!
//! [solver]
//! max_iters = 2000
//! convergence_policy = "fail_fast"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::error::PortfolioError;
use crate::error::Result;

/// Default annualized risk-free rate used by the Sharpe objective and metrics.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

/// What the engine does when the iterative solver stops without converging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePolicy {
  /// Log and return the best iterate found.
  #[default]
  BestEffort,
  /// Return [`PortfolioError::NonConvergence`].
  FailFast,
}

/// Settings for [`crate::portfolio::solver::ConstrainedSolver`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  /// Iteration cap for each inner Nelder-Mead run.
  pub max_iters: u64,
  /// Standard deviation of simplex costs below which an inner run has converged.
  pub sd_tolerance: f64,
  /// Largest accepted (scaled) violation of a nonlinear constraint.
  pub constraint_tolerance: f64,
  /// Augmented-Lagrangian rounds when nonlinear constraints are present.
  pub max_outer_rounds: usize,
  /// Initial quadratic penalty weight.
  pub initial_penalty: f64,
  /// Edge length of the initial simplex, in weight units.
  pub initial_step: f64,
  /// Wall-clock budget for a single solve.
  pub time_limit_ms: Option<u64>,
  pub convergence_policy: ConvergencePolicy,
  /// Log non-convergence at `warn` (true) or `debug` (false).
  pub warn_on_non_convergence: bool,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 1000,
      sd_tolerance: 1e-12,
      constraint_tolerance: 1e-6,
      max_outer_rounds: 20,
      initial_penalty: 10.0,
      initial_step: 0.1,
      time_limit_ms: None,
      convergence_policy: ConvergencePolicy::BestEffort,
      warn_on_non_convergence: true,
    }
  }
}

impl SolverConfig {
  pub fn time_limit(&self) -> Option<Duration> {
    self.time_limit_ms.map(Duration::from_millis)
  }

  pub fn validate(&self) -> Result<()> {
    if self.max_iters == 0 {
      return Err(PortfolioError::Config("solver.max_iters must be positive".into()));
    }
    if !(self.sd_tolerance.is_finite() && self.sd_tolerance > 0.0) {
      return Err(PortfolioError::Config(
        "solver.sd_tolerance must be a positive number".into(),
      ));
    }
    if !(self.constraint_tolerance.is_finite() && self.constraint_tolerance > 0.0) {
      return Err(PortfolioError::Config(
        "solver.constraint_tolerance must be a positive number".into(),
      ));
    }
    if self.max_outer_rounds == 0 {
      return Err(PortfolioError::Config(
        "solver.max_outer_rounds must be positive".into(),
      ));
    }
    if !(self.initial_penalty.is_finite() && self.initial_penalty > 0.0) {
      return Err(PortfolioError::Config(
        "solver.initial_penalty must be a positive number".into(),
      ));
    }
    if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
      return Err(PortfolioError::Config(
        "solver.initial_step must be a positive number".into(),
      ));
    }
    Ok(())
  }
}

/// Runtime configuration for [`crate::portfolio::PortfolioEngine`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Risk-free rate shared by the Sharpe objective and the metrics.
  pub risk_free_rate: f64,
  /// Reject return histories with no more rows than assets.
  pub require_full_rank_history: bool,
  pub solver: SolverConfig,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      risk_free_rate: DEFAULT_RISK_FREE_RATE,
      require_full_rank_history: false,
      solver: SolverConfig::default(),
    }
  }
}

impl EngineConfig {
  /// Parse a TOML document; missing keys take their defaults.
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let config: EngineConfig = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  /// Load configuration from a TOML file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let config = Self::from_toml_str(&content)?;
    info!("loaded engine configuration from {}", path.display());
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if !self.risk_free_rate.is_finite() {
      return Err(PortfolioError::Config("risk_free_rate must be finite".into()));
    }
    self.solver.validate()
  }
}

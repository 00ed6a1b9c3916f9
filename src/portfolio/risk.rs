//! # Risk Parameters
//!
//! Risk-tolerance labels and the static limits attached to them.

use std::fmt;
use std::fmt::Display;

use impl_new_derive::ImplNew;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::metrics::PortfolioMetrics;

/// Coarse risk appetite label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
  Low,
  #[default]
  Moderate,
  High,
}

impl RiskTolerance {
  /// Map a label to a tolerance. Unrecognized labels fall back to `Moderate`.
  pub fn resolve(label: &str) -> Self {
    match label.trim().to_lowercase().as_str() {
      "low" => Self::Low,
      "moderate" => Self::Moderate,
      "high" => Self::High,
      other => {
        debug!("unknown risk tolerance `{other}`, using moderate");
        Self::Moderate
      }
    }
  }

  pub fn parameters(&self) -> RiskParameters {
    match self {
      Self::Low => RiskParameters::new(0.10, 0.05, 0.80),
      Self::Moderate => RiskParameters::new(0.15, 0.10, 0.70),
      Self::High => RiskParameters::new(0.25, 0.20, 0.60),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Low => "low",
      Self::Moderate => "moderate",
      Self::High => "high",
    }
  }
}

impl Display for RiskTolerance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Limits attached to a [`RiskTolerance`].
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
  pub max_volatility: f64,
  pub max_drawdown: f64,
  pub min_diversification: f64,
}

/// How a portfolio compares to its [`RiskParameters`]. Informational only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
  pub within_volatility_limit: bool,
  /// Compared against the 2×volatility drawdown heuristic, not a simulation.
  pub within_drawdown_limit: bool,
  /// `1 - concentration_index`
  pub diversification_score: f64,
  pub meets_diversification: bool,
}

impl RiskParameters {
  pub fn assess(&self, metrics: &PortfolioMetrics) -> RiskAssessment {
    let diversification_score = 1.0 - metrics.concentration_index;
    RiskAssessment {
      within_volatility_limit: metrics.volatility <= self.max_volatility,
      within_drawdown_limit: metrics.max_drawdown_approx <= self.max_drawdown,
      diversification_score,
      meets_diversification: diversification_score >= self.min_diversification,
    }
  }
}

//! # Message Envelope
//!
//! Request/response records exchanged over the optimization topics. Only the
//! payloads live here; publishing them is left to the caller's message bus.

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::types::BlackLittermanViews;
use super::types::Constraints;
use super::types::OptimizationResult;
use crate::error::PortfolioError;

pub const REQUEST_TOPIC: &str = "portfolio_optimization_request";
pub const RESPONSE_TOPIC: &str = "portfolio_optimization_response";

fn default_id() -> String {
  "unknown".to_string()
}

fn default_method() -> String {
  "markowitz".to_string()
}

fn default_tolerance() -> String {
  "moderate".to_string()
}

/// Optimization request as received on [`REQUEST_TOPIC`].
///
/// The method and tolerance stay as raw labels so an unknown method surfaces
/// as [`PortfolioError::UnsupportedStrategy`] rather than a parse failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
  #[serde(default = "default_id")]
  pub id: String,
  #[serde(default = "default_method")]
  pub optimization_type: String,
  #[serde(default = "default_tolerance")]
  pub risk_tolerance: String,
  #[serde(default)]
  pub constraints: Constraints,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_return: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_volatility: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub views: Option<BlackLittermanViews>,
}

impl Default for OptimizationRequest {
  fn default() -> Self {
    Self {
      id: default_id(),
      optimization_type: default_method(),
      risk_tolerance: default_tolerance(),
      constraints: Constraints::default(),
      target_return: None,
      target_volatility: None,
      views: None,
    }
  }
}

impl OptimizationRequest {
  pub fn new(optimization_type: impl Into<String>, risk_tolerance: impl Into<String>) -> Self {
    Self {
      optimization_type: optimization_type.into(),
      risk_tolerance: risk_tolerance.into(),
      ..Self::default()
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = id.into();
    self
  }

  pub fn with_constraints(mut self, constraints: Constraints) -> Self {
    self.constraints = constraints;
    self
  }

  pub fn with_targets(mut self, target_return: Option<f64>, target_volatility: Option<f64>) -> Self {
    self.target_return = target_return;
    self.target_volatility = target_volatility;
    self
  }

  pub fn with_views(mut self, views: BlackLittermanViews) -> Self {
    self.views = Some(views);
    self
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
  Success,
  Error,
}

/// Reply published on [`RESPONSE_TOPIC`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationResponse {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub status: ResponseStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub optimization_result: Option<OptimizationResult>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Seconds since the Unix epoch.
  pub timestamp: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

fn unix_now() -> f64 {
  Utc::now().timestamp_micros() as f64 / 1e6
}

impl OptimizationResponse {
  pub fn success(id: impl Into<String>, result: OptimizationResult) -> Self {
    let message = format!(
      "Portfolio optimization completed successfully using {} method",
      result.optimization_type
    );
    Self {
      id: id.into(),
      kind: RESPONSE_TOPIC.to_string(),
      status: ResponseStatus::Success,
      optimization_result: Some(result),
      error: None,
      timestamp: unix_now(),
      message: Some(message),
    }
  }

  pub fn failure(id: impl Into<String>, error: &PortfolioError) -> Self {
    Self {
      id: id.into(),
      kind: RESPONSE_TOPIC.to_string(),
      status: ResponseStatus::Error,
      optimization_result: None,
      error: Some(error.to_string()),
      timestamp: unix_now(),
      message: None,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == ResponseStatus::Success
  }
}

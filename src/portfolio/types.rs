//! # Portfolio Types
//!
//! $$
//! \mathbf{w}\in\{\mathbf w\in[0,1]^n:\ \mathbf 1^\top\mathbf w=1\}
//! $$
//!
//! Shared enums, records and the ordered weight map exchanged with callers.

use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use impl_new_derive::ImplNew;
use serde::de::MapAccess;
use serde::de::Visitor;
use serde::ser::SerializeMap;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use super::metrics::PortfolioMetrics;
use super::risk::RiskAssessment;
use super::risk::RiskParameters;
use super::risk::RiskTolerance;
use super::solver::SolverReport;
use crate::error::PortfolioError;
use crate::error::Result;

/// Supported portfolio optimization methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerMethod {
  /// Minimum variance with optional return/volatility targets.
  #[serde(rename = "markowitz")]
  Markowitz,
  /// Equalized risk contributions.
  #[serde(rename = "risk_parity")]
  RiskParity,
  /// Maximum Sharpe ratio.
  #[serde(rename = "sharpe")]
  Sharpe,
  /// Black-Litterman posterior returns with a mean-variance solve.
  #[serde(rename = "black_litterman")]
  BlackLitterman,
  /// Hierarchical Risk Parity (Lopez de Prado).
  #[serde(rename = "hrp")]
  HRP,
}

impl OptimizerMethod {
  pub const ALL: [OptimizerMethod; 5] = [
    Self::Markowitz,
    Self::RiskParity,
    Self::Sharpe,
    Self::BlackLitterman,
    Self::HRP,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Markowitz => "markowitz",
      Self::RiskParity => "risk_parity",
      Self::Sharpe => "sharpe",
      Self::BlackLitterman => "black_litterman",
      Self::HRP => "hrp",
    }
  }
}

impl FromStr for OptimizerMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    let key = s.trim().to_lowercase();
    Self::ALL
      .into_iter()
      .find(|m| m.as_str() == key)
      .ok_or_else(|| PortfolioError::UnsupportedStrategy(s.to_string()))
  }
}

impl Display for OptimizerMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Optional caller constraints. Which ones a strategy honors is decided by
/// [`Constraints::applicable_to`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_weight: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_weight: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_return: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_volatility: Option<f64>,
}

impl Constraints {
  /// Explicit targets take precedence over the ones inside the record.
  pub fn with_targets(mut self, target_return: Option<f64>, target_volatility: Option<f64>) -> Self {
    if target_return.is_some() {
      self.target_return = target_return;
    }
    if target_volatility.is_some() {
      self.target_volatility = target_volatility;
    }
    self
  }

  /// Subset of the constraints honored by `method`.
  pub fn applicable_to(&self, method: OptimizerMethod) -> Self {
    match method {
      OptimizerMethod::Markowitz => *self,
      OptimizerMethod::Sharpe | OptimizerMethod::BlackLitterman => Self {
        min_weight: self.min_weight,
        max_weight: self.max_weight,
        ..Self::default()
      },
      OptimizerMethod::RiskParity | OptimizerMethod::HRP => Self::default(),
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  pub fn validate(&self) -> Result<()> {
    let fields = [
      ("min_weight", self.min_weight),
      ("max_weight", self.max_weight),
      ("target_return", self.target_return),
      ("target_volatility", self.target_volatility),
    ];
    for (name, value) in fields {
      if let Some(v) = value {
        if !v.is_finite() {
          return Err(PortfolioError::validation(format!("{name} must be finite, got {v}")));
        }
      }
    }

    if let Some(lo) = self.min_weight {
      if lo > 1.0 {
        return Err(PortfolioError::validation(format!(
          "min_weight {lo} exceeds a fully invested single asset"
        )));
      }
    }
    if let Some(hi) = self.max_weight {
      if hi < 0.0 {
        return Err(PortfolioError::validation(format!(
          "max_weight {hi} is negative for a long-only portfolio"
        )));
      }
    }
    if let (Some(lo), Some(hi)) = (self.min_weight, self.max_weight) {
      if lo > hi {
        return Err(PortfolioError::validation(format!(
          "min_weight {lo} is greater than max_weight {hi}"
        )));
      }
    }
    if let Some(vol) = self.target_volatility {
      if vol < 0.0 {
        return Err(PortfolioError::validation(format!(
          "target_volatility {vol} is negative"
        )));
      }
    }

    Ok(())
  }
}

/// Investor views for Black-Litterman.
///
/// `picks` is the K×N pick matrix P, `expected` the K view returns Q and
/// `uncertainty` the diagonal of Ω. Without views the historical means act as
/// absolute views.
#[derive(ImplNew, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlackLittermanViews {
  pub picks: Vec<Vec<f64>>,
  pub expected: Vec<f64>,
  #[serde(default)]
  pub uncertainty: Option<Vec<f64>>,
  /// Equilibrium weights for the prior; equal weights when absent.
  #[serde(default)]
  pub market_weights: Option<Vec<f64>>,
}

/// Weight vector produced by a strategy, before it is keyed by asset.
#[derive(Clone, Debug)]
pub struct Allocation {
  pub weights: Vec<f64>,
  pub report: SolverReport,
}

/// Ordered asset → value map. Keeps the asset universe order when serialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssetWeights {
  assets: Vec<String>,
  values: Vec<f64>,
}

impl AssetWeights {
  pub fn new(assets: Vec<String>, values: Vec<f64>) -> Result<Self> {
    if assets.len() != values.len() {
      return Err(PortfolioError::validation(format!(
        "{} assets but {} weights",
        assets.len(),
        values.len()
      )));
    }
    let mut out = Self::default();
    for (asset, value) in assets.into_iter().zip(values) {
      out.insert(asset, value);
    }
    Ok(out)
  }

  pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
    let mut out = Self::default();
    for (asset, value) in pairs {
      out.insert(asset.into(), value);
    }
    out
  }

  /// Insert or overwrite the value of `asset`.
  pub fn insert(&mut self, asset: String, value: f64) {
    match self.assets.iter().position(|a| *a == asset) {
      Some(idx) => self.values[idx] = value,
      None => {
        self.assets.push(asset);
        self.values.push(value);
      }
    }
  }

  pub fn get(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|idx| self.values[idx])
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
    self
      .assets
      .iter()
      .zip(self.values.iter())
      .map(|(a, &v)| (a.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn sum(&self) -> f64 {
    self.values.iter().sum()
  }
}

impl Serialize for AssetWeights {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.len()))?;
    for (asset, value) in self.iter() {
      map.serialize_entry(asset, &value)?;
    }
    map.end()
  }
}

struct AssetWeightsVisitor;

impl<'de> Visitor<'de> for AssetWeightsVisitor {
  type Value = AssetWeights;

  fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("a map of asset identifiers to weights")
  }

  fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<AssetWeights, A::Error> {
    let mut out = AssetWeights::default();
    while let Some((asset, value)) = access.next_entry::<String, f64>()? {
      out.insert(asset, value);
    }
    Ok(out)
  }
}

impl<'de> Deserialize<'de> for AssetWeights {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    deserializer.deserialize_map(AssetWeightsVisitor)
  }
}

/// Output of [`crate::portfolio::PortfolioEngine::optimize_portfolio`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationResult {
  pub optimization_type: OptimizerMethod,
  pub risk_tolerance: RiskTolerance,
  pub optimal_weights: AssetWeights,
  pub portfolio_metrics: PortfolioMetrics,
  /// Constraints the selected strategy actually enforced.
  pub constraints_applied: Constraints,
  pub optimization_timestamp: DateTime<Utc>,
  pub risk_parameters: RiskParameters,
  pub risk_assessment: RiskAssessment,
  pub solver: SolverReport,
}

//! # Portfolio Data Utilities
//!
//! $$
//! \hat\mu_j=\frac1T\sum_{t=1}^T r_{tj},\qquad
//! \hat\Sigma_{jk}=\frac1{T-1}\sum_{t=1}^T (r_{tj}-\hat\mu_j)(r_{tk}-\hat\mu_k)
//! $$
//!
//! Returns matrix validation and moment estimation.

use std::collections::HashSet;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;

use crate::error::PortfolioError;
use crate::error::Result;

/// T×N matrix of periodic fractional returns; rows are dates, columns assets.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnsMatrix {
  assets: Vec<String>,
  data: Array2<f64>,
}

impl ReturnsMatrix {
  pub fn new(assets: Vec<String>, data: Array2<f64>) -> Result<Self> {
    if assets.is_empty() {
      return Err(PortfolioError::validation("asset universe is empty"));
    }

    let mut seen = HashSet::with_capacity(assets.len());
    for asset in &assets {
      if !seen.insert(asset.as_str()) {
        return Err(PortfolioError::validation(format!(
          "duplicate asset identifier `{asset}`"
        )));
      }
    }

    if data.ncols() != assets.len() {
      return Err(PortfolioError::validation(format!(
        "returns matrix has {} columns for {} assets",
        data.ncols(),
        assets.len()
      )));
    }

    if data.nrows() < 2 {
      return Err(PortfolioError::validation(format!(
        "need at least 2 return observations, got {}",
        data.nrows()
      )));
    }

    if let Some(((t, j), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
      return Err(PortfolioError::validation(format!(
        "non-finite return {v} for `{}` at row {t}",
        assets[j]
      )));
    }

    Ok(Self { assets, data })
  }

  /// Build from row-major observations.
  pub fn from_rows(assets: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
    let n = assets.len();
    if let Some((t, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
      return Err(PortfolioError::validation(format!(
        "row {t} has {} values for {n} assets",
        row.len()
      )));
    }

    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    let data = Array2::from_shape_vec((rows.len(), n), flat)
      .map_err(|e| PortfolioError::validation(e.to_string()))?;
    Self::new(assets, data)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn data(&self) -> &Array2<f64> {
    &self.data
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn n_observations(&self) -> usize {
    self.data.nrows()
  }
}

/// Arithmetic mean of each asset column.
pub fn mean_returns(returns: &ReturnsMatrix) -> Array1<f64> {
  returns
    .data
    .mean_axis(Axis(0))
    .unwrap_or_else(|| Array1::zeros(returns.n_assets()))
}

/// Sample covariance with an N−1 denominator.
pub fn covariance(returns: &ReturnsMatrix) -> Result<Array2<f64>> {
  let cov = returns
    .data
    .t()
    .cov(1.0)
    .map_err(|e| PortfolioError::validation(format!("covariance estimation failed: {e}")))?;

  // symmetrize round-off
  let n = cov.nrows();
  Ok(Array2::from_shape_fn((n, n), |(i, j)| {
    0.5 * (cov[[i, j]] + cov[[j, i]])
  }))
}

/// Per-asset standard deviations from the covariance diagonal.
pub fn asset_volatilities(cov: &Array2<f64>) -> Array1<f64> {
  cov.diag().mapv(|v| v.max(0.0).sqrt())
}

pub fn correlation_from_covariance(cov: &Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sigma = asset_volatilities(cov);

  Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      return 1.0;
    }
    let denom = sigma[i] * sigma[j];
    if denom > 1e-15 {
      (cov[[i, j]] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

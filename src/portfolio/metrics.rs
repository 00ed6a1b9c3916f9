//! # Portfolio Metrics
//!
//! $$
//! \mu_p=\mathbf w^\top\mu,\quad \sigma_p=\sqrt{\mathbf w^\top\Sigma\mathbf w},\quad
//! DR=\frac{\mathbf w^\top\sigma}{\sigma_p},\quad HHI=\sum_i w_i^2
//! $$
//!
//! Risk/return figures derived from a weight vector.

use ndarray::Array1;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;

use super::data::asset_volatilities;
use crate::traits::view;

/// Multiplier of the drawdown heuristic `max_drawdown_approx = k * volatility`.
pub const DRAWDOWN_VOLATILITY_MULTIPLIER: f64 = 2.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
  pub expected_return: f64,
  pub volatility: f64,
  /// `(expected_return - r_f) / volatility`, 0 for a riskless portfolio.
  pub sharpe_ratio: f64,
  /// Rough heuristic (2 × volatility). Not a simulated drawdown and not a bound.
  pub max_drawdown_approx: f64,
  pub diversification_ratio: f64,
  /// Herfindahl index, in `[1/N, 1]` for long-only fully invested weights.
  pub concentration_index: f64,
}

impl PortfolioMetrics {
  pub fn compute(w: &[f64], mu: &Array1<f64>, cov: &Array2<f64>, risk_free: f64) -> Self {
    let wv = view(w);
    let expected_return = wv.dot(mu);
    let volatility = portfolio_variance(w, cov).max(0.0).sqrt();

    let sharpe_ratio = if volatility > 0.0 {
      (expected_return - risk_free) / volatility
    } else {
      0.0
    };

    let weighted_vol = wv.dot(&asset_volatilities(cov));
    let diversification_ratio = if volatility > 0.0 {
      weighted_vol / volatility
    } else {
      1.0
    };

    Self {
      expected_return,
      volatility,
      sharpe_ratio,
      max_drawdown_approx: volatility * DRAWDOWN_VOLATILITY_MULTIPLIER,
      diversification_ratio,
      concentration_index: w.iter().map(|x| x * x).sum(),
    }
  }
}

pub fn portfolio_variance(w: &[f64], cov: &Array2<f64>) -> f64 {
  let wv = view(w);
  wv.dot(&cov.dot(&wv))
}

/// Share of portfolio volatility carried by each asset, `w_i (Σw)_i / σ_p`.
pub fn risk_contributions(w: &[f64], cov: &Array2<f64>) -> Array1<f64> {
  let wv = view(w);
  let sigma_w = cov.dot(&wv);
  let vol = wv.dot(&sigma_w).max(0.0).sqrt();
  if vol > 0.0 {
    &wv * &sigma_w / vol
  } else {
    Array1::zeros(w.len())
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn concentration_bounds() {
    let mu = array![0.01, 0.02, 0.03, 0.04];
    let cov = Array2::from_diag(&array![0.04, 0.09, 0.01, 0.16]);

    let single = PortfolioMetrics::compute(&[0.0, 1.0, 0.0, 0.0], &mu, &cov, 0.02);
    assert_abs_diff_eq!(single.concentration_index, 1.0, epsilon = 1e-15);

    let equal = PortfolioMetrics::compute(&[0.25; 4], &mu, &cov, 0.02);
    assert_abs_diff_eq!(equal.concentration_index, 0.25, epsilon = 1e-15);
  }

  #[test]
  fn metric_formulas() {
    let mu = array![0.10, 0.05];
    let cov = array![[0.04, 0.0], [0.0, 0.01]];
    let m = PortfolioMetrics::compute(&[0.5, 0.5], &mu, &cov, 0.02);

    let vol = (0.25f64 * 0.04 + 0.25 * 0.01).sqrt();
    assert_abs_diff_eq!(m.expected_return, 0.075, epsilon = 1e-12);
    assert_abs_diff_eq!(m.volatility, vol, epsilon = 1e-12);
    assert_abs_diff_eq!(m.sharpe_ratio, (0.075 - 0.02) / vol, epsilon = 1e-12);
    assert_abs_diff_eq!(m.max_drawdown_approx, 2.0 * vol, epsilon = 1e-12);
    assert_abs_diff_eq!(m.diversification_ratio, 0.15 / vol, epsilon = 1e-12);
    assert!(m.diversification_ratio >= 1.0);
  }

  #[test]
  fn riskless_portfolio_guards_division() {
    let mu = array![0.01, 0.01];
    let cov = Array2::zeros((2, 2));
    let m = PortfolioMetrics::compute(&[0.5, 0.5], &mu, &cov, 0.02);
    assert_eq!(m.volatility, 0.0);
    assert_eq!(m.sharpe_ratio, 0.0);
    assert_eq!(m.diversification_ratio, 1.0);
  }

  #[test]
  fn risk_contributions_sum_to_volatility() {
    let cov = array![[0.04, 0.006], [0.006, 0.01]];
    let w = [0.3, 0.7];
    let rc = risk_contributions(&w, &cov);
    assert_abs_diff_eq!(rc.sum(), portfolio_variance(&w, &cov).sqrt(), epsilon = 1e-12);
  }
}

//! # Rebalancing
//!
//! $$
//! \Delta_i = w^{target}_i - w^{current}_i,\qquad
//! C = c\sum_{|\Delta_i|>\theta}|\Delta_i|
//! $$
//!
//! Trade list between two weight maps under a no-trade threshold.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::types::AssetWeights;
use crate::error::PortfolioError;
use crate::error::Result;

/// Trades needed to move from one allocation to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalancingPlan {
  /// Signed weight change per traded asset; positive means buy.
  pub trades: AssetWeights,
  pub total_transaction_cost: f64,
  pub threshold: f64,
  pub trade_count: usize,
  /// `Σ|Δ|` over the kept trades.
  pub turnover: f64,
}

impl RebalancingPlan {
  pub fn is_empty(&self) -> bool {
    self.trades.is_empty()
  }
}

fn check_rate(name: &str, value: f64) -> Result<()> {
  if !value.is_finite() || value < 0.0 {
    return Err(PortfolioError::validation(format!(
      "{name} must be a non-negative number, got {value}"
    )));
  }
  Ok(())
}

/// Keep the weight changes strictly larger than `threshold` and charge
/// `transaction_costs` per unit of traded weight.
///
/// Assets held on only one side count as weight 0 on the other. Trades follow
/// the order of `current`, then assets new in `target`.
pub fn rebalance_portfolio(
  current: &AssetWeights,
  target: &AssetWeights,
  transaction_costs: f64,
  threshold: f64,
) -> Result<RebalancingPlan> {
  check_rate("transaction_costs", transaction_costs)?;
  check_rate("threshold", threshold)?;

  let universe = current
    .assets()
    .iter()
    .chain(target.assets().iter().filter(|a| current.get(a).is_none()));

  let mut trades = AssetWeights::default();
  for asset in universe {
    let from = current.get(asset).unwrap_or(0.0);
    let to = target.get(asset).unwrap_or(0.0);
    if !(from.is_finite() && to.is_finite()) {
      return Err(PortfolioError::validation(format!(
        "non-finite weight for `{asset}`"
      )));
    }

    let delta = to - from;
    if delta.abs() > threshold {
      trades.insert(asset.clone(), delta);
    }
  }

  let turnover: f64 = trades.values().iter().map(|d| d.abs()).sum();
  let plan = RebalancingPlan {
    trade_count: trades.len(),
    total_transaction_cost: turnover * transaction_costs,
    threshold,
    turnover,
    trades,
  };

  debug!(
    trades = plan.trade_count,
    turnover = plan.turnover,
    cost = plan.total_transaction_cost,
    "rebalancing plan built"
  );
  Ok(plan)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn weights(pairs: &[(&str, f64)]) -> AssetWeights {
    AssetWeights::from_pairs(pairs.iter().copied())
  }

  #[test]
  fn identical_weights_need_no_trades() {
    let w = weights(&[("AAPL", 0.4), ("MSFT", 0.6)]);
    let plan = rebalance_portfolio(&w, &w, 0.001, 0.0).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.trade_count, 0);
    assert_eq!(plan.total_transaction_cost, 0.0);
  }

  #[test]
  fn small_drift_below_threshold_is_ignored() {
    let current = weights(&[("A", 0.5), ("B", 0.5)]);
    let target = weights(&[("A", 0.52), ("B", 0.48)]);
    let plan = rebalance_portfolio(&current, &target, 0.001, 0.05).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.threshold, 0.05);
  }

  #[test]
  fn drift_above_threshold_is_traded() {
    let current = weights(&[("A", 0.5), ("B", 0.5)]);
    let target = weights(&[("A", 0.52), ("B", 0.48)]);
    let plan = rebalance_portfolio(&current, &target, 0.001, 0.01).unwrap();

    assert_eq!(plan.trade_count, 2);
    assert_abs_diff_eq!(plan.trades.get("A").unwrap(), 0.02, epsilon = 1e-12);
    assert_abs_diff_eq!(plan.trades.get("B").unwrap(), -0.02, epsilon = 1e-12);
    assert_abs_diff_eq!(plan.turnover, 0.04, epsilon = 1e-12);
    assert_abs_diff_eq!(plan.total_transaction_cost, 0.04 * 0.001, epsilon = 1e-15);
  }

  #[test]
  fn threshold_is_strict() {
    let current = weights(&[("A", 0.5), ("B", 0.5)]);
    let target = weights(&[("A", 0.75), ("B", 0.25)]);
    let plan = rebalance_portfolio(&current, &target, 0.0, 0.25).unwrap();
    assert!(plan.is_empty());
  }

  #[test]
  fn assets_on_one_side_count_as_zero() {
    let current = weights(&[("OLD", 0.3), ("KEEP", 0.7)]);
    let target = weights(&[("KEEP", 0.7), ("NEW", 0.3)]);
    let plan = rebalance_portfolio(&current, &target, 0.01, 0.05).unwrap();

    assert_eq!(plan.trades.assets(), ["OLD", "NEW"]);
    assert_abs_diff_eq!(plan.trades.get("OLD").unwrap(), -0.3, epsilon = 1e-12);
    assert_abs_diff_eq!(plan.trades.get("NEW").unwrap(), 0.3, epsilon = 1e-12);
    assert_abs_diff_eq!(plan.total_transaction_cost, 0.006, epsilon = 1e-12);
  }

  #[test]
  fn negative_inputs_are_rejected() {
    let w = weights(&[("A", 1.0)]);
    assert!(matches!(
      rebalance_portfolio(&w, &w, -0.001, 0.05),
      Err(PortfolioError::Validation(_))
    ));
    assert!(rebalance_portfolio(&w, &w, 0.001, -1.0).is_err());
    assert!(rebalance_portfolio(&w, &w, f64::NAN, 0.05).is_err());
  }
}

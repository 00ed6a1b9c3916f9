//! # Portfolio Optimizers
//!
//! $$
//! \mathbf w^*=\arg\min_{\mathbf w\in\Delta_{[l,u]}} f(\mathbf w)
//! $$
//!
//! Long-only allocation strategies. Markowitz, Risk Parity, Max-Sharpe and
//! Black-Litterman minimize an [`ObjectiveExt`] through the shared
//! [`ConstrainedSolver`]; HRP is closed form.

use nalgebra::DMatrix;
use nalgebra::DVector;
use ndarray::Array1;
use ndarray::Array2;

use super::data::correlation_from_covariance;
use super::metrics::portfolio_variance;
use super::metrics::risk_contributions;
use super::solver::ConstrainedSolver;
use super::solver::FeasibleSet;
use super::solver::SolverReport;
use super::types::Allocation;
use super::types::BlackLittermanViews;
use super::types::Constraints;
use super::types::OptimizerMethod;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::traits::view;
use crate::traits::ConstraintExt;
use crate::traits::ObjectiveExt;

/// Scalar on the prior covariance, τ.
pub const BL_TAU: f64 = 0.05;
/// Market risk aversion, δ.
pub const BL_RISK_AVERSION: f64 = 2.5;

/// Estimated moments plus everything a strategy may read.
#[derive(Clone, Debug)]
pub struct AllocationInputs<'a> {
  pub mean: &'a Array1<f64>,
  pub cov: &'a Array2<f64>,
  pub constraints: Constraints,
  pub risk_free: f64,
  pub views: Option<&'a BlackLittermanViews>,
}

impl<'a> AllocationInputs<'a> {
  pub fn new(mean: &'a Array1<f64>, cov: &'a Array2<f64>) -> Self {
    Self {
      mean,
      cov,
      constraints: Constraints::default(),
      risk_free: 0.0,
      views: None,
    }
  }

  pub fn n_assets(&self) -> usize {
    self.mean.len()
  }

  fn check_dimensions(&self) -> Result<()> {
    let n = self.mean.len();
    if n == 0 {
      return Err(PortfolioError::validation("cannot allocate across zero assets"));
    }
    if self.cov.dim() != (n, n) {
      return Err(PortfolioError::validation(format!(
        "covariance is {:?} for {n} mean returns",
        self.cov.dim()
      )));
    }
    Ok(())
  }
}

/// Portfolio variance `wᵀΣw`.
pub struct MinVariance<'a> {
  pub cov: &'a Array2<f64>,
}

impl ObjectiveExt for MinVariance<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    portfolio_variance(w, self.cov)
  }

  fn name(&self) -> &'static str {
    "minimum variance"
  }
}

/// `-(wᵀμ - r_f) / σ_p`, zero for a riskless portfolio.
pub struct NegativeSharpe<'a> {
  pub mean: &'a Array1<f64>,
  pub cov: &'a Array2<f64>,
  pub risk_free: f64,
}

impl ObjectiveExt for NegativeSharpe<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    let vol = portfolio_variance(w, self.cov).max(0.0).sqrt();
    if vol == 0.0 {
      return 0.0;
    }
    -(view(w).dot(self.mean) - self.risk_free) / vol
  }

  fn name(&self) -> &'static str {
    "negative sharpe"
  }
}

/// Population variance of the risk contributions.
pub struct RiskContributionDispersion<'a> {
  pub cov: &'a Array2<f64>,
}

impl ObjectiveExt for RiskContributionDispersion<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    let rc = risk_contributions(w, self.cov);
    rc.var(0.0)
  }

  fn name(&self) -> &'static str {
    "risk contribution dispersion"
  }
}

/// Negative mean-variance utility `-(wᵀμ - δ/2 wᵀΣw)`.
pub struct MeanVarianceUtility<'a> {
  pub mean: &'a Array1<f64>,
  pub cov: &'a Array2<f64>,
  pub risk_aversion: f64,
}

impl ObjectiveExt for MeanVarianceUtility<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    let ret = view(w).dot(self.mean);
    -(ret - 0.5 * self.risk_aversion * portfolio_variance(w, self.cov))
  }

  fn name(&self) -> &'static str {
    "mean-variance utility"
  }
}

/// `wᵀμ = target`, scaled by the magnitude of the target.
pub struct TargetReturn<'a> {
  mean: &'a Array1<f64>,
  target: f64,
  scale: f64,
}

impl<'a> TargetReturn<'a> {
  pub fn new(mean: &'a Array1<f64>, target: f64) -> Self {
    let largest = mean.iter().fold(0.0f64, |acc, m| acc.max(m.abs()));
    Self {
      mean,
      target,
      scale: target.abs().max(largest).max(1e-8),
    }
  }
}

impl ConstraintExt for TargetReturn<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    (view(w).dot(self.mean) - self.target) / self.scale
  }

  fn is_equality(&self) -> bool {
    true
  }

  fn label(&self) -> String {
    format!("target_return = {}", self.target)
  }
}

/// `σ_p <= target`.
pub struct MaxVolatility<'a> {
  cov: &'a Array2<f64>,
  target: f64,
}

impl<'a> MaxVolatility<'a> {
  pub fn new(cov: &'a Array2<f64>, target: f64) -> Self {
    Self { cov, target }
  }
}

impl ConstraintExt for MaxVolatility<'_> {
  fn value(&self, w: &[f64]) -> f64 {
    let vol = portfolio_variance(w, self.cov).max(0.0).sqrt();
    (self.target - vol) / self.target.max(1e-8)
  }

  fn is_equality(&self) -> bool {
    false
  }

  fn label(&self) -> String {
    format!("volatility <= {}", self.target)
  }
}

/// Minimum-variance allocation with optional return/volatility targets and
/// weight bounds.
pub fn optimize_markowitz(inputs: &AllocationInputs, solver: &ConstrainedSolver) -> Result<Allocation> {
  inputs.check_dimensions()?;
  let c = &inputs.constraints;
  let feasible = FeasibleSet::bounded(inputs.n_assets(), c.min_weight, c.max_weight)?;

  let mut constraints: Vec<Box<dyn ConstraintExt + '_>> = Vec::new();
  if let Some(target) = c.target_return {
    constraints.push(Box::new(TargetReturn::new(inputs.mean, target)));
  }
  if let Some(target) = c.target_volatility {
    constraints.push(Box::new(MaxVolatility::new(inputs.cov, target)));
  }

  let objective = MinVariance { cov: inputs.cov };
  solver.minimize(
    OptimizerMethod::Markowitz.as_str(),
    &objective,
    &constraints,
    &feasible,
  )
}

/// Equal risk contribution. Expected returns and weight bounds are ignored.
pub fn optimize_risk_parity(inputs: &AllocationInputs, solver: &ConstrainedSolver) -> Result<Allocation> {
  inputs.check_dimensions()?;
  let feasible = FeasibleSet::long_only(inputs.n_assets())?;
  let objective = RiskContributionDispersion { cov: inputs.cov };
  solver.minimize(
    OptimizerMethod::RiskParity.as_str(),
    &objective,
    &[],
    &feasible,
  )
}

/// Maximum Sharpe ratio within the weight bounds.
pub fn optimize_sharpe(inputs: &AllocationInputs, solver: &ConstrainedSolver) -> Result<Allocation> {
  inputs.check_dimensions()?;
  let c = &inputs.constraints;
  let feasible = FeasibleSet::bounded(inputs.n_assets(), c.min_weight, c.max_weight)?;
  let objective = NegativeSharpe {
    mean: inputs.mean,
    cov: inputs.cov,
    risk_free: inputs.risk_free,
  };
  solver.minimize(OptimizerMethod::Sharpe.as_str(), &objective, &[], &feasible)
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
  DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn singular(n: usize, what: &str) -> PortfolioError {
  PortfolioError::Computation {
    strategy: OptimizerMethod::BlackLitterman.as_str(),
    n_assets: n,
    detail: format!("{what} is singular"),
  }
}

/// Black-Litterman posterior expected returns
/// `μ_BL = [(τΣ)⁻¹ + PᵀΩ⁻¹P]⁻¹ [(τΣ)⁻¹π + PᵀΩ⁻¹Q]` with `π = δΣw_mkt`.
///
/// Without views, the historical means are taken as absolute views with
/// `Ω = τ diag(PΣPᵀ)`.
pub fn black_litterman_posterior(
  mean: &Array1<f64>,
  cov: &Array2<f64>,
  views: Option<&BlackLittermanViews>,
) -> Result<Array1<f64>> {
  let n = mean.len();
  if n == 0 || cov.dim() != (n, n) {
    return Err(PortfolioError::validation(format!(
      "covariance is {:?} for {n} mean returns",
      cov.dim()
    )));
  }
  let sigma = to_dmatrix(cov);
  let tau_sigma_inv = (&sigma * BL_TAU)
    .try_inverse()
    .ok_or_else(|| singular(n, "scaled covariance τΣ"))?;

  let w_mkt = match views.and_then(|v| v.market_weights.as_ref()) {
    Some(w) if w.len() != n => {
      return Err(PortfolioError::validation(format!(
        "{} market weights for {n} assets",
        w.len()
      )));
    }
    Some(w) => DVector::from_column_slice(w),
    None => DVector::from_element(n, 1.0 / n as f64),
  };
  let pi = &sigma * &w_mkt * BL_RISK_AVERSION;

  let (p, q) = match views {
    Some(v) => {
      let k = v.picks.len();
      if k == 0 || v.expected.len() != k {
        return Err(PortfolioError::validation(format!(
          "{k} view rows but {} expected returns",
          v.expected.len()
        )));
      }
      if let Some(row) = v.picks.iter().find(|row| row.len() != n) {
        return Err(PortfolioError::validation(format!(
          "view row has {} entries for {n} assets",
          row.len()
        )));
      }
      (
        DMatrix::from_fn(k, n, |i, j| v.picks[i][j]),
        DVector::from_column_slice(&v.expected),
      )
    }
    None => (
      DMatrix::identity(n, n),
      DVector::from_iterator(n, mean.iter().copied()),
    ),
  };
  let k = p.nrows();

  let omega = match views.and_then(|v| v.uncertainty.as_ref()) {
    Some(u) => {
      if u.len() != k || u.iter().any(|x| !(x.is_finite() && *x > 0.0)) {
        return Err(PortfolioError::validation(
          "view uncertainties must be one positive value per view",
        ));
      }
      DVector::from_column_slice(u)
    }
    None => (&p * &sigma * p.transpose()).diagonal() * BL_TAU,
  };
  // zero-variance view portfolio under a positive definite Σ means an all-zero pick row
  if omega.iter().any(|o| *o <= 0.0 || !o.is_finite()) {
    return Err(PortfolioError::validation("every view must pick at least one asset"));
  }
  let omega_inv = DMatrix::from_diagonal(&omega.map(|o| 1.0 / o));

  let pt_omega_inv = p.transpose() * omega_inv;
  let m = &tau_sigma_inv + &pt_omega_inv * &p;
  let m_inv = m
    .try_inverse()
    .ok_or_else(|| singular(n, "posterior precision"))?;

  let posterior = m_inv * (&tau_sigma_inv * pi + pt_omega_inv * q);
  if posterior.iter().any(|x| !x.is_finite()) {
    return Err(PortfolioError::Computation {
      strategy: OptimizerMethod::BlackLitterman.as_str(),
      n_assets: n,
      detail: "posterior returns are not finite".into(),
    });
  }

  Ok(posterior.iter().copied().collect())
}

/// Mean-variance weights on the Black-Litterman posterior.
pub fn optimize_black_litterman(
  inputs: &AllocationInputs,
  solver: &ConstrainedSolver,
) -> Result<Allocation> {
  inputs.check_dimensions()?;
  let posterior = black_litterman_posterior(inputs.mean, inputs.cov, inputs.views)?;
  let c = &inputs.constraints;
  let feasible = FeasibleSet::bounded(inputs.n_assets(), c.min_weight, c.max_weight)?;
  let objective = MeanVarianceUtility {
    mean: &posterior,
    cov: inputs.cov,
    risk_aversion: BL_RISK_AVERSION,
  };
  solver.minimize(
    OptimizerMethod::BlackLitterman.as_str(),
    &objective,
    &[],
    &feasible,
  )
}

/// Hierarchical Risk Parity.
pub fn optimize_hrp(inputs: &AllocationInputs) -> Result<Allocation> {
  inputs.check_dimensions()?;
  let n = inputs.n_assets();
  let report = SolverReport::closed_form("hierarchical allocation");

  if n == 1 {
    return Ok(Allocation {
      weights: vec![1.0],
      report,
    });
  }

  let corr = correlation_from_covariance(inputs.cov);
  let dist = corr.mapv(|c| ((1.0 - c).max(0.0) / 2.0).sqrt());
  let order = hrp_seriation(&dist);

  let mut weights = vec![1.0; n];
  hrp_recursive_bisect(&order, inputs.cov, &mut weights);

  let wsum: f64 = weights.iter().sum();
  if wsum > 1e-15 {
    for w in &mut weights {
      *w /= wsum;
    }
  }

  Ok(Allocation { weights, report })
}

/// Single-linkage clustering on the correlation distance. Returns the leaf
/// order of the dendrogram, so correlated assets end up adjacent.
fn hrp_seriation(dist: &Array2<f64>) -> Vec<usize> {
  let n = dist.nrows();
  if n <= 1 {
    return (0..n).collect();
  }

  let mut left_child: Vec<usize> = Vec::with_capacity(n - 1);
  let mut right_child: Vec<usize> = Vec::with_capacity(n - 1);
  let mut active = vec![true; n];
  let mut d = dist.clone();
  let mut node_id: Vec<usize> = (0..n).collect();

  for step in 0..(n - 1) {
    let mut min_d = f64::INFINITY;
    let mut mi = 0;
    let mut mj = 0;

    for i in (0..n).filter(|&i| active[i]) {
      for j in ((i + 1)..n).filter(|&j| active[j]) {
        if d[[i, j]] < min_d {
          min_d = d[[i, j]];
          mi = i;
          mj = j;
        }
      }
    }

    left_child.push(node_id[mi]);
    right_child.push(node_id[mj]);
    node_id[mi] = n + step;
    active[mj] = false;

    for k in (0..n).filter(|&k| active[k] && k != mi) {
      let merged = d[[mi, k]].min(d[[mj, k]]);
      d[[mi, k]] = merged;
      d[[k, mi]] = merged;
    }
  }

  fn collect_leaves(node: usize, n: usize, left: &[usize], right: &[usize], out: &mut Vec<usize>) {
    if node < n {
      out.push(node);
    } else {
      let idx = node - n;
      collect_leaves(left[idx], n, left, right, out);
      collect_leaves(right[idx], n, left, right, out);
    }
  }

  let mut order = Vec::with_capacity(n);
  collect_leaves(2 * n - 2, n, &left_child, &right_child, &mut order);
  order
}

/// Split the seriated order in halves and weight each half inversely to its
/// cluster variance, recursing until single assets remain.
fn hrp_recursive_bisect(order: &[usize], cov: &Array2<f64>, weights: &mut [f64]) {
  if order.len() <= 1 {
    return;
  }

  let (left, right) = order.split_at(order.len() / 2);
  let var_left = hrp_cluster_var(left, cov);
  let var_right = hrp_cluster_var(right, cov);

  let denom = var_left + var_right;
  let alpha = if denom > 1e-30 {
    1.0 - var_left / denom
  } else {
    0.5
  };

  for &i in left {
    weights[i] *= alpha;
  }
  for &i in right {
    weights[i] *= 1.0 - alpha;
  }

  hrp_recursive_bisect(left, cov, weights);
  hrp_recursive_bisect(right, cov, weights);
}

/// Variance of the inverse-variance portfolio of a cluster.
fn hrp_cluster_var(indices: &[usize], cov: &Array2<f64>) -> f64 {
  match indices {
    [] => return 0.0,
    [i] => return cov[[*i, *i]],
    _ => {}
  }

  let inv_vars: Vec<f64> = indices
    .iter()
    .map(|&i| {
      let v = cov[[i, i]];
      if v > 1e-15 { 1.0 / v } else { 0.0 }
    })
    .collect();

  let total: f64 = inv_vars.iter().sum();
  if total < 1e-15 {
    return 1.0;
  }

  let mut var = 0.0;
  for (a, &i) in indices.iter().enumerate() {
    for (b, &j) in indices.iter().enumerate() {
      var += inv_vars[a] * inv_vars[b] * cov[[i, j]];
    }
  }
  var / (total * total)
}

/// Dispatch to the selected strategy.
pub fn optimize_with_method(
  method: OptimizerMethod,
  inputs: &AllocationInputs,
  solver: &ConstrainedSolver,
) -> Result<Allocation> {
  match method {
    OptimizerMethod::Markowitz => optimize_markowitz(inputs, solver),
    OptimizerMethod::RiskParity => optimize_risk_parity(inputs, solver),
    OptimizerMethod::Sharpe => optimize_sharpe(inputs, solver),
    OptimizerMethod::BlackLitterman => optimize_black_litterman(inputs, solver),
    OptimizerMethod::HRP => optimize_hrp(inputs),
  }
}

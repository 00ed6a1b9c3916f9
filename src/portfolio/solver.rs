//! # Constrained Solver
//!
//! $$
//! \min_{\mathbf w\in\Delta_{[l,u]}} f(\mathbf w)
//! +\sum_j\Big(\lambda_j h_j(\mathbf w)+\tfrac\rho2 h_j(\mathbf w)^2\Big)
//! +\sum_k\frac{\max(0,\nu_k-\rho g_k(\mathbf w))^2-\nu_k^2}{2\rho}
//! $$
//!
//! Shared minimizer for the weight-based strategies. Bounds and the budget
//! constraint are enforced exactly by projecting every trial point onto the
//! box-simplex $\Delta_{[l,u]}=\{\mathbf w: \mathbf 1^\top\mathbf w=1,\ l\le w_i\le u\}$;
//! nonlinear equalities $h_j=0$ and inequalities $g_k\ge0$ go through an
//! augmented-Lagrangian outer loop. Each inner problem is solved with argmin's
//! Nelder-Mead.

use std::cell::Cell;
use std::cell::RefCell;
use std::time::Instant;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::solver::neldermead::NelderMead;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::types::Allocation;
use crate::config::SolverConfig;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::traits::ConstraintExt;
use crate::traits::ObjectiveExt;

const TIME_LIMIT_REACHED: &str = "time limit reached";
const COST_CEILING: f64 = 1e10;
const MAX_PENALTY: f64 = 1e8;

/// Long-only weights with a common lower/upper bound that sum to one.
#[derive(Clone, Debug, PartialEq)]
pub struct FeasibleSet {
  lower: Vec<f64>,
  upper: Vec<f64>,
}

impl FeasibleSet {
  /// `0 <= w_i <= 1`, `sum(w) = 1`.
  pub fn long_only(n: usize) -> Result<Self> {
    Self::bounded(n, None, None)
  }

  /// Intersect `[0, 1]` with the optional caller bounds.
  pub fn bounded(n: usize, min_weight: Option<f64>, max_weight: Option<f64>) -> Result<Self> {
    if n == 0 {
      return Err(PortfolioError::validation("cannot allocate across zero assets"));
    }

    let lo = min_weight.unwrap_or(0.0).max(0.0);
    let hi = max_weight.unwrap_or(1.0).min(1.0);

    if lo > hi {
      return Err(PortfolioError::validation(format!(
        "weight bounds [{lo}, {hi}] are empty"
      )));
    }
    if lo * n as f64 > 1.0 + 1e-12 {
      return Err(PortfolioError::validation(format!(
        "min_weight {lo} across {n} assets exceeds full investment"
      )));
    }
    if hi * (n as f64) < 1.0 - 1e-12 {
      return Err(PortfolioError::validation(format!(
        "max_weight {hi} across {n} assets cannot reach full investment"
      )));
    }

    Ok(Self {
      lower: vec![lo; n],
      upper: vec![hi; n],
    })
  }

  pub fn dim(&self) -> usize {
    self.lower.len()
  }

  /// Euclidean projection: `w_i = clamp(v_i - θ, l_i, u_i)` with `θ` chosen so
  /// the weights sum to one.
  pub fn project(&self, v: &[f64]) -> Vec<f64> {
    let n = self.dim();
    let total = |theta: f64| -> f64 {
      (0..n)
        .map(|i| (v[i] - theta).clamp(self.lower[i], self.upper[i]))
        .sum()
    };

    // total(a) = sum(upper) >= 1 and total(b) = sum(lower) <= 1
    let mut a = (0..n)
      .map(|i| v[i] - self.upper[i])
      .fold(f64::INFINITY, f64::min);
    let mut b = (0..n)
      .map(|i| v[i] - self.lower[i])
      .fold(f64::NEG_INFINITY, f64::max);

    for _ in 0..200 {
      let mid = 0.5 * (a + b);
      if mid <= a || mid >= b {
        break;
      }
      if total(mid) > 1.0 {
        a = mid;
      } else {
        b = mid;
      }
    }

    let theta = 0.5 * (a + b);
    (0..n)
      .map(|i| (v[i] - theta).clamp(self.lower[i], self.upper[i]))
      .collect()
  }

  /// Equal weights pulled onto the set.
  pub fn equal_weights(&self) -> Vec<f64> {
    let n = self.dim();
    self.project(&vec![1.0 / n as f64; n])
  }

  pub fn contains(&self, w: &[f64], tol: f64) -> bool {
    w.len() == self.dim()
      && (w.iter().sum::<f64>() - 1.0).abs() <= tol
      && w
        .iter()
        .zip(self.lower.iter().zip(self.upper.iter()))
        .all(|(&x, (&lo, &hi))| x >= lo - tol && x <= hi + tol)
  }
}

/// Convergence diagnostics attached to every optimization result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
  pub converged: bool,
  /// Nelder-Mead iterations summed over all outer rounds.
  pub iterations: u64,
  pub cost_evaluations: u64,
  pub outer_rounds: usize,
  /// Largest remaining nonlinear constraint violation (scaled units).
  pub constraint_violation: f64,
  pub termination: String,
}

impl SolverReport {
  /// Report for allocations that need no iterative solve.
  pub fn closed_form(termination: &str) -> Self {
    Self {
      converged: true,
      iterations: 0,
      cost_evaluations: 0,
      outer_rounds: 0,
      constraint_violation: 0.0,
      termination: termination.to_string(),
    }
  }
}

#[derive(Default)]
struct Tracker {
  best: RefCell<Option<(Vec<f64>, f64)>>,
  evaluations: Cell<u64>,
  timed_out: Cell<bool>,
}

impl Tracker {
  fn record(&self, w: &[f64], cost: f64) {
    self.evaluations.set(self.evaluations.get() + 1);
    let mut best = self.best.borrow_mut();
    let improved = best.as_ref().map_or(true, |(_, c)| cost < *c);
    if improved {
      *best = Some((w.to_vec(), cost));
    }
  }
}

/// Augmented-Lagrangian cost seen by Nelder-Mead.
struct PenalizedCost<'a> {
  objective: &'a dyn ObjectiveExt,
  constraints: &'a [Box<dyn ConstraintExt + 'a>],
  feasible: &'a FeasibleSet,
  scale: f64,
  multipliers: &'a [f64],
  penalty: f64,
  deadline: Option<Instant>,
  tracker: &'a Tracker,
}

impl CostFunction for PenalizedCost<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    if let Some(deadline) = self.deadline {
      if Instant::now() >= deadline {
        self.tracker.timed_out.set(true);
        return Err(argmin::core::Error::msg(TIME_LIMIT_REACHED));
      }
    }

    let w = self.feasible.project(x);
    let mut value = self.objective.value(&w) / self.scale;

    for (c, &lambda) in self.constraints.iter().zip(self.multipliers) {
      let g = c.value(&w);
      if c.is_equality() {
        value += lambda * g + 0.5 * self.penalty * g * g;
      } else {
        let shifted = (lambda - self.penalty * g).max(0.0);
        value += (shifted * shifted - lambda * lambda) / (2.0 * self.penalty);
      }
    }

    let value = if value.is_finite() { value } else { COST_CEILING };
    self.tracker.record(&w, value);
    Ok(value)
  }
}

fn violation(constraints: &[Box<dyn ConstraintExt + '_>], w: &[f64]) -> f64 {
  constraints
    .iter()
    .map(|c| {
      let g = c.value(w);
      if c.is_equality() {
        g.abs()
      } else {
        (-g).max(0.0)
      }
    })
    .fold(0.0, f64::max)
}

fn build_simplex(x: &[f64], step: f64) -> Vec<Vec<f64>> {
  let mut simplex = Vec::with_capacity(x.len() + 1);
  simplex.push(x.to_vec());
  for i in 0..x.len() {
    let mut point = x.to_vec();
    point[i] += step;
    simplex.push(point);
  }
  simplex
}

fn describe(reason: Option<&TerminationReason>) -> String {
  match reason {
    Some(TerminationReason::SolverConverged) => "converged".to_string(),
    Some(TerminationReason::MaxItersReached) => "maximum iterations reached".to_string(),
    Some(other) => format!("{other:?}"),
    None => "not terminated".to_string(),
  }
}

/// Bounded, constrained minimizer shared by Markowitz, Max-Sharpe and
/// Black-Litterman (and Risk Parity without extra constraints).
#[derive(Clone, Debug, Default)]
pub struct ConstrainedSolver {
  config: SolverConfig,
}

impl ConstrainedSolver {
  pub fn new(config: SolverConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &SolverConfig {
    &self.config
  }

  /// Minimize `objective` over `feasible` subject to `constraints`, starting
  /// from equal weights. Never fails on non-convergence; the returned report
  /// says whether the result is optimal.
  pub fn minimize(
    &self,
    strategy: &'static str,
    objective: &dyn ObjectiveExt,
    constraints: &[Box<dyn ConstraintExt + '_>],
    feasible: &FeasibleSet,
  ) -> Result<Allocation> {
    let n = feasible.dim();
    if n == 1 {
      return Ok(Allocation {
        weights: vec![1.0],
        report: SolverReport::closed_form("single asset"),
      });
    }

    let x0 = feasible.equal_weights();

    let deadline = self.config.time_limit().map(|d| Instant::now() + d);
    let step = self.config.initial_step;

    let scale = build_simplex(&x0, step)
      .iter()
      .map(|p| objective.value(&feasible.project(p)).abs())
      .filter(|v| v.is_finite())
      .fold(0.0, f64::max);
    let scale = if scale > 1e-12 { scale } else { 1.0 };

    let rounds = if constraints.is_empty() {
      1
    } else {
      self.config.max_outer_rounds
    };

    let mut x = x0;
    let mut multipliers = vec![0.0; constraints.len()];
    let mut penalty = self.config.initial_penalty;
    let mut prev_violation = f64::INFINITY;
    let mut current_violation = 0.0;
    let mut iterations = 0u64;
    let mut evaluations = 0u64;
    let mut inner_converged = false;
    let mut timed_out = false;
    let mut termination = String::new();
    let mut outer_rounds = 0;

    for round in 0..rounds {
      outer_rounds = round + 1;
      let tracker = Tracker::default();
      let problem = PenalizedCost {
        objective,
        constraints,
        feasible,
        scale,
        multipliers: &multipliers,
        penalty,
        deadline,
        tracker: &tracker,
      };

      let round_step = (step * 0.5f64.powi(round as i32)).max(1e-4);
      let solver = NelderMead::new(build_simplex(&x, round_step))
        .with_sd_tolerance(self.config.sd_tolerance)
        .map_err(|e| PortfolioError::Computation {
          strategy,
          n_assets: n,
          detail: e.to_string(),
        })?;

      let run = Executor::new(problem, solver)
        .configure(|state| state.max_iters(self.config.max_iters))
        .run();

      match run {
        Ok(res) => {
          iterations += res.state.get_iter();
          let reason = res.state.get_termination_reason();
          inner_converged = matches!(reason, Some(TerminationReason::SolverConverged));
          termination = describe(reason);
        }
        Err(_) if tracker.timed_out.get() => {
          timed_out = true;
          inner_converged = false;
          termination = TIME_LIMIT_REACHED.to_string();
        }
        Err(e) => {
          return Err(PortfolioError::Computation {
            strategy,
            n_assets: n,
            detail: e.to_string(),
          });
        }
      }

      evaluations += tracker.evaluations.get();
      if let Some((w, _)) = tracker.best.take() {
        x = w;
      } else if !timed_out {
        return Err(PortfolioError::Computation {
          strategy,
          n_assets: n,
          detail: "objective produced no finite value".to_string(),
        });
      }

      current_violation = violation(constraints, &x);
      if timed_out || current_violation <= self.config.constraint_tolerance {
        break;
      }

      for (c, lambda) in constraints.iter().zip(multipliers.iter_mut()) {
        let g = c.value(&x);
        *lambda = if c.is_equality() {
          *lambda + penalty * g
        } else {
          (*lambda - penalty * g).max(0.0)
        };
      }
      if current_violation > 0.25 * prev_violation {
        penalty = (penalty * 10.0).min(MAX_PENALTY);
      }
      prev_violation = current_violation;
    }

    let feasible_enough = current_violation <= self.config.constraint_tolerance;
    if !feasible_enough && !timed_out {
      let labels: Vec<String> = constraints.iter().map(|c| c.label()).collect();
      termination = format!(
        "constraint violation {current_violation:.3e} above tolerance ({})",
        labels.join(", ")
      );
    }

    let report = SolverReport {
      converged: inner_converged && feasible_enough && !timed_out,
      iterations,
      cost_evaluations: evaluations,
      outer_rounds,
      constraint_violation: current_violation,
      termination,
    };

    debug!(
      strategy,
      iterations = report.iterations,
      rounds = report.outer_rounds,
      converged = report.converged,
      "{} finished: {}",
      objective.name(),
      report.termination
    );

    Ok(Allocation {
      weights: feasible.project(&x),
      report,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  struct Distance(Vec<f64>);

  impl ObjectiveExt for Distance {
    fn value(&self, w: &[f64]) -> f64 {
      w.iter().zip(&self.0).map(|(a, b)| (a - b).powi(2)).sum()
    }
  }

  struct FirstWeightEquals(f64);

  impl ConstraintExt for FirstWeightEquals {
    fn value(&self, w: &[f64]) -> f64 {
      w[0] - self.0
    }

    fn is_equality(&self) -> bool {
      true
    }

    fn label(&self) -> String {
      format!("w0 = {}", self.0)
    }
  }

  struct FirstWeightAtMost(f64);

  impl ConstraintExt for FirstWeightAtMost {
    fn value(&self, w: &[f64]) -> f64 {
      self.0 - w[0]
    }

    fn is_equality(&self) -> bool {
      false
    }

    fn label(&self) -> String {
      format!("w0 <= {}", self.0)
    }
  }

  #[test]
  fn projection_lands_on_box_simplex() {
    let set = FeasibleSet::bounded(4, Some(0.05), Some(0.4)).unwrap();
    for v in [
      vec![10.0, -3.0, 0.2, 0.1],
      vec![0.25, 0.25, 0.25, 0.25],
      vec![-1.0, -1.0, -1.0, 5.0],
    ] {
      let w = set.project(&v);
      assert!(set.contains(&w, 1e-12), "{w:?}");
    }
  }

  #[test]
  fn projection_is_identity_inside_the_set() {
    let set = FeasibleSet::long_only(3).unwrap();
    let w = set.project(&[0.2, 0.3, 0.5]);
    assert_abs_diff_eq!(w[0], 0.2, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 0.3, epsilon = 1e-12);
    assert_abs_diff_eq!(w[2], 0.5, epsilon = 1e-12);
  }

  #[test]
  fn infeasible_bounds_are_rejected() {
    assert!(FeasibleSet::bounded(4, Some(0.3), None).is_err());
    assert!(FeasibleSet::bounded(4, None, Some(0.2)).is_err());
    assert!(FeasibleSet::bounded(4, Some(0.25), Some(0.25)).is_ok());
    assert!(FeasibleSet::bounded(0, None, None).is_err());
  }

  #[test]
  fn finds_interior_minimum() {
    let set = FeasibleSet::long_only(3).unwrap();
    let solver = ConstrainedSolver::default();
    let target = Distance(vec![0.6, 0.3, 0.1]);
    let out = solver.minimize("test", &target, &[], &set).unwrap();

    assert!(out.report.converged, "{:?}", out.report);
    for (w, t) in out.weights.iter().zip(&target.0) {
      assert_abs_diff_eq!(*w, *t, epsilon = 1e-4);
    }
  }

  #[test]
  fn minimum_outside_set_lands_on_boundary() {
    let set = FeasibleSet::long_only(2).unwrap();
    let out = ConstrainedSolver::default()
      .minimize("test", &Distance(vec![1.5, -0.5]), &[], &set)
      .unwrap();
    assert_abs_diff_eq!(out.weights[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(out.weights[1], 0.0, epsilon = 1e-6);
  }

  #[test]
  fn equality_constraint_is_enforced() {
    let set = FeasibleSet::long_only(3).unwrap();
    let constraints: Vec<Box<dyn ConstraintExt>> = vec![Box::new(FirstWeightEquals(0.7))];
    let out = ConstrainedSolver::default()
      .minimize("test", &Distance(vec![1.0 / 3.0; 3]), &constraints, &set)
      .unwrap();

    assert_abs_diff_eq!(out.weights[0], 0.7, epsilon = 1e-4);
    assert_abs_diff_eq!(out.weights[1], 0.15, epsilon = 1e-3);
    assert_abs_diff_eq!(out.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn inequality_constraint_is_enforced() {
    let set = FeasibleSet::long_only(2).unwrap();
    let constraints: Vec<Box<dyn ConstraintExt>> = vec![Box::new(FirstWeightAtMost(0.6))];
    let out = ConstrainedSolver::default()
      .minimize("test", &Distance(vec![0.9, 0.1]), &constraints, &set)
      .unwrap();

    assert!(out.weights[0] <= 0.6 + 1e-4, "{:?}", out.weights);
    assert_abs_diff_eq!(out.weights[0], 0.6, epsilon = 1e-3);
  }

  #[test]
  fn exhausted_time_budget_returns_start_point() {
    let set = FeasibleSet::long_only(3).unwrap();
    let solver = ConstrainedSolver::new(SolverConfig {
      time_limit_ms: Some(0),
      ..SolverConfig::default()
    });
    let out = solver
      .minimize("test", &Distance(vec![0.6, 0.3, 0.1]), &[], &set)
      .unwrap();

    assert!(!out.report.converged);
    assert_eq!(out.report.termination, "time limit reached");
    assert!(set.contains(&out.weights, 1e-9));
  }

  #[test]
  fn iteration_cap_is_reported_as_non_convergence() {
    let set = FeasibleSet::long_only(5).unwrap();
    let solver = ConstrainedSolver::new(SolverConfig {
      max_iters: 2,
      ..SolverConfig::default()
    });
    let out = solver
      .minimize("test", &Distance(vec![0.5, 0.2, 0.1, 0.1, 0.1]), &[], &set)
      .unwrap();

    assert!(!out.report.converged);
    assert_eq!(out.report.termination, "maximum iterations reached");
    assert!(set.contains(&out.weights, 1e-9));
  }
}

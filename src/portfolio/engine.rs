//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\hat\mu, \hat\Sigma, \text{method}, \text{constraints})
//! $$
//!
//! High-level orchestration: estimation, strategy dispatch, metrics and risk
//! assessment.

use chrono::Utc;
use rayon::prelude::*;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::data::covariance;
use super::data::mean_returns;
use super::data::ReturnsMatrix;
use super::message::OptimizationRequest;
use super::message::OptimizationResponse;
use super::metrics::PortfolioMetrics;
use super::optimizers::optimize_with_method;
use super::optimizers::AllocationInputs;
use super::rebalance::RebalancingPlan;
use super::risk::RiskTolerance;
use super::solver::ConstrainedSolver;
use super::solver::SolverReport;
use super::types::AssetWeights;
use super::types::OptimizationResult;
use super::types::OptimizerMethod;
use crate::config::ConvergencePolicy;
use crate::config::EngineConfig;
use crate::error::PortfolioError;
use crate::error::Result;

/// Stateless optimization engine; holds configuration only.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: EngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  ///
  /// The configuration is validated here, so hand-built settings get the same
  /// checks as [`EngineConfig::from_file`].
  pub fn new(config: EngineConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Optimize weights for `returns` with the method, tolerance and constraints
  /// named in `request`.
  pub fn optimize_portfolio(
    &self,
    returns: &ReturnsMatrix,
    request: &OptimizationRequest,
  ) -> Result<OptimizationResult> {
    let method: OptimizerMethod = request.optimization_type.parse()?;
    let risk_tolerance = RiskTolerance::resolve(&request.risk_tolerance);
    let risk_parameters = risk_tolerance.parameters();

    let n = returns.n_assets();
    let t = returns.n_observations();
    if t <= n {
      if self.config.require_full_rank_history {
        return Err(PortfolioError::validation(format!(
          "{t} observations for {n} assets; covariance would be singular"
        )));
      }
      warn!(
        observations = t,
        assets = n,
        "return history is too short for a full-rank covariance"
      );
    }

    let mean = mean_returns(returns);
    let cov = covariance(returns)?;

    let constraints = request
      .constraints
      .with_targets(request.target_return, request.target_volatility);
    constraints.validate()?;

    let inputs = AllocationInputs {
      mean: &mean,
      cov: &cov,
      constraints,
      risk_free: self.config.risk_free_rate,
      views: request.views.as_ref(),
    };
    let solver = ConstrainedSolver::new(self.config.solver.clone());
    let allocation = optimize_with_method(method, &inputs, &solver)?;
    self.apply_convergence_policy(method, n, &allocation.report)?;

    let portfolio_metrics =
      PortfolioMetrics::compute(&allocation.weights, &mean, &cov, self.config.risk_free_rate);
    let risk_assessment = risk_parameters.assess(&portfolio_metrics);
    let optimal_weights = AssetWeights::new(returns.assets().to_vec(), allocation.weights)?;

    info!(
      request = %request.id,
      method = %method,
      assets = n,
      expected_return = portfolio_metrics.expected_return,
      volatility = portfolio_metrics.volatility,
      "portfolio optimized"
    );

    Ok(OptimizationResult {
      optimization_type: method,
      risk_tolerance,
      optimal_weights,
      portfolio_metrics,
      constraints_applied: constraints.applicable_to(method),
      optimization_timestamp: Utc::now(),
      risk_parameters,
      risk_assessment,
      solver: allocation.report,
    })
  }

  fn apply_convergence_policy(
    &self,
    method: OptimizerMethod,
    n_assets: usize,
    report: &SolverReport,
  ) -> Result<()> {
    if report.converged {
      return Ok(());
    }

    match self.config.solver.convergence_policy {
      ConvergencePolicy::FailFast => Err(PortfolioError::NonConvergence {
        strategy: method.as_str(),
        n_assets,
        iterations: report.iterations,
        reason: report.termination.clone(),
      }),
      ConvergencePolicy::BestEffort => {
        if self.config.solver.warn_on_non_convergence {
          warn!(
            iterations = report.iterations,
            "{method} optimization did not converge ({}); using best iterate",
            report.termination
          );
        } else {
          debug!(
            iterations = report.iterations,
            "{method} optimization did not converge ({}); using best iterate",
            report.termination
          );
        }
        Ok(())
      }
    }
  }

  /// Run independent requests in parallel. Results keep the input order.
  pub fn optimize_batch(
    &self,
    jobs: &[(ReturnsMatrix, OptimizationRequest)],
  ) -> Vec<Result<OptimizationResult>> {
    jobs
      .par_iter()
      .map(|(returns, request)| self.optimize_portfolio(returns, request))
      .collect()
  }

  /// See [`super::rebalance::rebalance_portfolio`].
  pub fn rebalance_portfolio(
    &self,
    current: &AssetWeights,
    target: &AssetWeights,
    transaction_costs: f64,
    threshold: f64,
  ) -> Result<RebalancingPlan> {
    super::rebalance::rebalance_portfolio(current, target, transaction_costs, threshold)
  }

  /// Answer a request envelope. Errors become `status = "error"` responses.
  pub fn respond(&self, returns: &ReturnsMatrix, request: &OptimizationRequest) -> OptimizationResponse {
    info!(request = %request.id, "processing portfolio optimization request");
    match self.optimize_portfolio(returns, request) {
      Ok(result) => OptimizationResponse::success(request.id.clone(), result),
      Err(e) => {
        error!(request = %request.id, "portfolio optimization failed: {e}");
        OptimizationResponse::failure(request.id.clone(), &e)
      }
    }
  }

  /// Decode a JSON request payload and answer it.
  pub fn handle_request(&self, returns: &ReturnsMatrix, payload: &str) -> OptimizationResponse {
    match serde_json::from_str::<OptimizationRequest>(payload) {
      Ok(request) => self.respond(returns, &request),
      Err(e) => {
        let err = PortfolioError::validation(format!("malformed request: {e}"));
        error!("{err}");
        OptimizationResponse::failure("unknown", &err)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use ndarray::Array2;
  use ndarray::Axis;
  use ndarray_rand::RandomExt;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use rand_distr::Normal;
  use tracing_test::traced_test;

  use super::*;
  use crate::config::SolverConfig;
  use crate::portfolio::message::ResponseStatus;
  use crate::portfolio::types::Constraints;

  const ASSETS: [&str; 4] = ["AAPL", "MSFT", "GOOGL", "TLT"];

  /// Daily returns driven by one market factor plus idiosyncratic noise.
  fn synthetic_returns(rows: usize, seed: u64) -> ReturnsMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let market = Array2::random_using((rows, 1), Normal::new(0.0004, 0.01).unwrap(), &mut rng);
    let noise = Array2::random_using((rows, 4), Normal::new(0.0, 0.01).unwrap(), &mut rng);

    let betas = [1.2, 1.0, 1.1, -0.2];
    let idio = [1.5, 1.0, 1.3, 0.5];
    let drift = [0.0006, 0.0005, 0.0004, 0.0001];

    let mut data = noise;
    for (j, mut col) in data.axis_iter_mut(Axis(1)).enumerate() {
      for (t, x) in col.iter_mut().enumerate() {
        *x = drift[j] + betas[j] * market[[t, 0]] + idio[j] * *x;
      }
    }

    ReturnsMatrix::new(ASSETS.iter().map(|s| s.to_string()).collect(), data).unwrap()
  }

  fn request(method: &str) -> OptimizationRequest {
    OptimizationRequest::new(method, "moderate")
  }

  #[test]
  fn every_method_produces_a_complete_result() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(250, 7);

    for method in OptimizerMethod::ALL {
      let result = engine
        .optimize_portfolio(&returns, &request(method.as_str()))
        .unwrap();

      assert_eq!(result.optimization_type, method);
      assert_eq!(result.optimal_weights.assets(), ASSETS);
      assert!((result.optimal_weights.sum() - 1.0).abs() < 1e-6);
      assert!(result.optimal_weights.values().iter().all(|&w| (0.0..=1.0).contains(&w)));
      assert!(result.portfolio_metrics.volatility > 0.0);
      let hhi = result.portfolio_metrics.concentration_index;
      assert!((0.25 - 1e-9..=1.0 + 1e-9).contains(&hhi));
      assert_eq!(result.risk_parameters, RiskTolerance::Moderate.parameters());
    }
  }

  #[test]
  fn unknown_method_fails_before_any_work() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(50, 1);
    let err = engine
      .optimize_portfolio(&returns, &request("min_cvar"))
      .unwrap_err();
    assert!(matches!(err, PortfolioError::UnsupportedStrategy(ref m) if m == "min_cvar"));
  }

  #[test]
  fn unknown_tolerance_resolves_to_moderate() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(100, 2);
    let result = engine
      .optimize_portfolio(&returns, &OptimizationRequest::new("hrp", "yolo"))
      .unwrap();
    assert_eq!(result.risk_tolerance, RiskTolerance::Moderate);
  }

  #[test]
  fn applied_constraints_follow_the_method() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(250, 3);
    let constraints = Constraints {
      min_weight: Some(0.05),
      max_weight: Some(0.6),
      ..Constraints::default()
    };

    let req = request("risk_parity").with_constraints(constraints);
    let rp = engine.optimize_portfolio(&returns, &req).unwrap();
    assert!(rp.constraints_applied.is_empty());

    let req = request("markowitz")
      .with_constraints(constraints)
      .with_targets(None, Some(0.5));
    let mk = engine.optimize_portfolio(&returns, &req).unwrap();
    assert_eq!(mk.constraints_applied.min_weight, Some(0.05));
    assert_eq!(mk.constraints_applied.target_volatility, Some(0.5));
    assert!(mk.optimal_weights.values().iter().all(|&w| w >= 0.05 - 1e-9 && w <= 0.6 + 1e-9));
  }

  #[test]
  fn explicit_targets_override_the_constraint_record() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(250, 4);
    let req = request("markowitz")
      .with_constraints(Constraints {
        target_volatility: Some(0.9),
        ..Constraints::default()
      })
      .with_targets(None, Some(0.5));
    let result = engine.optimize_portfolio(&returns, &req).unwrap();
    assert_eq!(result.constraints_applied.target_volatility, Some(0.5));
  }

  #[test]
  fn contradictory_constraints_are_rejected() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(100, 5);
    let req = request("sharpe").with_constraints(Constraints {
      min_weight: Some(0.3),
      ..Constraints::default()
    });
    let err = engine.optimize_portfolio(&returns, &req).unwrap_err();
    assert!(matches!(err, PortfolioError::Validation(_)));
  }

  #[test]
  #[traced_test]
  fn short_history_is_logged() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(3, 6);
    let result = engine.optimize_portfolio(&returns, &request("hrp"));
    assert!(result.is_ok());
    assert!(logs_contain("too short for a full-rank covariance"));
  }

  #[test]
  fn short_history_can_be_rejected() {
    let engine = PortfolioEngine::new(EngineConfig {
      require_full_rank_history: true,
      ..EngineConfig::default()
    })
    .unwrap();
    let returns = synthetic_returns(4, 6);
    let err = engine
      .optimize_portfolio(&returns, &request("markowitz"))
      .unwrap_err();
    assert!(matches!(err, PortfolioError::Validation(_)));
  }

  fn starved_solver(policy: ConvergencePolicy) -> PortfolioEngine {
    PortfolioEngine::new(EngineConfig {
      solver: SolverConfig {
        max_iters: 1,
        convergence_policy: policy,
        ..SolverConfig::default()
      },
      ..EngineConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn invalid_solver_settings_are_rejected_at_construction() {
    let err = PortfolioEngine::new(EngineConfig {
      solver: SolverConfig {
        initial_step: 0.0,
        ..SolverConfig::default()
      },
      ..EngineConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, PortfolioError::Config(ref msg) if msg.contains("initial_step")));

    let err = PortfolioEngine::new(EngineConfig {
      risk_free_rate: f64::NAN,
      ..EngineConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, PortfolioError::Config(_)));
  }

  #[test]
  fn fail_fast_surfaces_non_convergence() {
    let engine = starved_solver(ConvergencePolicy::FailFast);
    let returns = synthetic_returns(250, 8);
    let err = engine
      .optimize_portfolio(&returns, &request("markowitz"))
      .unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::NonConvergence {
        strategy: "markowitz",
        n_assets: 4,
        ..
      }
    ));
  }

  #[test]
  #[traced_test]
  fn best_effort_warns_and_returns_weights() {
    let engine = starved_solver(ConvergencePolicy::BestEffort);
    let returns = synthetic_returns(250, 8);
    let result = engine
      .optimize_portfolio(&returns, &request("sharpe"))
      .unwrap();

    assert!(!result.solver.converged);
    assert!((result.optimal_weights.sum() - 1.0).abs() < 1e-6);
    assert!(logs_contain("did not converge"));
  }

  #[test]
  fn batch_matches_sequential_runs_in_order() {
    let engine = PortfolioEngine::default();
    let jobs: Vec<_> = OptimizerMethod::ALL
      .iter()
      .enumerate()
      .map(|(i, m)| (synthetic_returns(120, i as u64), request(m.as_str())))
      .collect();

    let batch = engine.optimize_batch(&jobs);
    assert_eq!(batch.len(), jobs.len());
    for ((returns, req), out) in jobs.iter().zip(batch) {
      let out = out.unwrap();
      let single = engine.optimize_portfolio(returns, req).unwrap();
      assert_eq!(out.optimization_type, single.optimization_type);
      assert_eq!(out.optimal_weights, single.optimal_weights);
    }
  }

  #[test]
  fn request_envelope_round_trip() {
    let engine = PortfolioEngine::default();
    let returns = synthetic_returns(120, 9);

    let ok = engine.handle_request(&returns, r#"{"id": "r1", "optimization_type": "hrp"}"#);
    assert_eq!(ok.status, ResponseStatus::Success);
    assert_eq!(ok.id, "r1");
    assert!(ok.message.as_deref().unwrap_or_default().contains("hrp"));

    let bad = engine.handle_request(&returns, r#"{"id": "r2", "optimization_type": "magic"}"#);
    assert_eq!(bad.status, ResponseStatus::Error);
    assert_eq!(bad.id, "r2");
    assert!(bad.optimization_result.is_none());

    let garbage = engine.handle_request(&returns, "not json");
    assert!(!garbage.is_success());
    assert_eq!(garbage.id, "unknown");
  }
}

//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Long-only portfolio optimization and rebalancing.

pub mod data;
pub mod engine;
pub mod message;
pub mod metrics;
pub mod optimizers;
pub mod rebalance;
pub mod risk;
pub mod solver;
pub mod types;

pub use data::correlation_from_covariance;
pub use data::covariance;
pub use data::mean_returns;
pub use data::ReturnsMatrix;
pub use engine::PortfolioEngine;
pub use message::OptimizationRequest;
pub use message::OptimizationResponse;
pub use message::ResponseStatus;
pub use message::REQUEST_TOPIC;
pub use message::RESPONSE_TOPIC;
pub use metrics::risk_contributions;
pub use metrics::PortfolioMetrics;
pub use optimizers::black_litterman_posterior;
pub use optimizers::optimize_black_litterman;
pub use optimizers::optimize_hrp;
pub use optimizers::optimize_markowitz;
pub use optimizers::optimize_risk_parity;
pub use optimizers::optimize_sharpe;
pub use optimizers::optimize_with_method;
pub use optimizers::AllocationInputs;
pub use rebalance::rebalance_portfolio;
pub use rebalance::RebalancingPlan;
pub use risk::RiskAssessment;
pub use risk::RiskParameters;
pub use risk::RiskTolerance;
pub use solver::ConstrainedSolver;
pub use solver::FeasibleSet;
pub use solver::SolverReport;
pub use types::Allocation;
pub use types::AssetWeights;
pub use types::BlackLittermanViews;
pub use types::Constraints;
pub use types::OptimizationResult;
pub use types::OptimizerMethod;

//! Command-line interface for the portfolio optimizer.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use csv::ReaderBuilder;
use csv::StringRecord;
use portfolio_rs::config::EngineConfig;
use portfolio_rs::portfolio::covariance;
use portfolio_rs::portfolio::risk_contributions;
use portfolio_rs::portfolio::AssetWeights;
use portfolio_rs::portfolio::Constraints;
use portfolio_rs::portfolio::OptimizationRequest;
use portfolio_rs::portfolio::OptimizationResult;
use portfolio_rs::portfolio::PortfolioEngine;
use portfolio_rs::portfolio::RebalancingPlan;
use portfolio_rs::portfolio::ReturnsMatrix;
use prettytable::row;
use prettytable::Table;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Long-only portfolio optimization and rebalancing.
#[derive(Parser)]
#[command(name = "portfolio-rs")]
#[command(version)]
#[command(about = "Optimize portfolio weights from historical returns")]
struct Cli {
  /// Output format
  #[arg(short, long, value_enum, default_value = "text", global = true)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compute optimal weights from a CSV of periodic returns
  Optimize {
    /// CSV with one column per asset; a leading date column is skipped
    #[arg(short, long)]
    returns: PathBuf,

    /// markowitz, risk_parity, sharpe, black_litterman or hrp
    #[arg(short, long, default_value = "markowitz")]
    method: String,

    /// low, moderate or high
    #[arg(long, default_value = "moderate")]
    risk_tolerance: String,

    #[arg(long)]
    min_weight: Option<f64>,

    #[arg(long)]
    max_weight: Option<f64>,

    #[arg(long)]
    target_return: Option<f64>,

    #[arg(long)]
    target_volatility: Option<f64>,

    /// Engine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
  },

  /// Build the trade list between two weight files
  Rebalance {
    /// JSON object of current weights
    #[arg(long)]
    current: PathBuf,

    /// JSON object of target weights
    #[arg(long)]
    target: PathBuf,

    /// Cost per unit of traded weight
    #[arg(long, default_value = "0.001")]
    transaction_costs: f64,

    /// Minimum absolute weight change worth trading
    #[arg(long, default_value = "0.05")]
    threshold: f64,
  },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
  Text,
  Json,
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Optimize {
      returns,
      method,
      risk_tolerance,
      min_weight,
      max_weight,
      target_return,
      target_volatility,
      config,
    } => {
      let config = match config {
        Some(path) => EngineConfig::from_file(&path)
          .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
      };
      let engine = PortfolioEngine::new(config)?;
      let returns = load_returns(&returns)?;
      info!(
        assets = returns.n_assets(),
        observations = returns.n_observations(),
        "returns loaded"
      );

      let request = OptimizationRequest::new(method, risk_tolerance)
        .with_id("cli")
        .with_constraints(Constraints {
          min_weight,
          max_weight,
          ..Constraints::default()
        })
        .with_targets(target_return, target_volatility);

      let result = engine.optimize_portfolio(&returns, &request)?;
      match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_result(&result, &returns)?,
      }
    }
    Commands::Rebalance {
      current,
      target,
      transaction_costs,
      threshold,
    } => {
      let current = load_weights(&current)?;
      let target = load_weights(&target)?;
      let plan = PortfolioEngine::default().rebalance_portfolio(
        &current,
        &target,
        transaction_costs,
        threshold,
      )?;
      match cli.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => print_plan(&plan),
      }
    }
  }

  Ok(())
}

fn is_date_header(name: &str) -> bool {
  matches!(
    name.trim().to_lowercase().as_str(),
    "" | "date" | "datetime" | "timestamp" | "time"
  )
}

/// A first column is an index when its header names a date (or is blank, as
/// pandas writes it) or when its first value is not numeric while the rest are.
fn has_index_column(headers: &StringRecord, first: Option<&StringRecord>) -> bool {
  if headers.get(0).is_some_and(is_date_header) {
    return true;
  }
  first.is_some_and(|record| {
    record.len() > 1
      && record.get(0).is_some_and(|f| f.parse::<f64>().is_err())
      && record.iter().skip(1).all(|f| f.parse::<f64>().is_ok())
  })
}

fn load_returns(path: &Path) -> anyhow::Result<ReturnsMatrix> {
  let mut reader = ReaderBuilder::new()
    .has_headers(true)
    .trim(csv::Trim::All)
    .from_path(path)
    .with_context(|| format!("opening {}", path.display()))?;

  let headers = reader.headers()?.clone();
  let records = reader
    .records()
    .collect::<Result<Vec<StringRecord>, _>>()
    .with_context(|| format!("reading {}", path.display()))?;

  let skip = has_index_column(&headers, records.first()) as usize;
  let assets: Vec<String> = headers.iter().skip(skip).map(str::to_string).collect();
  if assets.is_empty() {
    bail!("{} has no asset columns", path.display());
  }

  let mut rows = Vec::with_capacity(records.len());
  for (line, record) in records.iter().enumerate() {
    let row = record
      .iter()
      .skip(skip)
      .map(|field| {
        field
          .parse::<f64>()
          .with_context(|| format!("row {}: `{field}` is not a number", line + 1))
      })
      .collect::<anyhow::Result<Vec<f64>>>()?;
    rows.push(row);
  }

  Ok(ReturnsMatrix::from_rows(assets, &rows)?)
}

fn load_weights(path: &Path) -> anyhow::Result<AssetWeights> {
  let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("parsing weights in {}", path.display()))
}

fn print_result(result: &OptimizationResult, returns: &ReturnsMatrix) -> anyhow::Result<()> {
  let cov = covariance(returns)?;
  let rc = risk_contributions(result.optimal_weights.values(), &cov);
  let vol = result.portfolio_metrics.volatility;

  println!(
    "{} allocation ({} risk tolerance)",
    result.optimization_type, result.risk_tolerance
  );

  let mut table = Table::new();
  table.add_row(row!["Asset", "Weight", "Risk share"]);
  for ((asset, w), c) in result.optimal_weights.iter().zip(rc.iter()) {
    let share = if vol > 0.0 { c / vol } else { 0.0 };
    table.add_row(row![asset, format!("{:.4}", w), format!("{:.2}%", share * 100.0)]);
  }
  table.printstd();

  let m = &result.portfolio_metrics;
  let a = &result.risk_assessment;
  let mut metrics = Table::new();
  metrics.add_row(row!["Expected return", format!("{:.6}", m.expected_return)]);
  metrics.add_row(row!["Volatility", format!("{:.6}", m.volatility)]);
  metrics.add_row(row!["Sharpe ratio", format!("{:.4}", m.sharpe_ratio)]);
  metrics.add_row(row!["Max drawdown (2σ approx.)", format!("{:.6}", m.max_drawdown_approx)]);
  metrics.add_row(row!["Diversification ratio", format!("{:.4}", m.diversification_ratio)]);
  metrics.add_row(row!["Concentration (HHI)", format!("{:.4}", m.concentration_index)]);
  metrics.add_row(row!["Within volatility limit", a.within_volatility_limit]);
  metrics.add_row(row!["Meets diversification", a.meets_diversification]);
  metrics.printstd();

  let s = &result.solver;
  if !s.converged {
    println!(
      "warning: solver stopped after {} iterations: {}",
      s.iterations, s.termination
    );
  }
  Ok(())
}

fn print_plan(plan: &RebalancingPlan) {
  if plan.is_empty() {
    println!("No trades above threshold {}", plan.threshold);
    return;
  }

  let mut table = Table::new();
  table.add_row(row!["Asset", "Side", "Δ weight"]);
  for (asset, delta) in plan.trades.iter() {
    let side = if delta > 0.0 { "buy" } else { "sell" };
    table.add_row(row![asset, side, format!("{:+.4}", delta)]);
  }
  table.printstd();
  println!(
    "{} trades, turnover {:.4}, transaction cost {:.6}",
    plan.trade_count, plan.turnover, plan.total_transaction_cost
  );
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tempfile::NamedTempFile;

  use super::*;

  fn csv_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file
  }

  #[test]
  fn named_date_column_is_skipped() {
    let file = csv_file("Date,A,B\n2024-01-02,0.01,0.02\n2024-01-03,-0.01,0.03\n2024-01-04,0.02,-0.01\n");
    let returns = load_returns(file.path()).unwrap();
    assert_eq!(returns.assets(), ["A", "B"]);
    assert_eq!(returns.n_observations(), 3);
  }

  #[test]
  fn blank_index_header_is_skipped() {
    let file = csv_file(",A,B\n2024-01-02,0.01,0.02\n2024-01-03,-0.01,0.03\n2024-01-04,0.02,-0.01\n");
    let returns = load_returns(file.path()).unwrap();
    assert_eq!(returns.assets(), ["A", "B"]);
    assert_eq!(returns.n_observations(), 3);
  }

  #[test]
  fn unnamed_text_index_is_skipped() {
    let file = csv_file("day,A,B\nmon,0.01,0.02\ntue,-0.01,0.03\nwed,0.02,-0.01\n");
    let returns = load_returns(file.path()).unwrap();
    assert_eq!(returns.assets(), ["A", "B"]);
  }

  #[test]
  fn numeric_columns_are_all_assets() {
    let file = csv_file("A,B,C\n0.01,0.02,0.00\n-0.01,0.03,0.01\n0.02,-0.01,0.02\n");
    let returns = load_returns(file.path()).unwrap();
    assert_eq!(returns.assets(), ["A", "B", "C"]);
    assert_eq!(returns.n_observations(), 3);
  }

  #[test]
  fn non_numeric_value_is_reported_with_its_row() {
    let file = csv_file("Date,A,B\n2024-01-02,0.01,0.02\n2024-01-03,n/a,0.03\n");
    let err = load_returns(file.path()).unwrap_err();
    assert!(err.to_string().contains("row 2"));
  }

  #[test]
  fn weights_keep_file_order() {
    let file = csv_file(r#"{"SPY": 0.6, "AGG": 0.3, "GLD": 0.1}"#);
    let weights = load_weights(file.path()).unwrap();
    let assets: Vec<&str> = weights.iter().map(|(a, _)| a).collect();
    assert_eq!(assets, ["SPY", "AGG", "GLD"]);
  }
}

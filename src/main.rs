use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use portfolio_engine::quant::portfolio::types::weights_as_map;
use portfolio_engine::quant::portfolio::Holding;
use portfolio_engine::AnalyticsConfig;
use portfolio_engine::OptimizationMode;
use portfolio_engine::OptimizationResult;
use portfolio_engine::PortfolioEngine;
use portfolio_engine::PriceSeries;
use portfolio_engine::VaRResult;
use prettytable::row;
use prettytable::Table;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
  Json,
  Table,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
  Historical,
  Stochastic,
}

impl From<Mode> for OptimizationMode {
  fn from(m: Mode) -> Self {
    match m {
      Mode::Historical => OptimizationMode::Historical,
      Mode::Stochastic => OptimizationMode::Stochastic,
    }
  }
}

#[derive(Parser, Debug)]
#[command(
  author,
  version,
  about = "Sharpe-maximizing portfolio optimization and Monte Carlo VaR",
  after_help = "EXAMPLES:
    # Historical-moment optimization with 50% per-asset cap
    portfolio-engine --input request.json optimize --upper-bound 0.5

    # Scenario-based optimization, reproducible
    portfolio-engine --input request.json --seed 7 optimize --mode stochastic

    # 99% five-day VaR as a table
    portfolio-engine --input request.json --format table var --confidence 0.99"
)]
struct Args {
  /// JSON request with `prices`, optional `holdings`, `riskFreeRate` and `config`
  #[arg(long, short)]
  input: PathBuf,

  /// Output format
  #[arg(long, value_enum, default_value_t = Format::Json)]
  format: Format,

  /// Seed for reproducible runs (overrides the request config)
  #[arg(long)]
  seed: Option<u64>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Maximize the Sharpe ratio over the supplied assets
  Optimize {
    #[arg(long, value_enum, default_value_t = Mode::Historical)]
    mode: Mode,

    /// Per-asset weight cap
    #[arg(long)]
    upper_bound: Option<f64>,

    /// Decimal places for presentation weights
    #[arg(long)]
    decimals: Option<u32>,
  },
  /// Monte Carlo Value-at-Risk of the holdings (equal weights if none)
  Var {
    #[arg(long)]
    confidence: Option<f64>,

    #[arg(long)]
    simulations: Option<usize>,

    #[arg(long)]
    holding_days: Option<u32>,

    /// Include every simulated P&L in the JSON output
    #[arg(long)]
    include_scenarios: bool,
  },
}

#[derive(Deserialize)]
struct PriceInput {
  ticker: String,
  points: Vec<(NaiveDate, f64)>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
  prices: Vec<PriceInput>,
  #[serde(default)]
  holdings: Option<Vec<Holding>>,
  #[serde(default)]
  risk_free_rate: Option<f64>,
  #[serde(default)]
  config: AnalyticsConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeOutput<'a> {
  #[serde(flatten)]
  result: &'a OptimizationResult,
  #[serde(skip_serializing_if = "Option::is_none", serialize_with = "display_as_map")]
  display_weights: Option<Vec<(String, f64)>>,
}

fn display_as_map<S: Serializer>(
  weights: &Option<Vec<(String, f64)>>,
  serializer: S,
) -> Result<S::Ok, S::Error> {
  match weights {
    Some(w) => weights_as_map(w, serializer),
    None => serializer.serialize_none(),
  }
}

fn print_optimization(result: &OptimizationResult, decimals: Option<u32>, format: Format) -> anyhow::Result<()> {
  let display = decimals.map(|d| result.display_weights(d));
  match format {
    Format::Json => {
      let out = OptimizeOutput {
        result,
        display_weights: display,
      };
      println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Format::Table => {
      let mut table = Table::new();
      table.add_row(row!["Ticker", "Weight"]);
      for (ticker, w) in display.as_ref().unwrap_or(&result.weights) {
        table.add_row(row![ticker, format!("{w:.6}")]);
      }
      table.printstd();

      let mut summary = Table::new();
      summary.add_row(row!["Expected return", format!("{:.6}", result.expected_return)]);
      summary.add_row(row!["Volatility", format!("{:.6}", result.volatility)]);
      summary.add_row(row!["Sharpe ratio", format!("{:.6}", result.sharpe_ratio)]);
      summary.add_row(row!["Mode", format!("{:?}", result.mode)]);
      summary.add_row(row!["Iterations", result.iterations]);
      summary.add_row(row!["Covariance repaired", result.covariance_repaired]);
      summary.printstd();
    }
  }
  Ok(())
}

fn print_var(result: &VaRResult, format: Format) -> anyhow::Result<()> {
  match format {
    Format::Json => println!("{}", serde_json::to_string_pretty(result)?),
    Format::Table => {
      let mut table = Table::new();
      table.add_row(row!["Confidence", result.confidence]);
      table.add_row(row!["Holding days", result.holding_days]);
      table.add_row(row!["VaR", format!("{:.2}", result.var)]);
      table.add_row(row!["Expected shortfall", format!("{:.2}", result.expected_shortfall)]);
      table.add_row(row!["Daily mean", format!("{:.6}", result.expected_return)]);
      table.add_row(row!["Daily volatility", format!("{:.6}", result.volatility)]);
      table.printstd();
    }
  }
  Ok(())
}

fn main() -> anyhow::Result<()> {
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portfolio_engine=info"));
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();
  let args = Args::parse();

  let raw = fs::read_to_string(&args.input)
    .with_context(|| format!("reading request {}", args.input.display()))?;
  let request: Request = serde_json::from_str(&raw).context("parsing request JSON")?;

  let mut config = request.config;
  if args.seed.is_some() {
    config.seed = args.seed;
  }

  let prices = request
    .prices
    .into_iter()
    .map(|p| PriceSeries::new(p.ticker, p.points))
    .collect::<Result<Vec<_>, _>>()?;
  info!(assets = prices.len(), "loaded request");

  match args.command {
    Command::Optimize {
      mode,
      upper_bound,
      decimals,
    } => {
      if let Some(u) = upper_bound {
        config.weight_upper_bound = u;
      }
      if decimals.is_some() {
        config.display_decimals = decimals;
      }
      let rate = request.risk_free_rate.unwrap_or(config.risk_free_rate);

      let engine = PortfolioEngine::new(config)?;
      let result = engine.optimize(&prices, rate, mode.into(), &mut engine.rng(), None)?;
      print_optimization(&result, engine.config().display_decimals, args.format)?;
    }
    Command::Var {
      confidence,
      simulations,
      holding_days,
      include_scenarios,
    } => {
      if let Some(c) = confidence {
        config.confidence_interval = c;
      }
      if let Some(n) = simulations {
        config.simulations = n;
      }
      if let Some(d) = holding_days {
        config.holding_days = d;
      }

      let engine = PortfolioEngine::new(config)?;
      let mut result = engine.value_at_risk(
        &prices,
        request.holdings.as_deref(),
        &mut engine.rng(),
        None,
      )?;
      if !include_scenarios {
        result.scenarios.clear();
      }
      print_var(&result, args.format)?;
    }
  }

  Ok(())
}

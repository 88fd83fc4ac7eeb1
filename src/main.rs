use anyhow::Result;
use clap::{Parser, Subcommand};
use sigforge::commands::{cache, compare, optimize, run};
use sigforge::models::Interval;
use sigforge::optimizer::Algorithm;
use sigforge::report::ReportFormat;
use sigforge::strategy::StrategyKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sigforge")]
#[command(about = "Backtesting and parameter optimization for trading signal strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy over historical bars
    Run {
        /// Strategy to run (moving-average | left-side-building)
        #[arg(long)]
        strategy: String,
        /// Symbol to include (repeatable)
        #[arg(long = "symbol", required = true)]
        symbols: Vec<String>,
        /// Bar interval (1m, 5m, 15m, 1h, 1d)
        #[arg(long, default_value = "1d")]
        interval: String,
        /// Length of the backtest window in years
        #[arg(long, default_value_t = 1.0)]
        years: f64,
        /// Initial capital
        #[arg(long, default_value_t = 100_000.0)]
        capital: f64,
        /// Commission rate per fill
        #[arg(long, default_value_t = 0.001)]
        commission: f64,
        /// Slippage rate applied to market fills
        #[arg(long, default_value_t = 0.0)]
        slippage: f64,
        /// Path to a market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Strategy parameter overrides as a JSON object
        #[arg(long)]
        params: Option<String>,
        /// Write a report in this format (html | markdown | json)
        #[arg(long)]
        report: Option<String>,
        /// Report output path
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Search a strategy's parameter space for a better configuration
    Optimize {
        /// Strategy to optimize (moving-average | left-side-building)
        strategy: String,
        /// Metric used to rank the seed backtests
        #[arg(long, value_enum, default_value_t = optimize::Metric::Composite)]
        metric: optimize::Metric,
        /// Search algorithm (grid | genetic)
        #[arg(long, default_value = "grid")]
        algorithm: String,
        /// Symbol to include (repeatable)
        #[arg(long = "symbol", required = true)]
        symbols: Vec<String>,
        /// Bar interval (1m, 5m, 15m, 1h, 1d)
        #[arg(long, default_value = "1d")]
        interval: String,
        /// Length of the backtest window in years
        #[arg(long, default_value_t = 1.0)]
        years: f64,
        /// Initial capital
        #[arg(long, default_value_t = 100_000.0)]
        capital: f64,
        /// Commission rate per fill
        #[arg(long, default_value_t = 0.001)]
        commission: f64,
        /// Path to a market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Optimization history file (JSON, read and updated)
        #[arg(long = "history", value_name = "PATH")]
        history_file: Option<PathBuf>,
        /// Worker thread cap for the seed backtests
        #[arg(long, default_value_t = 0)]
        concurrency: usize,
    },
    /// Backtest several configurations against the same data and rank them
    Compare {
        /// JSON file with an array of {name, strategy, parameters} entries
        #[arg(long = "config", value_name = "PATH")]
        config_file: PathBuf,
        /// Symbol to include (repeatable)
        #[arg(long = "symbol", required = true)]
        symbols: Vec<String>,
        /// Bar interval (1m, 5m, 15m, 1h, 1d)
        #[arg(long, default_value = "1d")]
        interval: String,
        /// Length of the backtest window in years
        #[arg(long, default_value_t = 1.0)]
        years: f64,
        /// Initial capital
        #[arg(long, default_value_t = 100_000.0)]
        capital: f64,
        /// Commission rate per fill
        #[arg(long, default_value_t = 0.001)]
        commission: f64,
        /// Path to a market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Worker thread cap
        #[arg(long, default_value_t = 0)]
        concurrency: usize,
    },
    /// Inspect or clear the bar cache
    Cache {
        /// Print cache statistics
        #[arg(long)]
        stats: bool,
        /// Remove all cache entries
        #[arg(long)]
        clear: bool,
        /// Cache directory
        #[arg(long, default_value = "cache", value_name = "PATH")]
        dir: PathBuf,
    },
}

fn effective_concurrency(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            strategy,
            symbols,
            interval,
            years,
            capital,
            commission,
            slippage,
            data_file,
            params,
            report,
            output,
        } => {
            let args = run::RunArgs {
                strategy: strategy.parse::<StrategyKind>()?,
                symbols,
                interval: interval.parse::<Interval>()?,
                years,
                capital,
                commission,
                slippage,
                data_file,
                params_json: params,
                report: report.map(|r| r.parse::<ReportFormat>()).transpose()?,
                output,
            };
            run::run(args).await?;
        }
        Commands::Optimize {
            strategy,
            metric,
            algorithm,
            symbols,
            interval,
            years,
            capital,
            commission,
            data_file,
            history_file,
            concurrency,
        } => {
            let args = optimize::OptimizeArgs {
                strategy: strategy.parse::<StrategyKind>()?,
                metric,
                algorithm: algorithm.parse::<Algorithm>()?,
                symbols,
                interval: interval.parse::<Interval>()?,
                years,
                capital,
                commission,
                data_file,
                history_file,
                concurrency: effective_concurrency(concurrency),
            };
            optimize::run(args).await?;
        }
        Commands::Compare {
            config_file,
            symbols,
            interval,
            years,
            capital,
            commission,
            data_file,
            concurrency,
        } => {
            let args = compare::CompareArgs {
                config_file,
                data_file,
                symbols,
                interval: interval.parse::<Interval>()?,
                years,
                capital,
                commission,
                concurrency: effective_concurrency(concurrency),
            };
            compare::run(args).await?;
        }
        Commands::Cache { stats, clear, dir } => {
            cache::run(cache::CacheArgs { dir, stats, clear }).await?;
        }
    }

    Ok(())
}

use crate::config::BacktestConfig;
use crate::data::{MarketDataSource, SnapshotDataSource, SyntheticDataSource};
use crate::engine::BacktestEngine;
use crate::models::{BacktestResult, Interval, ParameterSet};
use crate::report::{write_report, ReportFormat};
use crate::strategy::{create_strategy, StrategyKind};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use log::{info, warn};
use std::path::PathBuf;

const SYNTHETIC_SEED: u64 = 20_240_101;

pub struct RunArgs {
    pub strategy: StrategyKind,
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub years: f64,
    pub capital: f64,
    pub commission: f64,
    pub slippage: f64,
    pub data_file: Option<PathBuf>,
    pub params_json: Option<String>,
    pub report: Option<ReportFormat>,
    pub output: Option<PathBuf>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let parameters = resolve_parameters(args.strategy, args.params_json.as_deref())?;
    let config = build_config(&args)?;
    let source = load_source(&args.data_file, &args.symbols, args.interval, &config)?;

    let strategy = create_strategy(args.strategy, &parameters);
    let mut engine = BacktestEngine::new(config, strategy);
    let result = engine.run(source.as_ref())?;

    print_summary(&result);

    if let Some(format) = args.report {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| default_report_path(&result, format));
        write_report(&result, format, &output)?;
        info!("Report written to {}", output.display());
    }

    Ok(())
}

pub fn resolve_parameters(
    strategy: StrategyKind,
    params_json: Option<&str>,
) -> Result<ParameterSet> {
    let mut parameters = strategy.default_parameters();
    if let Some(json) = params_json {
        let overrides: ParameterSet =
            serde_json::from_str(json).context("invalid --params JSON")?;
        for (key, value) in overrides {
            parameters.insert(key, value);
        }
    }
    Ok(parameters)
}

pub fn build_config(args: &RunArgs) -> Result<BacktestConfig> {
    let end_date = Utc::now();
    let days = (args.years * 365.25).round().max(1.0) as i64;
    Ok(BacktestConfig {
        symbols: args.symbols.clone(),
        interval: args.interval,
        start_date: end_date - Duration::days(days),
        end_date,
        initial_capital: args.capital,
        commission_rate: args.commission,
        slippage_rate: args.slippage,
        order_ttl_bars: 10,
    })
}

/// Snapshot file when given, otherwise a deterministic synthetic series so
/// the command works without any market-data setup.
pub fn load_source(
    data_file: &Option<PathBuf>,
    symbols: &[String],
    interval: Interval,
    config: &BacktestConfig,
) -> Result<Box<dyn MarketDataSource>> {
    match data_file {
        Some(path) => {
            let source = SnapshotDataSource::load(path)?;
            info!("Loaded market data snapshot {}", path.display());
            Ok(Box::new(source))
        }
        None => {
            warn!("No --data-file given; generating deterministic synthetic bars");
            let count = crate::data::bars_needed(config.start_date, config.end_date, interval);
            Ok(Box::new(SyntheticDataSource::generate(
                symbols,
                interval,
                count,
                SYNTHETIC_SEED,
            )))
        }
    }
}

fn default_report_path(result: &BacktestResult, format: ReportFormat) -> PathBuf {
    let extension = match format {
        ReportFormat::Html => "html",
        ReportFormat::Markdown => "md",
        ReportFormat::Json => "json",
    };
    PathBuf::from(format!(
        "backtest_{}_{}.{}",
        result.strategy,
        result.end_date.format("%Y%m%d"),
        extension
    ))
}

pub fn print_summary(result: &BacktestResult) {
    let p = &result.performance;
    println!("\n=== BACKTEST RESULT: {} ===\n", result.strategy);
    println!("  Symbols: {}", result.symbols.join(", "));
    println!(
        "  Period: {} to {}",
        result.start_date.format("%Y-%m-%d"),
        result.end_date.format("%Y-%m-%d")
    );
    println!("  Initial capital: {:.2}", result.initial_capital);
    println!("  Final equity: {:.2}", result.final_equity);
    println!("  Total return: {:.2}%", p.total_return * 100.0);
    println!("  Annualized return: {:.2}%", p.annualized_return * 100.0);
    println!("  Max drawdown: {:.2}%", p.max_drawdown * 100.0);
    println!("  Sharpe ratio: {:.4}", p.sharpe_ratio);
    println!("  Win rate: {:.2}%", p.win_rate * 100.0);
    println!(
        "  Trades: {} ({} wins / {} losses)",
        p.total_trades, p.winning_trades, p.losing_trades
    );
    println!();
}

use crate::commands::run::load_source;
use crate::compare::{run_compare, CompareTask};
use crate::config::{BacktestConfig, CompareEntry};
use crate::data::MarketDataSource;
use crate::models::Interval;
use crate::optimizer::composite_score;
use crate::strategy::StrategyKind;
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

pub struct CompareArgs {
    pub config_file: PathBuf,
    pub data_file: Option<PathBuf>,
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub years: f64,
    pub capital: f64,
    pub commission: f64,
    pub concurrency: usize,
}

/// Backtests every configuration in the config file against the same data
/// and prints them ranked by composite score.
pub async fn run(args: CompareArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.config_file)
        .with_context(|| format!("failed to read {}", args.config_file.display()))?;
    let entries: Vec<CompareEntry> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", args.config_file.display()))?;
    if entries.is_empty() {
        return Err(anyhow!(
            "{} contains no configurations",
            args.config_file.display()
        ));
    }

    let end_date = Utc::now();
    let days = (args.years * 365.25).round().max(1.0) as i64;
    let config = BacktestConfig {
        symbols: args.symbols.clone(),
        interval: args.interval,
        start_date: end_date - Duration::days(days),
        end_date,
        initial_capital: args.capital,
        commission_rate: args.commission,
        slippage_rate: 0.0,
        order_ttl_bars: 10,
    };
    config.validate()?;

    let source = load_source(&args.data_file, &args.symbols, args.interval, &config)?;
    let limit = crate::data::bars_needed(config.start_date, config.end_date, args.interval);
    let mut bars_by_symbol = HashMap::new();
    for symbol in &args.symbols {
        bars_by_symbol.insert(
            symbol.clone(),
            source.get_klines(symbol, args.interval, limit)?,
        );
    }

    let mut tasks = Vec::with_capacity(entries.len());
    for entry in entries {
        let kind = StrategyKind::from_str(&entry.strategy)?;
        let mut parameters = kind.default_parameters();
        for (key, value) in entry.parameters {
            parameters.insert(key, value);
        }
        tasks.push(CompareTask {
            name: entry.name,
            kind,
            parameters,
        });
    }

    info!("Comparing {} configurations", tasks.len());
    let outcomes = run_compare(&config, tasks, bars_by_symbol, args.concurrency)?;

    println!("\n=== STRATEGY COMPARISON ===\n");
    for (rank, outcome) in outcomes.iter().enumerate() {
        match (&outcome.result, &outcome.error) {
            (Some(result), _) => {
                println!(
                    "Rank {}: {} (score {:.4})",
                    rank + 1,
                    outcome.name,
                    composite_score(&result.performance)
                );
                println!(
                    "  Return {:.2}%, Sharpe {:.4}, Drawdown {:.2}%, Win rate {:.2}%, Trades {}",
                    result.performance.total_return * 100.0,
                    result.performance.sharpe_ratio,
                    result.performance.max_drawdown * 100.0,
                    result.performance.win_rate * 100.0,
                    result.performance.total_trades
                );
            }
            (None, Some(error)) => {
                println!("Rank {}: {} FAILED: {}", rank + 1, outcome.name, error);
            }
            (None, None) => {}
        }
    }
    println!();
    Ok(())
}

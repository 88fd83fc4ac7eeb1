use crate::commands::run::load_source;
use crate::compare::{run_compare, CompareTask};
use crate::config::{BacktestConfig, OptimizerSettings};
use crate::data::MarketDataSource;
use crate::models::{
    push_optimization_record, BacktestResult, Interval, OptimizationRecord, ParameterSet,
};
use crate::optimizer::{composite_score, Algorithm, ParameterOptimizer};
use crate::strategy::StrategyKind;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::ValueEnum;
use log::info;
use std::collections::HashSet;
use std::path::PathBuf;

const MAX_SEED_VARIATIONS: usize = 12;
const SEED_STEP_MULTIPLIERS: [f64; 2] = [-1.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Metric {
    Sharpe,
    Return,
    Composite,
}

impl Metric {
    fn score(&self, result: &BacktestResult) -> f64 {
        match self {
            Metric::Sharpe => result.performance.sharpe_ratio,
            Metric::Return => result.performance.total_return,
            Metric::Composite => composite_score(&result.performance),
        }
    }
}

pub struct OptimizeArgs {
    pub strategy: StrategyKind,
    pub metric: Metric,
    pub algorithm: Algorithm,
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub years: f64,
    pub capital: f64,
    pub commission: f64,
    pub data_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub concurrency: usize,
}

/// Seeds the optimization history with real backtests of the current
/// parameters and their close neighbors, then asks the optimizer for a
/// similarity-weighted suggestion.
pub async fn run(args: OptimizeArgs) -> Result<()> {
    let current = args.strategy.default_parameters();
    let ranges = args.strategy.parameter_ranges();

    let mut history = load_history(&args.history_file)?;
    info!(
        "Optimizing {} via {} ({} historical records)",
        args.strategy.as_str(),
        args.algorithm.as_str(),
        history.len()
    );

    let config = build_config(&args)?;
    let source = load_source(&args.data_file, &args.symbols, args.interval, &config)?;
    let mut bars_by_symbol = std::collections::HashMap::new();
    let limit = crate::data::bars_needed(config.start_date, config.end_date, args.interval);
    for symbol in &args.symbols {
        bars_by_symbol.insert(symbol.clone(), source.get_klines(symbol, args.interval, limit)?);
    }

    let tasks = seed_tasks(args.strategy, &current);
    info!("Backtesting {} seed variations", tasks.len());
    let outcomes = run_compare(&config, tasks, bars_by_symbol, args.concurrency)?;

    let mut seeded: Vec<(ParameterSet, BacktestResult)> = Vec::new();
    for outcome in outcomes {
        if let Some(result) = outcome.result {
            let parameters: ParameterSet =
                serde_json::from_str(&outcome.name).unwrap_or_else(|_| current.clone());
            seeded.push((parameters, result));
        }
    }
    seeded.sort_by(|a, b| {
        args.metric
            .score(&b.1)
            .partial_cmp(&args.metric.score(&a.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    println!("\n=== SEED BACKTESTS ({:?}) ===\n", args.metric);
    for (rank, (parameters, result)) in seeded.iter().enumerate().take(5) {
        println!(
            "Rank {}: {:?} = {:.4} (return {:.2}%, drawdown {:.2}%)",
            rank + 1,
            args.metric,
            args.metric.score(result),
            result.performance.total_return * 100.0,
            result.performance.max_drawdown * 100.0
        );
        println!("  Parameters: {}", serde_json::to_string(parameters)?);
    }

    for (parameters, result) in seeded {
        push_optimization_record(
            &mut history,
            OptimizationRecord {
                timestamp: Utc::now(),
                parameters,
                metrics: result.performance.clone(),
                algorithm: "backtest".to_string(),
                improvement: 0.0,
                confidence: 1.0,
            },
        );
    }

    let mut optimizer = ParameterOptimizer::new(OptimizerSettings::default());
    let outcome = optimizer.optimize(&current, &ranges, &history, args.algorithm, Utc::now())?;

    println!("\n=== OPTIMIZATION OUTCOME ===\n");
    println!("  Algorithm: {}", args.algorithm.as_str());
    println!("  Applied: {}", outcome.applied);
    println!(
        "  Expected improvement: {:.2}%",
        outcome.expected_improvement * 100.0
    );
    println!("  Confidence: {:.2}", outcome.confidence);
    println!("  Reason: {}", outcome.reason);
    println!(
        "  Parameters: {}",
        serde_json::to_string(&outcome.new_params)?
    );
    println!();

    save_history(&args.history_file, &history)?;
    Ok(())
}

/// The current parameters plus single-parameter neighbors, each named by its
/// serialized parameter set so results can be matched back.
fn seed_tasks(strategy: StrategyKind, current: &ParameterSet) -> Vec<CompareTask> {
    let ranges = strategy.parameter_ranges();
    let mut seen = HashSet::new();
    let mut variations = vec![current.clone()];
    seen.insert(format!("{:?}", current));
    crate::param_utils::add_single_parameter_neighbor_variations(
        &ranges,
        &SEED_STEP_MULTIPLIERS,
        current,
        &mut seen,
        &mut variations,
    );
    variations.truncate(MAX_SEED_VARIATIONS);

    variations
        .into_iter()
        .map(|parameters| CompareTask {
            name: serde_json::to_string(&parameters).unwrap_or_default(),
            kind: strategy,
            parameters,
        })
        .collect()
}

fn build_config(args: &OptimizeArgs) -> Result<BacktestConfig> {
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
    Ok(config)
}

fn load_history(path: &Option<PathBuf>) -> Result<Vec<OptimizationRecord>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse history {}", path.display()))
}

fn save_history(path: &Option<PathBuf>, history: &[OptimizationRecord]) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let content = serde_json::to_string_pretty(history)?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write history {}", path.display()))?;
    info!("Saved {} optimization records to {}", history.len(), path.display());
    Ok(())
}

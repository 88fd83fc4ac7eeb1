use crate::config::BacktestConfig;
use crate::data::MarketDataSource;
use crate::engine::BacktestEngine;
use crate::models::{BacktestResult, Bar, Interval, ParameterSet, Ticker};
use crate::optimizer::composite_score;
use crate::strategy::{create_strategy, StrategyKind};
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

#[derive(Clone)]
pub struct CompareTask {
    pub name: String,
    pub kind: StrategyKind,
    pub parameters: ParameterSet,
}

pub struct CompareOutcome {
    pub name: String,
    pub result: Option<BacktestResult>,
    pub error: Option<String>,
}

/// Shares one loaded bar universe across worker threads without copying it
/// per run.
struct SharedBarsSource {
    bars_by_symbol: Arc<HashMap<String, Vec<Bar>>>,
}

impl MarketDataSource for SharedBarsSource {
    fn get_klines(&self, symbol: &str, _interval: Interval, limit: usize) -> Result<Vec<Bar>> {
        let bars = self
            .bars_by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("symbol {} not present in the loaded data", symbol))?;
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let bars = self
            .bars_by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("symbol {} not present in the loaded data", symbol))?;
        let last = bars
            .last()
            .ok_or_else(|| anyhow!("symbol {} has no bars", symbol))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: last.close,
            change_24h: 0.0,
            volume_24h: last.volume,
            timestamp: last.close_time,
        })
    }
}

/// Runs every task against the same bar universe on a bounded worker pool.
/// Each backtest owns its account and equity state; nothing is shared
/// between concurrent runs except the read-only bars. Results come back
/// ranked best-first by composite score.
pub fn run_compare(
    config: &BacktestConfig,
    tasks: Vec<CompareTask>,
    bars_by_symbol: HashMap<String, Vec<Bar>>,
    concurrency_limit: usize,
) -> Result<Vec<CompareOutcome>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let total = tasks.len();
    let shared_bars = Arc::new(bars_by_symbol);
    let num_workers = total
        .min(std::cmp::max(1, num_cpus::get()))
        .min(concurrency_limit.max(1));
    info!(
        "Comparing {} configurations on {} worker threads",
        total, num_workers
    );

    let (task_tx, task_rx): (Sender<CompareTask>, Receiver<CompareTask>) = bounded(total);
    let (result_tx, result_rx): (Sender<CompareOutcome>, Receiver<CompareOutcome>) =
        bounded(total);

    let mut handles = Vec::new();
    for _ in 0..num_workers {
        let rx = task_rx.clone();
        let tx = result_tx.clone();
        let bars = shared_bars.clone();
        let config = config.clone();

        let handle = thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                let source = SharedBarsSource {
                    bars_by_symbol: bars.clone(),
                };
                let strategy = create_strategy(task.kind, &task.parameters);
                let mut engine = BacktestEngine::new(config.clone(), strategy);
                let outcome = match engine.run(&source) {
                    Ok(result) => CompareOutcome {
                        name: task.name,
                        result: Some(result),
                        error: None,
                    },
                    Err(error) => CompareOutcome {
                        name: task.name,
                        result: None,
                        error: Some(error.to_string()),
                    },
                };
                if tx.send(outcome).is_err() {
                    break;
                }
            }
        });
        handles.push(handle);
    }

    for task in tasks {
        task_tx.send(task)?;
    }
    drop(task_tx);
    drop(result_tx);

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut outcomes = Vec::with_capacity(total);
    while let Ok(outcome) = result_rx.recv() {
        if let Some(error) = &outcome.error {
            warn!("Comparison run {} failed: {}", outcome.name, error);
        }
        outcomes.push(outcome);
        pb.set_position(outcomes.len() as u64);
        if outcomes.len() == total {
            break;
        }
    }
    pb.finish_and_clear();

    for handle in handles {
        let _ = handle.join();
    }

    outcomes.sort_by(|a, b| {
        let score_a = a
            .result
            .as_ref()
            .map(|r| composite_score(&r.performance))
            .unwrap_or(f64::NEG_INFINITY);
        let score_b = b
            .result
            .as_ref()
            .map(|r| composite_score(&r.performance))
            .unwrap_or(f64::NEG_INFINITY);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(outcomes)
}

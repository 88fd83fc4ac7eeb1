use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sigforge::config::{BacktestConfig, OptimizerSettings};
use sigforge::data::SyntheticDataSource;
use sigforge::engine::BacktestEngine;
use sigforge::models::{Bar, Interval, OptimizationRecord, ParameterSet, Trade};
use sigforge::optimizer::{Algorithm, ParameterOptimizer};
use sigforge::report::{render, ReportFormat};
use sigforge::strategy::{create_strategy, StrategyKind};
use std::thread;
use std::time::Duration as StdDuration;

const INITIAL_CAPITAL: f64 = 100_000.0;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
}

fn daily_bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    let start = base_time();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let open_time = start + Duration::days(i as i64);
            let open = if i == 0 { *close } else { closes[i - 1] };
            let high = open.max(*close) * 1.002;
            let low = open.min(*close) * 0.998;
            Bar {
                symbol: symbol.to_string(),
                open_time,
                close_time: open_time + Duration::days(1),
                open,
                high,
                low,
                close: *close,
                volume: 50_000.0,
                interval: Interval::D1,
            }
        })
        .collect()
}

fn config_over(bars: &[Bar]) -> BacktestConfig {
    BacktestConfig {
        symbols: vec![bars[0].symbol.clone()],
        interval: Interval::D1,
        start_date: bars.first().unwrap().open_time,
        end_date: bars.last().unwrap().open_time + Duration::days(1),
        initial_capital: INITIAL_CAPITAL,
        commission_rate: 0.0,
        slippage_rate: 0.0,
        order_ttl_bars: 10,
    }
}

#[test]
fn moving_average_backtest_buys_into_an_uptrend() -> Result<()> {
    let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
    let bars = daily_bars("UPUP", &closes);
    let config = config_over(&bars);

    let mut params = ParameterSet::new();
    params.insert("shortPeriod".to_string(), 5.0);
    params.insert("longPeriod".to_string(), 20.0);
    params.insert("useVolumeConfirmation".to_string(), 0.0);

    let strategy = create_strategy(StrategyKind::MovingAverage, &params);
    let mut engine = BacktestEngine::new(config, strategy);
    let result = engine.run(&SyntheticDataSource::with_bars("UPUP", bars))?;

    // One entry, never exited: the uptrend never crosses back down.
    let buys: Vec<&Trade> = result.trades.iter().collect();
    assert!(!buys.is_empty());
    assert!(result.trades.iter().all(|t| !t.is_closed()));
    assert!(result.final_equity > INITIAL_CAPITAL);
    assert_eq!(result.performance.total_trades, 0); // closed trades only
    Ok(())
}

#[test]
fn left_side_building_ladders_into_a_decline() -> Result<()> {
    let closes: Vec<f64> = (0..50).map(|i| 100.0 - 10.0 * i as f64 / 49.0).collect();
    let bars = daily_bars("DOWN", &closes);
    let config = config_over(&bars);

    let mut params = ParameterSet::new();
    params.insert("minDropPercent".to_string(), 0.05);
    params.insert("addPositionDropInterval".to_string(), 0.03);
    params.insert("maxBuildingTimes".to_string(), 3.0);
    params.insert("positionMultiplier".to_string(), 1.5);

    let strategy = create_strategy(StrategyKind::LeftSideBuilding, &params);
    let mut engine = BacktestEngine::new(config, strategy);
    let result = engine.run(&SyntheticDataSource::with_bars("DOWN", bars))?;

    let mut entries: Vec<&Trade> = result.trades.iter().filter(|t| !t.is_closed()).collect();
    entries.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));
    assert!(
        (2..=3).contains(&entries.len()),
        "expected 2-3 building entries, got {}",
        entries.len()
    );
    for pair in entries.windows(2) {
        assert!(pair[1].quantity > pair[0].quantity);
    }
    // No profit target or stop is reachable in a shallow 10% decline.
    assert!(result.trades.iter().all(|t| !t.is_closed()));
    Ok(())
}

#[test]
fn equity_accounting_is_consistent_end_to_end() -> Result<()> {
    // A decline into a sharp recovery exercises builds, partial exits and
    // the final mark-to-market.
    let mut closes: Vec<f64> = (0..30).map(|i| 100.0 - 0.4 * i as f64).collect();
    closes.extend((0..60).map(|i| 88.4 + 0.8 * i as f64));
    let bars = daily_bars("CYCL", &closes);
    let config = config_over(&bars);

    let strategy = create_strategy(
        StrategyKind::LeftSideBuilding,
        &StrategyKind::LeftSideBuilding.default_parameters(),
    );
    let mut engine = BacktestEngine::new(config, strategy);
    let result = engine.run(&SyntheticDataSource::with_bars("CYCL", bars.clone()))?;

    // final equity = initial + closed pnl + open unrealized pnl (commission 0)
    let closed_pnl: f64 = result
        .trades
        .iter()
        .filter_map(|t| t.pnl)
        .sum();
    let last_close = bars.last().unwrap().close;
    let open_unrealized: f64 = result
        .trades
        .iter()
        .filter(|t| !t.is_closed())
        .map(|t| (last_close - t.entry_price) * t.quantity)
        .sum();
    let expected = INITIAL_CAPITAL + closed_pnl + open_unrealized;
    assert!(
        (result.final_equity - expected).abs() < 1e-6,
        "{} vs {}",
        result.final_equity,
        expected
    );

    // Drawdown stays a causal fraction of the running peak.
    for point in &result.equity_curve {
        assert!((0.0..=1.0).contains(&point.drawdown));
    }
    Ok(())
}

#[test]
fn multi_symbol_runs_merge_bars_deterministically() -> Result<()> {
    let up: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
    let down: Vec<f64> = (0..80).map(|i| 200.0 - 1.5 * i as f64).collect();
    let mut source = SyntheticDataSource::with_bars("AAA", daily_bars("AAA", &up));
    source.insert("BBB", daily_bars("BBB", &down));

    let config = BacktestConfig {
        symbols: vec!["AAA".to_string(), "BBB".to_string()],
        interval: Interval::D1,
        start_date: base_time(),
        end_date: base_time() + Duration::days(81),
        initial_capital: INITIAL_CAPITAL,
        commission_rate: 0.0,
        slippage_rate: 0.0,
        order_ttl_bars: 10,
    };

    let mut params = ParameterSet::new();
    params.insert("useVolumeConfirmation".to_string(), 0.0);
    let strategy = create_strategy(StrategyKind::MovingAverage, &params);
    let mut engine = BacktestEngine::new(config.clone(), strategy);
    let first = engine.run(&source)?;

    let strategy = create_strategy(StrategyKind::MovingAverage, &params);
    let mut engine = BacktestEngine::new(config, strategy);
    let second = engine.run(&source)?;

    // Two bars per day: one equity point each, identical across runs.
    assert_eq!(first.equity_curve.len(), 160);
    assert_eq!(first.equity_curve.len(), second.equity_curve.len());
    for (a, b) in first.equity_curve.iter().zip(second.equity_curve.iter()) {
        assert_eq!(a.equity, b.equity);
    }
    assert_eq!(first.trades.len(), second.trades.len());
    Ok(())
}

#[test]
fn pause_and_resume_preserve_the_run() -> Result<()> {
    let closes: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.3).sin() * 10.0).collect();
    let bars = daily_bars("PAUS", &closes);
    let config = config_over(&bars);
    let strategy = create_strategy(
        StrategyKind::MovingAverage,
        &StrategyKind::MovingAverage.default_parameters(),
    );
    let mut engine = BacktestEngine::new(config, strategy);
    let control = engine.control();

    control.pause();
    let resumer = thread::spawn(move || {
        thread::sleep(StdDuration::from_millis(50));
        control.resume();
    });

    let result = engine.run(&SyntheticDataSource::with_bars("PAUS", bars))?;
    resumer.join().unwrap();

    // The paused run still processes every bar once resumed.
    assert_eq!(result.equity_curve.len(), 200);
    Ok(())
}

#[test]
fn reports_render_from_a_real_run() -> Result<()> {
    let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.2).sin() * 8.0).collect();
    let bars = daily_bars("REPT", &closes);
    let config = config_over(&bars);
    let strategy = create_strategy(
        StrategyKind::LeftSideBuilding,
        &StrategyKind::LeftSideBuilding.default_parameters(),
    );
    let mut engine = BacktestEngine::new(config, strategy);
    let result = engine.run(&SyntheticDataSource::with_bars("REPT", bars))?;

    let json = render(&result, ReportFormat::Json)?;
    let parsed: sigforge::models::BacktestResult = serde_json::from_str(&json)?;
    assert_eq!(parsed.strategy, result.strategy);

    let markdown = render(&result, ReportFormat::Markdown)?;
    assert!(markdown.contains("Backtest report"));
    let html = render(&result, ReportFormat::Html)?;
    assert!(html.contains("<html>"));
    Ok(())
}

#[test]
fn optimizer_suggestions_come_from_real_backtest_history() -> Result<()> {
    // Build a history by actually backtesting a handful of parameter sets,
    // then ask the optimizer for a move.
    let closes: Vec<f64> = (0..150).map(|i| 100.0 + (i as f64 * 0.15).sin() * 12.0).collect();
    let bars = daily_bars("HIST", &closes);
    let config = config_over(&bars);
    let ranges = StrategyKind::MovingAverage.parameter_ranges();

    let mut history: Vec<OptimizationRecord> = Vec::new();
    for short in [3.0, 5.0, 8.0, 12.0] {
        let mut params = StrategyKind::MovingAverage.default_parameters();
        params.insert("shortPeriod".to_string(), short);
        params.insert("useVolumeConfirmation".to_string(), 0.0);
        let strategy = create_strategy(StrategyKind::MovingAverage, &params);
        let mut engine = BacktestEngine::new(config.clone(), strategy);
        let result = engine.run(&SyntheticDataSource::with_bars("HIST", bars.clone()))?;
        history.push(OptimizationRecord {
            timestamp: result.created_at,
            parameters: params,
            metrics: result.performance,
            algorithm: "backtest".to_string(),
            improvement: 0.0,
            confidence: 1.0,
        });
    }

    let mut optimizer = ParameterOptimizer::new(OptimizerSettings::default());
    let outcome = optimizer.optimize(
        &StrategyKind::MovingAverage.default_parameters(),
        &ranges,
        &history,
        Algorithm::Genetic,
        Utc::now(),
    )?;

    for (name, range) in &ranges {
        let value = outcome.new_params[name];
        assert!(value >= range.min && value <= range.max, "{}", name);
    }
    Ok(())
}

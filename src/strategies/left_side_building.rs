use crate::models::{Bar, ParameterSet, Signal, SignalSide};
use crate::param_utils::{get_param_f64, get_param_usize_at_least};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

const STRATEGY_NAME: &str = "left-side-building";
const QUANTITY_EPSILON: f64 = 1e-9;
const DROP_EPSILON: f64 = 1e-9;

struct BuildLevel {
    price: f64,
    quantity: f64,
}

/// Averaging-down ladder. Buys start once price has fallen far enough from
/// the tracked high and down-closes confirm the decline; each further level
/// requires an additional drop and sizes up geometrically. Unrealized gains
/// trigger staged partial exits, a deep fall from the high exits fully.
pub struct LeftSideBuildingStrategy {
    min_drop_percent: f64,
    add_position_drop_interval: f64,
    max_building_times: usize,
    base_position_size: f64,
    position_multiplier: f64,
    price_confirmation_periods: usize,
    stop_loss_from_high: f64,
    profit_taking_thresholds: Vec<f64>,
    reduction_ratios: Vec<f64>,
    build_interval: Duration,
    high_water: HashMap<String, f64>,
    levels: HashMap<String, Vec<BuildLevel>>,
    held_quantity: HashMap<String, f64>,
    last_build_time: HashMap<String, DateTime<Utc>>,
    fired_reductions: HashMap<String, HashSet<usize>>,
}

impl LeftSideBuildingStrategy {
    pub fn new(parameters: &ParameterSet) -> Self {
        let profit_taking_thresholds = vec![
            get_param_f64(parameters, "profitTaking1", 0.10),
            get_param_f64(parameters, "profitTaking2", 0.20),
            get_param_f64(parameters, "profitTaking3", 0.35),
        ];
        let reduction_ratios = vec![
            get_param_f64(parameters, "reductionRatio1", 0.3).clamp(0.0, 1.0),
            get_param_f64(parameters, "reductionRatio2", 0.5).clamp(0.0, 1.0),
            get_param_f64(parameters, "reductionRatio3", 1.0).clamp(0.0, 1.0),
        ];
        let build_interval_hours = get_param_f64(parameters, "buildIntervalHours", 24.0).max(0.0);
        Self {
            min_drop_percent: get_param_f64(parameters, "minDropPercent", 0.05).max(0.0),
            add_position_drop_interval: get_param_f64(parameters, "addPositionDropInterval", 0.03)
                .max(0.0),
            max_building_times: get_param_usize_at_least(parameters, "maxBuildingTimes", 5, 1),
            base_position_size: get_param_f64(parameters, "basePositionSize", 1_000.0).max(0.0),
            position_multiplier: get_param_f64(parameters, "positionMultiplier", 1.5).max(1.0),
            price_confirmation_periods: get_param_usize_at_least(
                parameters,
                "priceConfirmationPeriods",
                3,
                1,
            ),
            stop_loss_from_high: get_param_f64(parameters, "stopLossFromHigh", 0.25).max(0.0),
            profit_taking_thresholds,
            reduction_ratios,
            build_interval: Duration::minutes((build_interval_hours * 60.0).round() as i64),
            high_water: HashMap::new(),
            levels: HashMap::new(),
            held_quantity: HashMap::new(),
            last_build_time: HashMap::new(),
            fired_reductions: HashMap::new(),
        }
    }

    fn decline_confirmed(&self, bars: &[Bar]) -> bool {
        let n = bars.len();
        if n < self.price_confirmation_periods + 1 {
            return false;
        }
        (n - self.price_confirmation_periods..n).all(|i| bars[i].close < bars[i - 1].close)
    }

    fn cooldown_elapsed(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.last_build_time.get(symbol) {
            Some(last) => now - *last >= self.build_interval,
            None => true,
        }
    }

    fn average_entry(&self, symbol: &str) -> f64 {
        let Some(levels) = self.levels.get(symbol) else {
            return 0.0;
        };
        let total_quantity: f64 = levels.iter().map(|l| l.quantity).sum();
        if total_quantity <= 0.0 {
            return 0.0;
        }
        levels.iter().map(|l| l.price * l.quantity).sum::<f64>() / total_quantity
    }

    /// Drops all per-symbol position state after a full exit. A fresh ladder
    /// must measure its drop from the post-exit price, not the stale peak.
    fn close_position(&mut self, symbol: &str, price: f64) {
        self.levels.remove(symbol);
        self.held_quantity.remove(symbol);
        self.fired_reductions.remove(symbol);
        self.high_water.insert(symbol.to_string(), price);
    }

    fn build_signal(
        &mut self,
        symbol: &str,
        bar: &Bar,
        drop: f64,
        level_index: usize,
    ) -> Signal {
        let quantity =
            self.base_position_size / bar.close * self.position_multiplier.powi(level_index as i32);
        self.levels
            .entry(symbol.to_string())
            .or_default()
            .push(BuildLevel {
                price: bar.close,
                quantity,
            });
        *self.held_quantity.entry(symbol.to_string()).or_insert(0.0) += quantity;
        self.last_build_time
            .insert(symbol.to_string(), bar.close_time);

        let confidence = (0.5 + (drop - self.min_drop_percent) * 2.0).clamp(0.0, 0.9);
        Signal::new(
            symbol,
            SignalSide::Buy,
            bar.close,
            quantity,
            confidence,
            format!(
                "building level {} at {:.2}% below the tracked high",
                level_index + 1,
                drop * 100.0
            ),
            STRATEGY_NAME,
            bar.close_time,
        )
    }
}

impl super::Strategy for LeftSideBuildingStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn min_history(&self) -> usize {
        self.price_confirmation_periods + 1
    }

    fn generate_signal(&mut self, symbol: &str, bars: &[Bar]) -> Option<Signal> {
        let bar = bars.last()?;
        let close = bar.close;
        if close <= 0.0 {
            return None;
        }

        let high = self
            .high_water
            .entry(symbol.to_string())
            .and_modify(|h| *h = h.max(close))
            .or_insert(close);
        let high = *high;
        let drop = (high - close) / high;

        let held = self.held_quantity.get(symbol).copied().unwrap_or(0.0);
        if held > QUANTITY_EPSILON {
            // Full exit when the fall from the tracked high breaches the stop.
            if drop + DROP_EPSILON >= self.stop_loss_from_high {
                let signal = Signal::new(
                    symbol,
                    SignalSide::Sell,
                    close,
                    held,
                    0.9,
                    format!(
                        "stop loss: {:.2}% below the tracked high {:.2}",
                        drop * 100.0,
                        high
                    ),
                    STRATEGY_NAME,
                    bar.close_time,
                );
                self.close_position(symbol, close);
                return Some(signal);
            }

            // Staged profit taking, each threshold at most once per position.
            let average_entry = self.average_entry(symbol);
            if average_entry > 0.0 {
                let gain = (close - average_entry) / average_entry;
                for i in 0..self.profit_taking_thresholds.len() {
                    let threshold = self.profit_taking_thresholds[i];
                    let already_fired = self
                        .fired_reductions
                        .get(symbol)
                        .map(|set| set.contains(&i))
                        .unwrap_or(false);
                    if already_fired || gain + DROP_EPSILON < threshold {
                        continue;
                    }

                    let ratio = self.reduction_ratios.get(i).copied().unwrap_or(1.0);
                    let quantity = if ratio >= 1.0 { held } else { held * ratio };
                    self.fired_reductions
                        .entry(symbol.to_string())
                        .or_default()
                        .insert(i);

                    let signal = Signal::new(
                        symbol,
                        SignalSide::Sell,
                        close,
                        quantity,
                        (0.6 + 0.1 * i as f64).min(0.9),
                        format!(
                            "profit taking at +{:.1}% (threshold {})",
                            gain * 100.0,
                            i + 1
                        ),
                        STRATEGY_NAME,
                        bar.close_time,
                    );

                    let remaining = held - quantity;
                    if remaining <= QUANTITY_EPSILON {
                        self.close_position(symbol, close);
                    } else {
                        self.held_quantity.insert(symbol.to_string(), remaining);
                    }
                    return Some(signal);
                }
            }
        }

        // Ladder entry or extension.
        let level_index = self.levels.get(symbol).map(|l| l.len()).unwrap_or(0);
        if level_index >= self.max_building_times {
            return None;
        }
        let required_drop =
            self.min_drop_percent + level_index as f64 * self.add_position_drop_interval;
        if drop + DROP_EPSILON < required_drop {
            return None;
        }
        if !self.decline_confirmed(bars) {
            return None;
        }
        if !self.cooldown_elapsed(symbol, bar.close_time) {
            return None;
        }

        Some(self.build_signal(symbol, bar, drop, level_index))
    }

    fn reset(&mut self) {
        self.high_water.clear();
        self.levels.clear();
        self.held_quantity.clear();
        self.last_build_time.clear();
        self.fired_reductions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::TimeZone;

    fn series(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let open_time = start + Duration::days(i as i64);
                Bar {
                    symbol: "AAA".to_string(),
                    open_time,
                    close_time: open_time + Duration::days(1),
                    open: *close,
                    high: close * 1.001,
                    low: close * 0.999,
                    close: *close,
                    volume: 10_000.0,
                    interval: crate::models::Interval::D1,
                }
            })
            .collect()
    }

    fn params(min_drop: f64, interval: f64, max_times: usize) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("minDropPercent".to_string(), min_drop);
        params.insert("addPositionDropInterval".to_string(), interval);
        params.insert("maxBuildingTimes".to_string(), max_times as f64);
        params.insert("positionMultiplier".to_string(), 1.5);
        params
    }

    fn run(strategy: &mut LeftSideBuildingStrategy, bars: &[Bar]) -> Vec<Signal> {
        let mut signals = Vec::new();
        for i in 0..bars.len() {
            if let Some(signal) = strategy.generate_signal("AAA", &bars[..=i]) {
                signals.push(signal);
            }
        }
        signals
    }

    #[test]
    fn ten_percent_decline_builds_two_to_three_levels() {
        // 100 down to 90 over 50 bars.
        let closes: Vec<f64> = (0..50).map(|i| 100.0 - 10.0 * i as f64 / 49.0).collect();
        let bars = series(&closes);
        let mut strategy = LeftSideBuildingStrategy::new(&params(0.05, 0.03, 3));

        let signals = run(&mut strategy, &bars);
        let buys: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.side == SignalSide::Buy)
            .collect();
        let sells = signals.iter().filter(|s| s.side == SignalSide::Sell).count();

        assert!(
            (2..=3).contains(&buys.len()),
            "expected 2-3 buys, got {}",
            buys.len()
        );
        assert_eq!(sells, 0);
        for pair in buys.windows(2) {
            assert!(pair[1].quantity > pair[0].quantity);
        }
    }

    #[test]
    fn never_exceeds_max_building_times() {
        // A long relentless decline far past every add-level threshold.
        let closes: Vec<f64> = (0..120).map(|i| 100.0 * (1.0 - 0.005 * i as f64)).collect();
        let bars = series(&closes);
        let mut strategy = LeftSideBuildingStrategy::new(&params(0.02, 0.02, 4));
        // Disable the stop so the ladder alone limits buying.
        strategy.stop_loss_from_high = 1.0;

        let signals = run(&mut strategy, &bars);
        let buys = signals.iter().filter(|s| s.side == SignalSide::Buy).count();
        assert!(buys <= 4, "got {} buys", buys);
    }

    #[test]
    fn profit_thresholds_fire_once_each() {
        // Drop to build, then a strong recovery through two thresholds.
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 - 0.5 * i as f64).collect();
        closes.extend((0..40).map(|i| 90.5 + 1.0 * i as f64));
        let bars = series(&closes);
        let mut strategy = LeftSideBuildingStrategy::new(&params(0.05, 0.03, 3));

        let signals = run(&mut strategy, &bars);
        let buys = signals.iter().filter(|s| s.side == SignalSide::Buy).count();
        assert!(buys >= 1);

        let profit_sells: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.side == SignalSide::Sell && s.reason.starts_with("profit taking"))
            .collect();
        assert!(!profit_sells.is_empty());
        let mut seen = HashSet::new();
        for sell in profit_sells {
            assert!(seen.insert(sell.reason.split("threshold ").nth(1).unwrap().to_string()));
        }
    }

    #[test]
    fn deep_fall_from_high_exits_fully() {
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 - 1.0 * i as f64).collect();
        closes.extend((0..30).map(|i| 91.0 - 2.0 * i as f64).filter(|c| *c > 0.0));
        let bars = series(&closes);
        let mut strategy = LeftSideBuildingStrategy::new(&params(0.05, 0.03, 3));

        let signals = run(&mut strategy, &bars);
        let stop_sell = signals
            .iter()
            .find(|s| s.side == SignalSide::Sell && s.reason.starts_with("stop loss"));
        assert!(stop_sell.is_some());

        // After the stop exit no residual quantity remains.
        assert!(strategy.held_quantity.get("AAA").is_none());
    }

    #[test]
    fn cooldown_spaces_building_buys() {
        // Hourly crash through several level thresholds: the 24h cooldown
        // permits at most one building buy per day despite the depth.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let closes: Vec<f64> = (0..48).map(|i| 100.0 - 0.75 * i as f64).collect();
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let open_time = start + Duration::hours(i as i64);
                Bar {
                    symbol: "AAA".to_string(),
                    open_time,
                    close_time: open_time + Duration::hours(1),
                    open: *close,
                    high: close * 1.001,
                    low: close * 0.999,
                    close: *close,
                    volume: 10_000.0,
                    interval: crate::models::Interval::H1,
                }
            })
            .collect();

        let mut strategy = LeftSideBuildingStrategy::new(&params(0.05, 0.03, 5));
        strategy.stop_loss_from_high = 1.0;

        let signals = run(&mut strategy, &bars);
        let buy_times: Vec<_> = signals
            .iter()
            .filter(|s| s.side == SignalSide::Buy)
            .map(|s| s.timestamp)
            .collect();
        // 47 hours of decline fit at most two builds a day apart.
        assert!(!buy_times.is_empty());
        assert!(buy_times.len() <= 2);
        for pair in buy_times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::hours(24));
        }
    }
}

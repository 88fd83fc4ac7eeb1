use crate::indicators::{calculate_ema, calculate_sma, trailing_average};
use crate::models::{Bar, ParameterSet, Signal, SignalSide};
use crate::param_utils::{get_param_bool, get_param_f64, get_param_usize_at_least};
use std::collections::HashMap;

const STRATEGY_NAME: &str = "moving-average";

/// Dual moving-average crossover. A BUY fires once the short average is above
/// the long one by at least the signal threshold, a SELL on the mirror move.
/// Each direction is emitted once per cross; optional volume confirmation
/// suppresses thin-volume signals until volume picks up.
pub struct MovingAverageStrategy {
    short_period: usize,
    long_period: usize,
    use_ema: bool,
    signal_threshold: f64,
    use_volume_confirmation: bool,
    volume_multiplier: f64,
    trend_lookback: usize,
    base_quantity: f64,
    last_emitted: HashMap<String, SignalSide>,
}

impl MovingAverageStrategy {
    pub fn new(parameters: &ParameterSet) -> Self {
        let short_period = get_param_usize_at_least(parameters, "shortPeriod", 5, 1);
        let long_period =
            get_param_usize_at_least(parameters, "longPeriod", 20, 2).max(short_period + 1);
        Self {
            short_period,
            long_period,
            use_ema: get_param_bool(parameters, "useEma", false),
            signal_threshold: get_param_f64(parameters, "signalThreshold", 0.01).max(0.0),
            use_volume_confirmation: get_param_bool(parameters, "useVolumeConfirmation", true),
            volume_multiplier: get_param_f64(parameters, "volumeMultiplier", 1.5).max(0.0),
            trend_lookback: get_param_usize_at_least(parameters, "trendLookback", 60, 2),
            base_quantity: get_param_f64(parameters, "baseQuantity", 100.0).max(0.0),
            last_emitted: HashMap::new(),
        }
    }

    fn moving_average(&self, prices: &[f64], period: usize) -> Vec<f64> {
        if self.use_ema {
            calculate_ema(prices, period)
        } else {
            calculate_sma(prices, period)
        }
    }

    fn volume_confirmation(&self, bars: &[Bar]) -> (bool, f64) {
        if !self.use_volume_confirmation {
            // Neutral contribution when the filter is off.
            return (true, 0.5);
        }
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let history = &volumes[..volumes.len() - 1];
        let average = trailing_average(history, self.long_period);
        if average <= 0.0 {
            return (true, 0.5);
        }
        let ratio = volumes[volumes.len() - 1] / average;
        let confirmed = ratio >= self.volume_multiplier;
        let score = (ratio / self.volume_multiplier).min(1.0);
        (confirmed, score)
    }

    fn trend_score(&self, prices: &[f64], side: SignalSide) -> f64 {
        if prices.len() < self.trend_lookback {
            return 0.5;
        }
        let trend_average = trailing_average(prices, self.trend_lookback);
        let close = prices[prices.len() - 1];
        let aligned = match side {
            SignalSide::Buy => close > trend_average,
            SignalSide::Sell => close < trend_average,
        };
        if aligned {
            1.0
        } else {
            0.0
        }
    }
}

impl super::Strategy for MovingAverageStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    fn min_history(&self) -> usize {
        self.long_period + 1
    }

    fn generate_signal(&mut self, symbol: &str, bars: &[Bar]) -> Option<Signal> {
        if bars.len() < self.min_history() {
            return None;
        }

        let prices: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let short = self.moving_average(&prices, self.short_period);
        let long = self.moving_average(&prices, self.long_period);

        let n = prices.len();
        let (curr_short, curr_long) = (short[n - 1], long[n - 1]);
        if curr_long <= 0.0 {
            return None;
        }

        let gap = (curr_short - curr_long) / curr_long;
        let last = self.last_emitted.get(symbol).copied();

        let side = if gap >= self.signal_threshold && last != Some(SignalSide::Buy) {
            SignalSide::Buy
        } else if -gap >= self.signal_threshold && last == Some(SignalSide::Buy) {
            SignalSide::Sell
        } else {
            return None;
        };
        let gap = gap.abs();

        let (volume_ok, volume_score) = self.volume_confirmation(bars);
        if !volume_ok {
            // Leave state untouched so the signal can fire once volume confirms.
            return None;
        }

        let gap_score = (gap / (self.signal_threshold.max(1e-9) * 2.0)).min(1.0);
        let trend_score = self.trend_score(&prices, side);
        let confidence = 0.5 * gap_score + 0.3 * volume_score + 0.2 * trend_score;

        self.last_emitted.insert(symbol.to_string(), side);

        let bar = &bars[n - 1];
        let direction = match side {
            SignalSide::Buy => "above",
            SignalSide::Sell => "below",
        };
        let reason = format!(
            "short MA {:.4} {} long MA {:.4} (gap {:.2}%)",
            curr_short,
            direction,
            curr_long,
            gap * 100.0
        );

        Some(Signal::new(
            symbol,
            side,
            bar.close,
            self.base_quantity,
            confidence,
            reason,
            STRATEGY_NAME,
            bar.close_time,
        ))
    }

    fn reset(&mut self) {
        self.last_emitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64], volumes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (close, volume))| {
                let open_time = start + Duration::days(i as i64);
                Bar {
                    symbol: "AAA".to_string(),
                    open_time,
                    close_time: open_time + Duration::days(1),
                    open: *close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close: *close,
                    volume: *volume,
                    interval: crate::models::Interval::D1,
                }
            })
            .collect()
    }

    fn params(volume_confirmation: bool) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("shortPeriod".to_string(), 5.0);
        params.insert("longPeriod".to_string(), 20.0);
        params.insert("signalThreshold".to_string(), 0.01);
        params.insert(
            "useVolumeConfirmation".to_string(),
            if volume_confirmation { 1.0 } else { 0.0 },
        );
        params
    }

    #[test]
    fn rising_series_buys_and_never_sells() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let volumes = vec![1_000.0; 100];
        let bars = series(&closes, &volumes);
        let mut strategy = MovingAverageStrategy::new(&params(false));

        let mut buys = 0;
        let mut first_buy_index = None;
        for i in 0..bars.len() {
            if let Some(signal) = strategy.generate_signal("AAA", &bars[..=i]) {
                match signal.side {
                    SignalSide::Buy => {
                        buys += 1;
                        first_buy_index.get_or_insert(i);
                    }
                    SignalSide::Sell => panic!("unexpected sell in rising series at bar {}", i),
                }
            }
        }

        assert_eq!(buys, 1);
        let first = first_buy_index.unwrap();
        assert!((20..30).contains(&first), "first buy at bar {}", first);
    }

    #[test]
    fn volume_confirmation_suppresses_thin_crossovers() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let volumes = vec![1_000.0; 60];
        let bars = series(&closes, &volumes);
        let mut strategy = MovingAverageStrategy::new(&params(true));

        for i in 0..bars.len() {
            // Flat volume never reaches 1.5x its trailing average.
            assert!(strategy.generate_signal("AAA", &bars[..=i]).is_none());
        }
    }

    #[test]
    fn downward_cross_emits_sell_after_uptrend() {
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..40).map(|i| 139.0 - 2.0 * i as f64));
        let volumes = vec![1_000.0; closes.len()];
        let bars = series(&closes, &volumes);
        let mut strategy = MovingAverageStrategy::new(&params(false));

        let mut sides = Vec::new();
        for i in 0..bars.len() {
            if let Some(signal) = strategy.generate_signal("AAA", &bars[..=i]) {
                assert!(signal.confidence > 0.0 && signal.confidence <= 1.0);
                sides.push(signal.side);
            }
        }
        assert_eq!(sides, vec![SignalSide::Buy, SignalSide::Sell]);
    }

    #[test]
    fn reset_clears_crossover_memory() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let volumes = vec![1_000.0; 30];
        let bars = series(&closes, &volumes);
        let mut strategy = MovingAverageStrategy::new(&params(false));

        let mut first_pass = Vec::new();
        for i in 0..bars.len() {
            if let Some(signal) = strategy.generate_signal("AAA", &bars[..=i]) {
                first_pass.push(signal.side);
            }
        }
        strategy.reset();
        let mut second_pass = Vec::new();
        for i in 0..bars.len() {
            if let Some(signal) = strategy.generate_signal("AAA", &bars[..=i]) {
                second_pass.push(signal.side);
            }
        }
        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass, vec![SignalSide::Buy]);
    }
}

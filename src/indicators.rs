pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 {
        return vec![prices[0]; prices.len()];
    }
    if period == 1 {
        return prices.to_vec();
    }
    if prices.len() < period {
        return vec![prices[0]; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        sma_values.push(prices[0]);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// Mean of the trailing `period` values ending at the last element.
pub fn trailing_average(values: &[f64], period: usize) -> f64 {
    if values.is_empty() || period == 0 {
        return 0.0;
    }
    let window = &values[values.len().saturating_sub(period)..];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Simple bar-over-bar returns. Empty input or a single price yields no
/// returns; a zero previous price contributes a zero return.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|pair| {
            if pair[0] > 0.0 {
                (pair[1] - pair[0]) / pair[0]
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_pads_warmup_and_averages_window() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&prices, 3);
        assert_eq!(sma.len(), prices.len());
        assert_eq!(sma[0], 1.0);
        assert_eq!(sma[1], 1.0);
        assert!((sma[2] - 2.0).abs() < 1e-12);
        assert!((sma[4] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ema_starts_at_first_price() {
        let prices = vec![10.0, 10.0, 10.0];
        let ema = calculate_ema(&prices, 2);
        assert_eq!(ema, vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn trailing_average_uses_last_window() {
        let values = vec![1.0, 1.0, 4.0, 4.0];
        assert!((trailing_average(&values, 2) - 4.0).abs() < 1e-12);
        assert_eq!(trailing_average(&[], 5), 0.0);
    }

    #[test]
    fn simple_returns_handles_short_input() {
        assert!(simple_returns(&[]).is_empty());
        assert!(simple_returns(&[100.0]).is_empty());
        let returns = simple_returns(&[100.0, 110.0]);
        assert!((returns[0] - 0.1).abs() < 1e-12);
    }
}

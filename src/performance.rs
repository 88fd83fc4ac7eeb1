use crate::models::{EquityPoint, PerformanceSummary, Trade};
use statrs::statistics::Statistics;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Pure metric functions over an equity curve and trade list. Every function
/// tolerates empty and single-point inputs by returning 0 instead of NaN.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(
        initial_capital: f64,
        final_equity: f64,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
    ) -> PerformanceSummary {
        let returns = Self::periodic_returns(equity_curve);
        let closed: Vec<&Trade> = trades.iter().filter(|t| t.is_closed()).collect();

        let total_trades = closed.len() as i32;
        let winning_trades = closed
            .iter()
            .filter(|t| t.pnl.unwrap_or(0.0) > 0.0)
            .count() as i32;
        let losing_trades = closed
            .iter()
            .filter(|t| t.pnl.unwrap_or(0.0) < 0.0)
            .count() as i32;

        let total_return = Self::total_return(initial_capital, final_equity);

        PerformanceSummary {
            total_return,
            annualized_return: Self::annualized_return(total_return, equity_curve.len()),
            volatility: Self::volatility(&returns),
            max_drawdown: Self::max_drawdown(equity_curve),
            sharpe_ratio: Self::sharpe_ratio(&returns),
            sortino_ratio: Self::sortino_ratio(&returns),
            win_rate: Self::win_rate(&closed),
            profit_factor: Self::profit_factor(&closed),
            average_trade: Self::average_trade(&closed),
            total_trades,
            winning_trades,
            losing_trades,
        }
    }

    pub fn total_return(initial_capital: f64, final_equity: f64) -> f64 {
        if initial_capital <= 0.0 || !final_equity.is_finite() {
            return 0.0;
        }
        (final_equity - initial_capital) / initial_capital
    }

    /// Compounds the total return over elapsed trading periods using the
    /// 252-trading-day convention. One equity point per processed bar.
    pub fn annualized_return(total_return: f64, equity_points: usize) -> f64 {
        if equity_points < 2 || !total_return.is_finite() {
            return 0.0;
        }
        let growth = 1.0 + total_return;
        if growth <= 0.0 {
            return -1.0;
        }
        let periods = (equity_points - 1) as f64;
        growth.powf(TRADING_DAYS_PER_YEAR / periods) - 1.0
    }

    /// Largest causal peak-to-trough decline, as a fraction in [0, 1].
    pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
        if equity_curve.len() < 2 {
            return 0.0;
        }

        let mut peak = equity_curve[0].equity;
        let mut max_drawdown = 0.0;
        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
            } else if peak > 0.0 {
                let drawdown = (peak - point.equity) / peak;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }
        max_drawdown
    }

    pub fn sharpe_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.to_vec().mean();
        let std_dev = returns.to_vec().std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }
        (mean / std_dev) * TRADING_DAYS_PER_YEAR.sqrt()
    }

    pub fn sortino_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.to_vec().mean();
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.is_empty() {
            return 0.0;
        }
        let downside_dev =
            (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt();
        if downside_dev == 0.0 || !downside_dev.is_finite() {
            return 0.0;
        }
        (mean / downside_dev) * TRADING_DAYS_PER_YEAR.sqrt()
    }

    pub fn volatility(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let std_dev = returns.to_vec().std_dev();
        if !std_dev.is_finite() {
            return 0.0;
        }
        std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    fn win_rate(closed: &[&Trade]) -> f64 {
        if closed.is_empty() {
            return 0.0;
        }
        let winners = closed.iter().filter(|t| t.pnl.unwrap_or(0.0) > 0.0).count();
        winners as f64 / closed.len() as f64
    }

    /// Gross profit over absolute gross loss. Profitable with no losing
    /// trades yields the infinity sentinel; no closed trades yields 0.
    fn profit_factor(closed: &[&Trade]) -> f64 {
        if closed.is_empty() {
            return 0.0;
        }
        let gross_profit: f64 = closed
            .iter()
            .filter_map(|t| t.pnl)
            .filter(|pnl| *pnl > 0.0)
            .sum();
        let gross_loss: f64 = closed
            .iter()
            .filter_map(|t| t.pnl)
            .filter(|pnl| *pnl < 0.0)
            .sum();
        if gross_loss == 0.0 {
            if gross_profit > 0.0 {
                return f64::INFINITY;
            }
            return 0.0;
        }
        gross_profit / gross_loss.abs()
    }

    fn average_trade(closed: &[&Trade]) -> f64 {
        if closed.is_empty() {
            return 0.0;
        }
        let sum: f64 = closed.iter().map(|t| t.pnl.unwrap_or(0.0)).sum();
        sum / closed.len() as f64
    }

    fn periodic_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
        equity_curve
            .windows(2)
            .map(|window| {
                let prev = window[0].equity;
                let curr = window[1].equity;
                if prev > 0.0 {
                    (curr - prev) / prev
                } else {
                    0.0
                }
            })
            .collect()
    }
}

use crate::config::BacktestConfig;
use crate::data::MarketDataSource;
use crate::error::EngineError;
use crate::models::{
    AccountState, BacktestResult, Bar, EquityPoint, Order, OrderStatus, OrderType, Position,
    Signal, SignalSide, Trade,
};
use crate::performance::PerformanceCalculator;
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

const QUANTITY_EPSILON: f64 = 1e-9;
const CASH_EPSILON: f64 = 1e-6;
const PAUSE_POLL_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Cooperative run-control flag, checked once per bar. Pausing suspends the
/// loop without losing state; stopping ends the run early but still yields a
/// result for the bars processed so far.
#[derive(Clone)]
pub struct RunControl {
    state: Arc<AtomicU8>,
}

impl RunControl {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn pause(&self) {
        // Stop wins over pause.
        let _ = self
            .state
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        let _ = self
            .state
            .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.state.store(2, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> RunState {
        match self.state.load(Ordering::SeqCst) {
            0 => RunState::Running,
            1 => RunState::Paused,
            _ => RunState::Stopped,
        }
    }
}

struct PendingOrder {
    order: Order,
    created_bar: usize,
}

struct OpenLot {
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    commission: f64,
}

/// Simulates one strategy over historical bars: feeds the growing history
/// window to the strategy, turns signals into pending orders, fills them
/// against subsequent bars and accumulates the equity curve.
pub struct BacktestEngine {
    config: BacktestConfig,
    strategy: Box<dyn Strategy>,
    control: RunControl,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig, strategy: Box<dyn Strategy>) -> Self {
        Self {
            config,
            strategy,
            control: RunControl::new(),
        }
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn run(&mut self, source: &dyn MarketDataSource) -> Result<BacktestResult, EngineError> {
        self.config.validate()?;
        self.strategy.reset();

        let merged = self.load_bars(source)?;
        if merged.is_empty() {
            return Err(EngineError::config(format!(
                "no bars available for {:?} between {} and {}",
                self.config.symbols, self.config.start_date, self.config.end_date
            )));
        }
        info!(
            "Backtesting {} over {} bars ({} symbols)",
            self.strategy.name(),
            merged.len(),
            self.config.symbols.len()
        );

        let mut account = AccountState::new(self.config.initial_capital);
        let mut pending: Vec<PendingOrder> = Vec::new();
        let mut open_lots: HashMap<String, Vec<OpenLot>> = HashMap::new();
        let mut closed_trades: Vec<Trade> = Vec::new();
        let mut history: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut marks: HashMap<String, f64> = HashMap::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut peak = self.config.initial_capital;
        let mut rejected_for_cash = 0usize;

        for (bar_index, bar) in merged.iter().enumerate() {
            loop {
                match self.control.snapshot() {
                    RunState::Running => break,
                    RunState::Paused => {
                        std::thread::sleep(StdDuration::from_millis(PAUSE_POLL_MS))
                    }
                    RunState::Stopped => break,
                }
            }
            if self.control.snapshot() == RunState::Stopped {
                info!("Backtest stopped at bar {}/{}", bar_index, merged.len());
                break;
            }

            self.fill_pending_orders(
                bar,
                bar_index,
                &mut pending,
                &mut account,
                &mut open_lots,
                &mut closed_trades,
            );

            let window = history.entry(bar.symbol.clone()).or_default();
            window.push(bar.clone());
            if window.len() >= self.strategy.min_history() {
                let signal = self.strategy.generate_signal(&bar.symbol, window);
                if let Some(signal) = signal {
                    match self.admit_signal(&signal, &account, bar_index) {
                        Some(order) => pending.push(order),
                        None => rejected_for_cash += 1,
                    }
                }
            }

            marks.insert(bar.symbol.clone(), bar.close);
            let equity = account.total_value(&marks);
            if equity > peak {
                peak = equity;
            }
            let drawdown = if peak > 0.0 { (peak - equity) / peak } else { 0.0 };
            equity_curve.push(EquityPoint {
                time: bar.close_time,
                equity,
                drawdown,
            });
        }

        if rejected_for_cash > 0 {
            debug!(
                "{} signal(s) dropped for insufficient capital",
                rejected_for_cash
            );
        }

        let final_equity = equity_curve
            .last()
            .map(|point| point.equity)
            .unwrap_or(self.config.initial_capital);

        // Open lots stay open, valued at the last mark.
        let mut trades = closed_trades;
        for (symbol, lots) in open_lots {
            for lot in lots {
                trades.push(Trade {
                    id: Uuid::new_v4().to_string(),
                    symbol: symbol.clone(),
                    entry_time: lot.entry_time,
                    exit_time: None,
                    entry_price: lot.entry_price,
                    exit_price: None,
                    quantity: lot.quantity,
                    pnl: None,
                    pnl_percent: None,
                    commission: lot.commission,
                });
            }
        }
        trades.sort_by(|a, b| a.entry_time.cmp(&b.entry_time));

        let performance = PerformanceCalculator::calculate(
            self.config.initial_capital,
            final_equity,
            &equity_curve,
            &trades,
        );

        let start_date = merged.first().map(|b| b.open_time).unwrap_or(self.config.start_date);
        let end_date = equity_curve
            .last()
            .map(|point| point.time)
            .unwrap_or(self.config.end_date);

        Ok(BacktestResult {
            id: Uuid::new_v4().to_string(),
            strategy: self.strategy.name().to_string(),
            symbols: self.config.symbols.clone(),
            start_date,
            end_date,
            initial_capital: self.config.initial_capital,
            final_equity,
            performance,
            equity_curve,
            trades,
            created_at: Utc::now(),
        })
    }

    /// Loads, range-filters, validates and merges the per-symbol bar streams
    /// into one strictly time-ordered sequence. Ties break by symbol so the
    /// merge is deterministic.
    fn load_bars(&self, source: &dyn MarketDataSource) -> Result<Vec<Bar>, EngineError> {
        let interval = self.config.interval;
        let limit = crate::data::bars_needed(self.config.start_date, self.config.end_date, interval);

        let mut merged: Vec<Bar> = Vec::new();
        for symbol in &self.config.symbols {
            let mut bars = source
                .get_klines(symbol, interval, limit)
                .map_err(|e| EngineError::DataSource(format!("{}: {}", symbol, e)))?;
            // Sources promise ascending order; re-sort defensively anyway.
            bars.sort_by(|a, b| a.open_time.cmp(&b.open_time));
            bars.retain(|bar| {
                bar.open_time >= self.config.start_date && bar.open_time <= self.config.end_date
            });

            for pair in bars.windows(2) {
                if pair[1].open_time <= pair[0].open_time {
                    return Err(EngineError::data_integrity(
                        symbol.clone(),
                        pair[1].open_time,
                        "non-monotonic open time",
                    ));
                }
            }
            for bar in &bars {
                if !bar.is_well_formed() {
                    return Err(EngineError::data_integrity(
                        symbol.clone(),
                        bar.open_time,
                        format!(
                            "inconsistent OHLC (open {} high {} low {} close {})",
                            bar.open, bar.high, bar.low, bar.close
                        ),
                    ));
                }
            }
            if bars.is_empty() {
                warn!("No bars for {} within the requested range", symbol);
            }
            merged.extend(bars);
        }

        merged.sort_by(|a, b| {
            a.open_time
                .cmp(&b.open_time)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(merged)
    }

    /// Capital-sufficiency gate between a signal and the order book.
    fn admit_signal(
        &self,
        signal: &Signal,
        account: &AccountState,
        bar_index: usize,
    ) -> Option<PendingOrder> {
        if signal.quantity <= QUANTITY_EPSILON {
            return None;
        }
        match signal.side {
            SignalSide::Buy => {
                let estimated_cost =
                    signal.price * signal.quantity * (1.0 + self.config.commission_rate);
                if estimated_cost > account.cash + CASH_EPSILON {
                    debug!(
                        "Rejecting buy signal for {} (cost {:.2} > cash {:.2})",
                        signal.symbol, estimated_cost, account.cash
                    );
                    return None;
                }
            }
            SignalSide::Sell => {
                if account.position_quantity(&signal.symbol) <= QUANTITY_EPSILON {
                    return None;
                }
            }
        }
        Some(PendingOrder {
            order: Order::from_signal(signal, OrderType::Market, signal.timestamp),
            created_bar: bar_index,
        })
    }

    fn fill_pending_orders(
        &self,
        bar: &Bar,
        bar_index: usize,
        pending: &mut Vec<PendingOrder>,
        account: &mut AccountState,
        open_lots: &mut HashMap<String, Vec<OpenLot>>,
        closed_trades: &mut Vec<Trade>,
    ) {
        let ttl = self.config.order_ttl_bars;
        let mut remaining = Vec::with_capacity(pending.len());

        for mut entry in pending.drain(..) {
            if entry.order.symbol != bar.symbol {
                if bar_index.saturating_sub(entry.created_bar) >= ttl {
                    entry.order.status = OrderStatus::Cancelled;
                    debug!("Order {} expired unfilled", entry.order.id);
                } else {
                    remaining.push(entry);
                }
                continue;
            }

            let fill_price = match self.fill_price(&entry.order, bar) {
                Some(price) => price,
                None => {
                    if bar_index - entry.created_bar >= ttl {
                        entry.order.status = OrderStatus::Cancelled;
                        debug!("Order {} expired unfilled", entry.order.id);
                    } else {
                        remaining.push(entry);
                    }
                    continue;
                }
            };

            match entry.order.side {
                SignalSide::Buy => {
                    let cost = fill_price * entry.order.quantity;
                    let commission = cost * self.config.commission_rate;
                    if cost + commission > account.cash + CASH_EPSILON {
                        // Cash moved since admission; a fill may not overdraw.
                        entry.order.status = OrderStatus::Cancelled;
                        debug!(
                            "Cancelling buy {} for {}: cost {:.2} exceeds cash {:.2}",
                            entry.order.id, entry.order.symbol, cost + commission, account.cash
                        );
                        continue;
                    }
                    account.cash -= cost + commission;
                    let position = account
                        .positions
                        .entry(entry.order.symbol.clone())
                        .or_insert(Position {
                            quantity: 0.0,
                            avg_entry_price: 0.0,
                        });
                    let total = position.quantity + entry.order.quantity;
                    position.avg_entry_price = (position.quantity * position.avg_entry_price
                        + entry.order.quantity * fill_price)
                        / total;
                    position.quantity = total;

                    open_lots
                        .entry(entry.order.symbol.clone())
                        .or_default()
                        .push(OpenLot {
                            entry_time: bar.open_time,
                            entry_price: fill_price,
                            quantity: entry.order.quantity,
                            commission,
                        });
                }
                SignalSide::Sell => {
                    let held = account.position_quantity(&entry.order.symbol);
                    let quantity = entry.order.quantity.min(held);
                    if quantity <= QUANTITY_EPSILON {
                        entry.order.status = OrderStatus::Cancelled;
                        continue;
                    }
                    let proceeds = fill_price * quantity;
                    let commission = proceeds * self.config.commission_rate;
                    account.cash += proceeds - commission;

                    if let Some(position) = account.positions.get_mut(&entry.order.symbol) {
                        position.quantity -= quantity;
                        if position.quantity <= QUANTITY_EPSILON {
                            account.positions.remove(&entry.order.symbol);
                        }
                    }

                    Self::close_lots_fifo(
                        open_lots.entry(entry.order.symbol.clone()).or_default(),
                        &entry.order.symbol,
                        quantity,
                        fill_price,
                        commission,
                        bar.open_time,
                        closed_trades,
                    );
                }
            }

            entry.order.status = OrderStatus::Filled;
            entry.order.fill_price = Some(fill_price);
            entry.order.fill_time = Some(bar.open_time);
        }

        *pending = remaining;
    }

    /// Fill price for this bar, or `None` when the order's condition is not
    /// met. Market orders fill at the open adjusted for slippage; limit
    /// orders at their limit when the bar range reaches it. Either way the
    /// result is clamped into [low, high].
    fn fill_price(&self, order: &Order, bar: &Bar) -> Option<f64> {
        let raw = match order.order_type {
            OrderType::Market => {
                let slip = bar.open * self.config.slippage_rate;
                match order.side {
                    SignalSide::Buy => bar.open + slip,
                    SignalSide::Sell => bar.open - slip,
                }
            }
            OrderType::Limit => {
                let limit = order.limit_price?;
                match order.side {
                    SignalSide::Buy if bar.low <= limit => limit,
                    SignalSide::Sell if bar.high >= limit => limit,
                    _ => return None,
                }
            }
        };
        Some(raw.clamp(bar.low, bar.high))
    }

    fn close_lots_fifo(
        lots: &mut Vec<OpenLot>,
        symbol: &str,
        mut quantity: f64,
        exit_price: f64,
        exit_commission: f64,
        exit_time: DateTime<Utc>,
        closed_trades: &mut Vec<Trade>,
    ) {
        let total_exit_quantity = quantity.max(QUANTITY_EPSILON);
        while quantity > QUANTITY_EPSILON && !lots.is_empty() {
            let lot = &mut lots[0];
            let take = lot.quantity.min(quantity);
            let entry_share = lot.commission * take / lot.quantity.max(QUANTITY_EPSILON);
            let exit_share = exit_commission * take / total_exit_quantity;
            let pnl = (exit_price - lot.entry_price) * take - entry_share - exit_share;
            let exposure = lot.entry_price * take;

            closed_trades.push(Trade {
                id: Uuid::new_v4().to_string(),
                symbol: symbol.to_string(),
                entry_time: lot.entry_time,
                exit_time: Some(exit_time),
                entry_price: lot.entry_price,
                exit_price: Some(exit_price),
                quantity: take,
                pnl: Some(pnl),
                pnl_percent: if exposure > 0.0 { Some(pnl / exposure) } else { None },
                commission: entry_share + exit_share,
            });

            lot.quantity -= take;
            lot.commission -= entry_share;
            quantity -= take;
            if lot.quantity <= QUANTITY_EPSILON {
                lots.remove(0);
            }
        }
    }
}

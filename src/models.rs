use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Immutable parameter vector evaluated by the optimizer. BTreeMap keeps
/// iteration order stable so gene ordering and cache keys are deterministic.
pub type ParameterSet = BTreeMap<String, f64>;

pub const MAX_OPTIMIZATION_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::M1 => Duration::minutes(1),
            Interval::M5 => Duration::minutes(5),
            Interval::M15 => Duration::minutes(15),
            Interval::H1 => Duration::hours(1),
            Interval::D1 => Duration::days(1),
        }
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "1h" => Ok(Interval::H1),
            "1d" | "1day" => Ok(Interval::D1),
            other => Err(anyhow!("Unknown interval '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: Interval,
}

impl Bar {
    /// OHLC sanity: high caps the range, low floors it.
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
    pub change_24h: f64,
    pub volume_24h: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSide {
    Buy,
    Sell,
}

impl SignalSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Buy => "buy",
            SignalSide::Sell => "sell",
        }
    }
}

impl FromStr for SignalSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(SignalSide::Buy),
            "sell" => Ok(SignalSide::Sell),
            other => Err(anyhow!("Unknown signal side '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
}

impl SignalStrength {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            SignalStrength::Strong
        } else if confidence >= 0.5 {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStrength::Strong => "strong",
            SignalStrength::Moderate => "moderate",
            SignalStrength::Weak => "weak",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub side: SignalSide,
    pub price: f64,
    pub quantity: f64,
    pub confidence: f64,
    pub strength: SignalStrength,
    pub reason: String,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        side: SignalSide,
        price: f64,
        quantity: f64,
        confidence: f64,
        reason: String,
        strategy: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            id: generate_signal_id(strategy, symbol, timestamp),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            confidence,
            strength: SignalStrength::from_confidence(confidence),
            reason,
            strategy: strategy.to_string(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: SignalSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
    pub fill_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn from_signal(signal: &Signal, order_type: OrderType, created_at: DateTime<Utc>) -> Self {
        let limit_price = match order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(signal.price),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            order_type,
            quantity: signal.quantity,
            limit_price,
            status: OrderStatus::Pending,
            fill_price: None,
            fill_time: None,
            created_at,
        }
    }
}

/// A completed (or still open) round trip. `exit_time` stays `None` until an
/// opposing fill closes the position slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub commission: f64,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub quantity: f64,
    pub avg_entry_price: f64,
}

#[derive(Debug, Clone)]
pub struct AccountState {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
}

impl AccountState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            positions: HashMap::new(),
        }
    }

    pub fn position_quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0.0)
    }

    /// Mark-to-market portfolio value against the given close prices. Symbols
    /// without a mark fall back to their average entry price.
    pub fn total_value(&self, marks: &HashMap<String, f64>) -> f64 {
        let positions_value: f64 = self
            .positions
            .iter()
            .map(|(symbol, position)| {
                let mark = marks
                    .get(symbol)
                    .copied()
                    .unwrap_or(position.avg_entry_price);
                position.quantity * mark
            })
            .sum();
        self.cash + positions_value
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
    pub drawdown: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub win_rate: f64,
    /// Infinity marks a profitable run with no losing trades; JSON carries
    /// that sentinel as null.
    #[serde(
        serialize_with = "serialize_profit_factor",
        deserialize_with = "deserialize_profit_factor"
    )]
    pub profit_factor: f64,
    pub average_trade: f64,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub performance: PerformanceSummary,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Integer,
    Float,
    Percent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub kind: ParameterKind,
}

impl ParameterRange {
    pub fn width(&self) -> f64 {
        (self.max - self.min).max(f64::EPSILON)
    }

    /// Clamp into [min, max] and snap to the step grid / integer kind.
    pub fn snap(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        let snapped = if self.step > 0.0 {
            let steps = ((clamped - self.min) / self.step).round();
            (self.min + steps * self.step).clamp(self.min, self.max)
        } else {
            clamped
        };
        match self.kind {
            ParameterKind::Integer => snapped.round().clamp(self.min, self.max),
            ParameterKind::Float | ParameterKind::Percent => snapped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRecord {
    pub timestamp: DateTime<Utc>,
    pub parameters: ParameterSet,
    pub metrics: PerformanceSummary,
    pub algorithm: String,
    pub improvement: f64,
    pub confidence: f64,
}

/// Append a record, pruning the oldest entries beyond the history bound.
pub fn push_optimization_record(history: &mut Vec<OptimizationRecord>, record: OptimizationRecord) {
    history.push(record);
    if history.len() > MAX_OPTIMIZATION_HISTORY {
        let excess = history.len() - MAX_OPTIMIZATION_HISTORY;
        history.drain(0..excess);
    }
}

pub fn generate_signal_id(strategy: &str, symbol: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}_{}_{}", strategy, symbol, timestamp.timestamp_millis())
}

fn serialize_profit_factor<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if value.is_finite() {
        serializer.serialize_some(value)
    } else {
        serializer.serialize_none()
    }
}

fn deserialize_profit_factor<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.unwrap_or(f64::INFINITY))
}

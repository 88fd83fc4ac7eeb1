use crate::error::EngineError;
use crate::models::{Interval, ParameterSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_COMMISSION_RATE: f64 = 0.1;

/// Configuration for one backtest run. Validated eagerly; the engine refuses
/// to start on any violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    /// Pending limit orders are cancelled after this many bars.
    pub order_ttl_bars: usize,
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbols.is_empty() {
            return Err(EngineError::config("symbol list must not be empty"));
        }
        if self
            .symbols
            .iter()
            .any(|symbol| symbol.trim().is_empty())
        {
            return Err(EngineError::config("symbol names must not be blank"));
        }
        if self.start_date >= self.end_date {
            return Err(EngineError::config(format!(
                "start date {} must be before end date {}",
                self.start_date, self.end_date
            )));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::config(format!(
                "initial capital must be positive (value: {})",
                self.initial_capital
            )));
        }
        if !self.commission_rate.is_finite()
            || self.commission_rate < 0.0
            || self.commission_rate > MAX_COMMISSION_RATE
        {
            return Err(EngineError::config(format!(
                "commission rate must be within [0, {}] (value: {})",
                MAX_COMMISSION_RATE, self.commission_rate
            )));
        }
        if !self.slippage_rate.is_finite() || self.slippage_rate < 0.0 {
            return Err(EngineError::config(format!(
                "slippage rate must be >= 0 (value: {})",
                self.slippage_rate
            )));
        }
        if self.order_ttl_bars == 0 {
            return Err(EngineError::config("order TTL must be at least one bar"));
        }
        Ok(())
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        let end_date = Utc::now();
        Self {
            symbols: Vec::new(),
            interval: Interval::D1,
            start_date: end_date - chrono::Duration::days(365),
            end_date,
            initial_capital: 100_000.0,
            commission_rate: 0.001,
            slippage_rate: 0.0,
            order_ttl_bars: 10,
        }
    }
}

/// Settings governing how often and how far the parameter optimizer may move
/// a live configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerSettings {
    pub enabled: bool,
    /// Minimum gap between optimization attempts.
    pub adjustment_frequency_hours: i64,
    /// Cap on the normalized parameter-change magnitude an applied result may have.
    pub adjustment_magnitude: f64,
    pub min_expected_improvement: f64,
    pub min_confidence: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            adjustment_frequency_hours: 24,
            adjustment_magnitude: 0.2,
            min_expected_improvement: 0.05,
            min_confidence: 0.6,
        }
    }
}

/// One entry in a comparison batch: a strategy plus its parameter overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareEntry {
    pub name: String,
    pub strategy: String,
    #[serde(default)]
    pub parameters: ParameterSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BacktestConfig {
        BacktestConfig {
            symbols: vec!["AAPL".to_string()],
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_symbols() {
        let config = BacktestConfig::default();
        assert!(matches!(
            config.validate(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn rejects_inverted_date_range() {
        let mut config = valid_config();
        config.end_date = config.start_date;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_commission() {
        let mut config = valid_config();
        config.commission_rate = 0.2;
        assert!(config.validate().is_err());

        config.commission_rate = -0.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_capital() {
        let mut config = valid_config();
        config.initial_capital = 0.0;
        assert!(config.validate().is_err());
    }
}

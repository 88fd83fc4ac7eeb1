use chrono::{DateTime, Utc};
use thiserror::Error;

/// Fatal and per-call failures raised by the backtest core. Cache write
/// failures are logged instead of raised; report writes surface as `Io`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid backtest config: {0}")]
    Config(String),

    #[error("malformed bar data for {symbol} at {time}: {reason}")]
    DataIntegrity {
        symbol: String,
        time: DateTime<Utc>,
        reason: String,
    },

    #[error("optimization failed: {0}")]
    Optimization(String),

    #[error("data source error: {0}")]
    DataSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    pub fn data_integrity(
        symbol: impl Into<String>,
        time: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::DataIntegrity {
            symbol: symbol.into(),
            time,
            reason: reason.into(),
        }
    }
}

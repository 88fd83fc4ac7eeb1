use crate::models::{Bar, Interval, Ticker};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const SNAPSHOT_VERSION: u32 = 1;

/// Historical data collaborator. Implementations must return bars in
/// ascending open-time order; the engine re-sorts defensively regardless.
pub trait MarketDataSource: Send + Sync {
    /// Most recent `limit` bars for the symbol at the given interval.
    fn get_klines(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Bar>>;

    fn get_ticker(&self, symbol: &str) -> Result<Ticker>;
}

#[derive(Serialize, Deserialize)]
struct MarketSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    bars_by_symbol: HashMap<String, Vec<Bar>>,
}

/// Bar series loaded from a versioned bincode snapshot file.
pub struct SnapshotDataSource {
    bars_by_symbol: HashMap<String, Vec<Bar>>,
}

impl SnapshotDataSource {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open snapshot {}", path.display()))?;
        let snapshot: MarketSnapshot = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("failed to decode snapshot {}", path.display()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(anyhow!(
                "snapshot {} has version {} (expected {})",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            ));
        }
        let mut bars_by_symbol = snapshot.bars_by_symbol;
        for bars in bars_by_symbol.values_mut() {
            bars.sort_by(|a, b| a.open_time.cmp(&b.open_time));
        }
        Ok(Self { bars_by_symbol })
    }

    pub fn save(path: &Path, bars_by_symbol: &HashMap<String, Vec<Bar>>) -> Result<()> {
        let snapshot = MarketSnapshot {
            version: SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            bars_by_symbol: bars_by_symbol.clone(),
        };
        let file = File::create(path)
            .with_context(|| format!("failed to create snapshot {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), &snapshot)
            .with_context(|| format!("failed to encode snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.bars_by_symbol.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl MarketDataSource for SnapshotDataSource {
    fn get_klines(&self, symbol: &str, _interval: Interval, limit: usize) -> Result<Vec<Bar>> {
        let bars = self
            .bars_by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("symbol {} not present in snapshot", symbol))?;
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let bars = self
            .bars_by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("symbol {} not present in snapshot", symbol))?;
        let last = bars
            .last()
            .ok_or_else(|| anyhow!("symbol {} has no bars", symbol))?;
        let previous_close = if bars.len() >= 2 {
            bars[bars.len() - 2].close
        } else {
            last.close
        };
        let change_24h = if previous_close > 0.0 {
            (last.close - previous_close) / previous_close
        } else {
            0.0
        };
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: last.close,
            change_24h,
            volume_24h: last.volume,
            timestamp: last.close_time,
        })
    }
}

/// Deterministic seeded random walk, for demo runs and tests. Also accepts
/// pre-built bar series via `with_bars`.
pub struct SyntheticDataSource {
    bars_by_symbol: HashMap<String, Vec<Bar>>,
}

impl SyntheticDataSource {
    pub fn generate(symbols: &[String], interval: Interval, count: usize, seed: u64) -> Self {
        let mut bars_by_symbol = HashMap::new();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let step = interval.duration();
        let start = end - step * count as i32;

        for (symbol_index, symbol) in symbols.iter().enumerate() {
            let mut rng = fastrand::Rng::with_seed(seed.wrapping_add(symbol_index as u64));
            let mut price = 50.0 + 10.0 * symbol_index as f64;
            let mut bars = Vec::with_capacity(count);
            for i in 0..count {
                let open_time = start + step * i as i32;
                let drift = (rng.f64() - 0.5) * 0.02;
                let open = price;
                let close = (open * (1.0 + drift)).max(0.01);
                let high = open.max(close) * (1.0 + rng.f64() * 0.005);
                let low = open.min(close) * (1.0 - rng.f64() * 0.005);
                let volume = 5_000.0 + rng.f64() * 20_000.0;
                bars.push(Bar {
                    symbol: symbol.clone(),
                    open_time,
                    close_time: open_time + step,
                    open,
                    high,
                    low,
                    close,
                    volume,
                    interval,
                });
                price = close;
            }
            bars_by_symbol.insert(symbol.clone(), bars);
        }
        Self { bars_by_symbol }
    }

    pub fn with_bars(symbol: &str, bars: Vec<Bar>) -> Self {
        let mut bars_by_symbol = HashMap::new();
        bars_by_symbol.insert(symbol.to_string(), bars);
        Self { bars_by_symbol }
    }

    pub fn insert(&mut self, symbol: &str, bars: Vec<Bar>) {
        self.bars_by_symbol.insert(symbol.to_string(), bars);
    }

    pub fn bars_by_symbol(&self) -> &HashMap<String, Vec<Bar>> {
        &self.bars_by_symbol
    }
}

impl MarketDataSource for SyntheticDataSource {
    fn get_klines(&self, symbol: &str, _interval: Interval, limit: usize) -> Result<Vec<Bar>> {
        let bars = self
            .bars_by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("no synthetic series for {}", symbol))?;
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let bars = self
            .bars_by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("no synthetic series for {}", symbol))?;
        let last = bars
            .last()
            .ok_or_else(|| anyhow!("no synthetic bars for {}", symbol))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: last.close,
            change_24h: 0.0,
            volume_24h: last.volume,
            timestamp: last.close_time,
        })
    }
}

/// Date-range helper for count-based kline APIs: how many bars cover the
/// span at this interval.
pub fn bars_needed(start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> usize {
    let span = end - start;
    let interval_secs = interval.duration().num_seconds().max(1);
    (span.num_seconds() / interval_secs + 1).max(1) as usize
}

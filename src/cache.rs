use crate::data::MarketDataSource;
use crate::models::{Bar, Interval, Ticker};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CACHE_EXTENSION: &str = "bin";

/// Content address for one cached bar series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CacheKey {
    fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            sanitize_symbol(&self.symbol),
            self.interval.as_str(),
            self.start.timestamp(),
            self.end.timestamp(),
            CACHE_EXTENSION
        )
    }
}

fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    stored_at: DateTime<Utc>,
    payload: T,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Write-then-rename so concurrent readers never observe a partial file.
/// The temp file lands in the same directory to keep the rename atomic.
pub fn write_atomic<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    let entry = CacheEntry {
        stored_at: Utc::now(),
        payload,
    };
    let encoded = bincode::serialize(&entry).context("failed to encode cache entry")?;
    let tmp_path = path.with_extension(format!("tmp-{}", fastrand::u64(..)));
    fs::write(&tmp_path, &encoded)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to move cache entry into {}", path.display()))?;
    Ok(())
}

/// Read an entry written by `write_atomic`; `None` when it is older than
/// `expiry_hours`.
pub fn read_fresh<T: DeserializeOwned>(path: &Path, expiry_hours: i64) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    let entry: CacheEntry<T> = bincode::deserialize(&bytes)
        .with_context(|| format!("failed to decode cache entry {}", path.display()))?;
    if Utc::now() - entry.stored_at > Duration::hours(expiry_hours) {
        return Ok(None);
    }
    Ok(Some(entry.payload))
}

/// File-system cache of bar series keyed by (symbol, interval, start, end),
/// with an in-memory front. Failures to persist are logged, never fatal:
/// the data is re-fetchable.
#[derive(Clone)]
pub struct BarCache {
    dir: PathBuf,
    expiry_hours: i64,
    memory: Arc<DashMap<CacheKey, Vec<Bar>>>,
}

impl BarCache {
    pub fn new(dir: PathBuf, expiry_hours: i64) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            expiry_hours,
            memory: Arc::new(DashMap::new()),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Bar>> {
        if let Some(bars) = self.memory.get(key) {
            return Some(bars.clone());
        }

        let path = self.dir.join(key.file_name());
        match read_fresh::<Vec<Bar>>(&path, self.expiry_hours) {
            Ok(Some(bars)) => {
                self.memory.insert(key.clone(), bars.clone());
                Some(bars)
            }
            Ok(None) => None,
            Err(error) => {
                warn!("Failed to read cache entry {}: {:?}", path.display(), error);
                None
            }
        }
    }

    pub fn put(&self, key: &CacheKey, bars: &[Bar]) {
        self.memory.insert(key.clone(), bars.to_vec());
        let path = self.dir.join(key.file_name());
        if let Err(error) = write_atomic(&path, &bars.to_vec()) {
            warn!(
                "Failed to persist cache entry {}: {:?}",
                path.display(),
                error
            );
        }
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut entries = 0usize;
        let mut total_bytes = 0u64;
        for item in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list cache directory {}", self.dir.display()))?
        {
            let item = item?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some(CACHE_EXTENSION) {
                entries += 1;
                total_bytes += item.metadata()?.len();
            }
        }
        Ok(CacheStats {
            entries,
            total_bytes,
        })
    }

    pub fn clear(&self) -> Result<usize> {
        self.memory.clear();
        let mut removed = 0usize;
        for item in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list cache directory {}", self.dir.display()))?
        {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(CACHE_EXTENSION) {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Read-through/write-through layer in front of a data source. Requests are
/// keyed on the interval-aligned window they cover, so repeated fetches
/// within the expiry window hit the cache.
pub struct CachedDataSource<S> {
    inner: S,
    cache: BarCache,
}

impl<S: MarketDataSource> CachedDataSource<S> {
    pub fn new(inner: S, cache: BarCache) -> Self {
        Self { inner, cache }
    }

    fn window_key(symbol: &str, interval: Interval, limit: usize) -> CacheKey {
        let step = interval.duration();
        let end = Utc::now()
            .duration_trunc(step)
            .unwrap_or_else(|_| Utc::now());
        CacheKey {
            symbol: symbol.to_string(),
            interval,
            start: end - step * limit as i32,
            end,
        }
    }
}

impl<S: MarketDataSource> MarketDataSource for CachedDataSource<S> {
    fn get_klines(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Bar>> {
        let key = Self::window_key(symbol, interval, limit);
        if let Some(bars) = self.cache.get(&key) {
            debug!("Cache hit for {} {} x{}", symbol, interval.as_str(), limit);
            return Ok(bars);
        }
        let bars = self.inner.get_klines(symbol, interval, limit)?;
        self.cache.put(&key, &bars);
        Ok(bars)
    }

    fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.inner.get_ticker(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticDataSource;
    use crate::models::ParameterSet;
    use chrono::TimeZone;

    fn key(symbol: &str) -> CacheKey {
        CacheKey {
            symbol: symbol.to_string(),
            interval: Interval::D1,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn sample_bars(symbol: &str) -> Vec<Bar> {
        SyntheticDataSource::generate(&[symbol.to_string()], Interval::D1, 20, 9)
            .get_klines(symbol, Interval::D1, 20)
            .unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path().to_path_buf(), 24).unwrap();
        let bars = sample_bars("AAA");
        cache.put(&key("AAA"), &bars);

        let restored = cache.get(&key("AAA")).unwrap();
        assert_eq!(restored.len(), bars.len());
        assert_eq!(restored[0].close, bars[0].close);

        // A second cache over the same directory sees the persisted entry.
        let reopened = BarCache::new(dir.path().to_path_buf(), 24).unwrap();
        assert!(reopened.get(&key("AAA")).is_some());
    }

    #[test]
    fn expired_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path().to_path_buf(), 0).unwrap();
        let bars = sample_bars("AAA");
        cache.put(&key("AAA"), &bars);

        // Zero-hour expiry: only the in-memory front can serve it, and a
        // fresh cache over the same directory must treat it as stale.
        let reopened = BarCache::new(dir.path().to_path_buf(), 0).unwrap();
        assert!(reopened.get(&key("AAA")).is_none());
    }

    #[test]
    fn stats_and_clear_cover_cache_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path().to_path_buf(), 24).unwrap();
        cache.put(&key("AAA"), &sample_bars("AAA"));
        cache.put(&key("BBB"), &sample_bars("BBB"));

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes > 0);

        let removed = cache.clear().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().unwrap().entries, 0);
        assert!(cache.get(&key("AAA")).is_none());
    }

    #[test]
    fn parameter_set_round_trips_within_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.bin");
        let mut params = ParameterSet::new();
        params.insert("shortPeriod".to_string(), 5.0);
        params.insert("signalThreshold".to_string(), 0.012_345_678_9);
        params.insert("positionMultiplier".to_string(), 1.5 + 1e-13);

        write_atomic(&path, &params).unwrap();
        let restored: ParameterSet = read_fresh(&path, 24).unwrap().unwrap();
        assert_eq!(restored.len(), params.len());
        for (name, value) in &params {
            assert!((restored[name] - value).abs() < 1e-9, "{}", name);
        }
    }

    #[test]
    fn cached_source_serves_repeat_requests_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path().to_path_buf(), 24).unwrap();
        let inner = SyntheticDataSource::generate(&["AAA".to_string()], Interval::D1, 50, 4);
        let source = CachedDataSource::new(inner, cache.clone());

        let first = source.get_klines("AAA", Interval::D1, 50).unwrap();
        assert_eq!(cache.stats().unwrap().entries, 1);
        let second = source.get_klines("AAA", Interval::D1, 50).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(cache.stats().unwrap().entries, 1);
    }
}

//! Durable store for the 1-minute base series
//!
//! The store keeps a bounded, timestamp-sorted window of 1-minute bars and
//! mirrors it to a CSV file after every successful merge. On startup it
//! merges the cold historical file with the live-session file; duplicate
//! timestamps resolve keep-last (the later write wins).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::bars::Bar;

pub struct BarStore {
    bars: Vec<Bar>,
    retention: usize,
    /// Live-session CSV, rewritten after each merge
    live_path: Option<PathBuf>,
}

impl BarStore {
    pub fn new(retention: usize) -> Self {
        Self {
            bars: Vec::new(),
            retention,
            live_path: None,
        }
    }

    /// Create a store backed by a live CSV file, seeding it from the
    /// historical file (if present) merged with any prior live session.
    pub fn open(historical: &Path, live: &Path, retention: usize) -> Result<Self> {
        let mut store = Self::new(retention);

        for path in [historical, live] {
            if path.exists() {
                let loaded = load_csv(path)
                    .with_context(|| format!("failed to read bar file {}", path.display()))?;
                debug!("Loaded {} bars from {}", loaded.len(), path.display());
                store.merge(&loaded);
            }
        }

        store.live_path = Some(live.to_path_buf());
        Ok(store)
    }

    /// Insert a single bar, keep-last on duplicate timestamps.
    /// Returns true if the series changed.
    pub fn append(&mut self, bar: Bar) -> bool {
        let changed = match self.bars.binary_search_by_key(&bar.timestamp, |b| b.timestamp) {
            Ok(i) => {
                if self.bars[i] == bar {
                    false
                } else {
                    self.bars[i] = bar;
                    true
                }
            }
            Err(i) => {
                self.bars.insert(i, bar);
                true
            }
        };

        if self.bars.len() > self.retention {
            let excess = self.bars.len() - self.retention;
            self.bars.drain(..excess);
        }

        changed
    }

    /// Bulk insert, returning how many bars were new or updated. The venue
    /// re-serves the recent window each poll, so most of the batch is
    /// usually already present.
    pub fn merge(&mut self, bars: &[Bar]) -> usize {
        bars.iter().filter(|b| self.append(**b)).count()
    }

    /// Rewrite the live CSV. Write failures are logged and swallowed; the
    /// in-memory series stays authoritative.
    pub fn persist(&self) {
        let Some(path) = &self.live_path else {
            return;
        };
        if let Err(e) = save_csv(path, &self.bars) {
            warn!("Failed to persist bars to {}: {}", path.display(), e);
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Last close of the base series
    pub fn current_price(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

fn load_csv(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bars = Vec::new();
    for record in reader.deserialize() {
        let bar: Bar = record?;
        bars.push(bar);
    }
    Ok(bars)
}

fn save_csv(path: &Path, bars: &[Bar]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(minute: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_append_keeps_sorted_order() {
        let mut store = BarStore::new(100);
        store.append(bar(5, 10.0));
        store.append(bar(1, 11.0));
        store.append(bar(3, 12.0));

        let minutes: Vec<u32> = store
            .bars()
            .iter()
            .map(|b| chrono::Timelike::minute(&b.timestamp))
            .collect();
        assert_eq!(minutes, vec![1, 3, 5]);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_last() {
        let mut store = BarStore::new(100);
        assert!(store.append(bar(1, 10.0)));
        assert!(store.append(bar(1, 20.0)));
        // Identical bar is not an update
        assert!(!store.append(bar(1, 20.0)));

        assert_eq!(store.len(), 1);
        assert_eq!(store.bars()[0].close, 20.0);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut store = BarStore::new(3);
        for m in 0..5 {
            store.append(bar(m, m as f64));
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.bars()[0].close, 2.0);
        assert_eq!(store.current_price(), Some(4.0));
    }

    #[test]
    fn test_merge_counts_only_changes() {
        let mut store = BarStore::new(100);
        store.merge(&[bar(1, 10.0), bar(2, 11.0)]);

        // Re-serving the same window plus one new bar and one revision
        let updated = store.merge(&[bar(1, 10.0), bar(2, 12.0), bar(3, 13.0)]);
        assert_eq!(updated, 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_open_merges_historical_and_live() {
        let dir = std::env::temp_dir().join(format!("barstore-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let historical = dir.join("historical.csv");
        let live = dir.join("live.csv");

        save_csv(&historical, &[bar(1, 10.0), bar(2, 11.0)]).unwrap();
        // Live file revises bar 2 and adds bar 3; live loads second so it wins
        save_csv(&live, &[bar(2, 99.0), bar(3, 12.0)]).unwrap();

        let store = BarStore::open(&historical, &live, 100).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.bars()[1].close, 99.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_open_with_missing_files_is_empty() {
        let dir = std::env::temp_dir().join(format!("barstore-{}", uuid::Uuid::new_v4()));
        let store =
            BarStore::open(&dir.join("none.csv"), &dir.join("also-none.csv"), 100).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = std::env::temp_dir().join(format!("barstore-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let live = dir.join("live.csv");

        let mut store = BarStore::open(&dir.join("none.csv"), &live, 100).unwrap();
        store.merge(&[bar(1, 10.0), bar(2, 11.0)]);
        store.persist();

        let reloaded = BarStore::open(&dir.join("none.csv"), &live, 100).unwrap();
        assert_eq!(reloaded.bars(), store.bars());

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! OHLCV bars and the supported timeframes

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Timestamp marks the start of the bar's window (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// High-to-low range in points
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Supported timeframes. M1 is the base series; the rest are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
}

impl Timeframe {
    /// Width of the window in minutes
    pub fn minutes(&self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
            Self::H4 => 240,
        }
    }

    /// Derived frames, most granular first
    pub const DERIVED: [Timeframe; 4] = [Self::M5, Self::M15, Self::H1, Self::H4];

    /// Floor a timestamp to the start of the window containing it
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.minutes() * 60;
        let secs = ts.timestamp();
        Utc.timestamp_opt(secs - secs.rem_euclid(width), 0)
            .single()
            .unwrap_or(ts)
    }

    /// Start of the final 1-minute slot inside the window beginning at `start`
    pub fn last_slot(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::minutes(self.minutes() - 1)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M1 => write!(f, "1m"),
            Self::M5 => write!(f, "5m"),
            Self::M15 => write!(f, "15m"),
            Self::H1 => write!(f, "1h"),
            Self::H4 => write!(f, "4h"),
        }
    }
}

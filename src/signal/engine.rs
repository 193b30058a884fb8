//! Multi-timeframe signal engine
//!
//! Fuses per-timeframe trend reads into a weighted alignment score, confirms
//! direction against a fresh price gap near the market, and anchors the stop
//! at the adverse liquidity extreme. One engine, parameterized by a versioned
//! `SignalConfig`; strategy variants are config files, not code forks.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::TimeframeSet;
use crate::bars::Timeframe;
use crate::signal::structure::{
    self, analyze_structure, buy_side_extreme, classify_trend, detect_gaps, find_liquidity,
    sell_side_extreme, Direction, TrendState,
};

/// Tunable strategy parameters. Defaults match the production v1 profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Config version tag, recorded on every signal log line
    pub version: String,

    /// Alignment weight per timeframe (higher frames dominate)
    pub weight_h4: f64,
    pub weight_h1: f64,
    pub weight_m15: f64,
    pub weight_m5: f64,

    /// Gap sensitivity per timeframe (stricter on higher frames)
    pub sensitivity_h4: f64,
    pub sensitivity_h1: f64,
    pub sensitivity_m15: f64,
    pub sensitivity_m5: f64,
    pub sensitivity_m1: f64,

    /// Minimum |alignment score| required to trade
    pub min_alignment: f64,

    /// Minimum bars required in every derived frame before evaluating
    pub min_bars: usize,

    /// Liquidity scan window and depth
    pub liquidity_lookback: usize,
    pub liquidity_depth: usize,

    /// Stop placement buffer beyond the liquidity extreme, in points
    pub stop_buffer: f64,

    /// Take-profit distance as a multiple of the risk distance
    pub target_r: f64,

    /// How far past a gap edge the market may sit and still confirm, in points
    pub gap_tolerance: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            weight_h4: 0.4,
            weight_h1: 0.3,
            weight_m15: 0.2,
            weight_m5: 0.1,
            sensitivity_h4: 0.5,
            sensitivity_h1: 0.6,
            sensitivity_m15: 0.7,
            sensitivity_m5: 0.7,
            sensitivity_m1: 0.8,
            min_alignment: 0.5,
            min_bars: 20,
            liquidity_lookback: 20,
            liquidity_depth: 3,
            stop_buffer: 5.0,
            target_r: 4.0,
            gap_tolerance: 10.0,
        }
    }
}

impl SignalConfig {
    /// Load a config version from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read signal config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("invalid signal config {}", path.display()))?;
        Ok(config)
    }

    pub fn weight(&self, tf: Timeframe) -> f64 {
        match tf {
            Timeframe::H4 => self.weight_h4,
            Timeframe::H1 => self.weight_h1,
            Timeframe::M15 => self.weight_m15,
            Timeframe::M5 => self.weight_m5,
            Timeframe::M1 => 0.0,
        }
    }

    pub fn sensitivity(&self, tf: Timeframe) -> f64 {
        match tf {
            Timeframe::H4 => self.sensitivity_h4,
            Timeframe::H1 => self.sensitivity_h1,
            Timeframe::M15 => self.sensitivity_m15,
            Timeframe::M5 => self.sensitivity_m5,
            Timeframe::M1 => self.sensitivity_m1,
        }
    }
}

/// A fully-specified trade proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// |entry - stop|, the 1R unit for the lifecycle ladder
    pub risk_distance: f64,
    /// Heuristic quality score in [0, 1]
    pub confidence: f64,
    /// Signed weighted trend agreement across timeframes
    pub alignment_score: f64,
    pub trends: Vec<(Timeframe, TrendState)>,
}

pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Evaluate the current frames. Returns None when there is no qualifying
    /// setup; insufficient history is not an error.
    pub fn evaluate(&self, frames: &TimeframeSet, current_price: f64) -> Option<TradeSignal> {
        for tf in Timeframe::DERIVED {
            if frames.get(tf).len() < self.config.min_bars {
                debug!(
                    "Signal skipped: {} has {} of {} required bars",
                    tf,
                    frames.get(tf).len(),
                    self.config.min_bars
                );
                return None;
            }
        }

        let trends: Vec<(Timeframe, TrendState)> = Timeframe::DERIVED
            .iter()
            .map(|&tf| (tf, classify_trend(frames.get(tf))))
            .collect();

        let alignment_score: f64 = trends
            .iter()
            .map(|(tf, trend)| self.config.weight(*tf) * trend.sign())
            .sum();

        let direction = if alignment_score >= self.config.min_alignment {
            Direction::Long
        } else if alignment_score <= -self.config.min_alignment {
            Direction::Short
        } else {
            return None;
        };

        // Gap confirmation: any frame may supply a fresh gap in the trade
        // direction near the market, judged by that frame's own sensitivity
        let mut aligned_gaps = 0usize;
        for tf in [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4] {
            aligned_gaps += detect_gaps(frames.get(tf), self.config.sensitivity(tf))
                .iter()
                .rev()
                .take(5)
                .filter(|gap| gap.direction == direction && self.gap_is_near(gap, current_price))
                .count();
        }
        if aligned_gaps == 0 {
            return None;
        }

        // Liquidity on the most granular derived frame anchors the trade
        let confirm = frames.get(Timeframe::M5);
        let levels = find_liquidity(
            confirm,
            self.config.liquidity_lookback,
            self.config.liquidity_depth,
        );
        let sell_liq = sell_side_extreme(&levels)?;
        let buy_liq = buy_side_extreme(&levels)?;

        // Resting liquidity must sit on the target side of the market
        match direction {
            Direction::Long if sell_liq <= current_price => return None,
            Direction::Short if buy_liq >= current_price => return None,
            _ => {}
        }

        // Stop beyond the adverse liquidity extreme
        let stop_loss = match direction {
            Direction::Long => buy_liq - self.config.stop_buffer,
            Direction::Short => sell_liq + self.config.stop_buffer,
        };

        let risk_distance = match direction {
            Direction::Long => current_price - stop_loss,
            Direction::Short => stop_loss - current_price,
        };
        if risk_distance <= 0.0 {
            return None;
        }

        let take_profit =
            current_price + direction.sign() * risk_distance * self.config.target_r;

        let ms = analyze_structure(confirm);
        let mut confidence: f64 = 0.5;
        if ms.bos {
            confidence += 0.2;
        }
        if ms.choch {
            confidence += 0.1;
        }
        confidence += (aligned_gaps as f64 * 0.05).min(0.2);
        confidence = confidence.min(1.0);

        debug!(
            "Signal {} ({}): align={:.2} conf={:.2} entry={:.2} stop={:.2} tp={:.2}",
            direction,
            self.config.version,
            alignment_score,
            confidence,
            current_price,
            stop_loss,
            take_profit
        );

        Some(TradeSignal {
            direction,
            entry_price: current_price,
            stop_loss,
            take_profit,
            risk_distance,
            confidence,
            alignment_score,
            trends,
        })
    }

    fn gap_is_near(&self, gap: &structure::Gap, price: f64) -> bool {
        match gap.direction {
            Direction::Long => {
                gap.low <= price && price <= gap.high + self.config.gap_tolerance
            }
            Direction::Short => {
                gap.high >= price && price >= gap.low - self.config.gap_tolerance
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Bar;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, high: f64, low: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap() + Duration::minutes(i),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1.0,
        }
    }

    /// Steadily rising frame: higher highs and higher lows throughout
    fn rising_frame(n: usize) -> Vec<Bar> {
        (0..n).map(|i| bar(i as i64, 100.0 + i as f64, 98.0 + i as f64)).collect()
    }

    /// Rising frame that ends with a bullish three-bar gap into the close
    fn rising_frame_with_gap(n: usize) -> Vec<Bar> {
        let mut bars = rising_frame(n - 1);
        let last = *bars.last().unwrap();
        // Jump well clear of the two-bars-back high
        bars.push(Bar {
            timestamp: last.timestamp + Duration::minutes(1),
            open: last.high + 20.0,
            high: last.high + 22.0,
            low: last.high + 18.0,
            close: last.high + 21.0,
            volume: 1.0,
        });
        bars
    }

    fn frames(m5: Vec<Bar>, others: Vec<Bar>) -> TimeframeSet {
        let mut set = TimeframeSet::default();
        set.insert(Timeframe::M5, m5);
        for tf in [Timeframe::M15, Timeframe::H1, Timeframe::H4] {
            set.insert(tf, others.clone());
        }
        set
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let engine = SignalEngine::new(SignalConfig::default());
        let set = frames(rising_frame(19), rising_frame(25));
        assert!(engine.evaluate(&set, 120.0).is_none());
    }

    #[test]
    fn test_aligned_bullish_frames_produce_long_signal() {
        let engine = SignalEngine::new(SignalConfig::default());
        let m5 = rising_frame_with_gap(25);
        let price = m5.last().unwrap().close;
        let set = frames(m5, rising_frame(25));

        let signal = engine.evaluate(&set, price).expect("expected a long signal");
        assert_eq!(signal.direction, Direction::Long);
        // All four frames bullish: 0.4 + 0.3 + 0.2 + 0.1
        assert!((signal.alignment_score - 1.0).abs() < 1e-9);
        assert!(signal.stop_loss < price);
        assert!(signal.risk_distance > 0.0);
        // 4R target
        let expected_tp = price + signal.risk_distance * 4.0;
        assert!((signal.take_profit - expected_tp).abs() < 1e-9);
        assert!(signal.confidence <= 1.0 && signal.confidence >= 0.5);
    }

    #[test]
    fn test_mixed_frames_below_threshold_returns_none() {
        let engine = SignalEngine::new(SignalConfig::default());
        // Only M5 bullish: score 0.1, under the 0.5 threshold
        let m5 = rising_frame_with_gap(25);
        let price = m5.last().unwrap().close;
        let flat: Vec<Bar> = (0..25).map(|i| bar(i, 100.0, 98.0)).collect();
        let set = frames(m5, flat);

        assert!(engine.evaluate(&set, price).is_none());
    }

    #[test]
    fn test_no_gap_confirmation_returns_none() {
        let engine = SignalEngine::new(SignalConfig::default());
        // Fully aligned but no gap on the confirmation frame
        let m5 = rising_frame(25);
        let price = m5.last().unwrap().close;
        let set = frames(m5, rising_frame(25));

        assert!(engine.evaluate(&set, price).is_none());
    }

    #[test]
    fn test_gap_on_higher_frame_confirms() {
        let engine = SignalEngine::new(SignalConfig::default());
        // No gap on M5; the 1-hour frame carries the confirming gap
        let m5 = rising_frame(60);
        let h1 = rising_frame_with_gap(25);
        let mut set = TimeframeSet::default();
        set.insert(Timeframe::M5, m5);
        set.insert(Timeframe::M15, rising_frame(25));
        set.insert(Timeframe::H1, h1);
        set.insert(Timeframe::H4, rising_frame(25));

        // Inside the 1-hour gap, below the M5 sell-side extreme
        let signal = engine.evaluate(&set, 135.0).expect("expected a long signal");
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_long_without_overhead_liquidity_returns_none() {
        let engine = SignalEngine::new(SignalConfig::default());
        let m5 = rising_frame_with_gap(25);
        // Above every resting high: nothing left to run into
        let price = m5.iter().map(|b| b.high).fold(f64::MIN, f64::max) + 1.0;
        let set = frames(m5, rising_frame(25));

        assert!(engine.evaluate(&set, price).is_none());
    }

    #[test]
    fn test_config_round_trip_from_file() {
        let mut config = SignalConfig::default();
        config.version = "v2".to_string();
        config.min_alignment = 0.6;

        let path = std::env::temp_dir().join(format!("sigcfg-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = SignalConfig::from_file(&path).unwrap();
        assert_eq!(loaded.version, "v2");
        assert_eq!(loaded.min_alignment, 0.6);

        std::fs::remove_file(&path).ok();
    }
}

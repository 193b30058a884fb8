//! Market structure primitives
//!
//! Pure analysis over bar slices: trend classification, structure breaks
//! (BOS/CHoCH), three-bar price gaps, and resting liquidity extremes. All
//! functions recompute from the slice they are given; nothing here holds
//! state between evaluations.

use serde::{Deserialize, Serialize};

use crate::bars::Bar;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Per-timeframe trend classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendState {
    Bullish,
    Bearish,
    Ranging,
    /// Not enough bars to classify
    Unknown,
}

impl TrendState {
    /// Signed contribution to the alignment score
    pub fn sign(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
            Self::Ranging | Self::Unknown => 0.0,
        }
    }
}

/// Structure analysis of one timeframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketStructure {
    pub trend: TrendState,
    /// Break of structure: new extreme in trend direction beyond the prior 4 bars
    pub bos: bool,
    /// Change of character: the latest bar violates the prior bar against trend
    pub choch: bool,
}

/// Classify trend from the last two bars' high/low progression
pub fn classify_trend(bars: &[Bar]) -> TrendState {
    let len = bars.len();
    if len < 2 {
        return TrendState::Unknown;
    }
    let (prev, last) = (&bars[len - 2], &bars[len - 1]);

    if last.high > prev.high && last.low > prev.low {
        TrendState::Bullish
    } else if last.high < prev.high && last.low < prev.low {
        TrendState::Bearish
    } else {
        TrendState::Ranging
    }
}

/// Full structure read: trend plus BOS/CHoCH flags
pub fn analyze_structure(bars: &[Bar]) -> MarketStructure {
    let trend = classify_trend(bars);
    let len = bars.len();

    if len < 5 || matches!(trend, TrendState::Unknown | TrendState::Ranging) {
        return MarketStructure { trend, bos: false, choch: false };
    }

    let last = &bars[len - 1];
    let prev = &bars[len - 2];
    let window = &bars[len - 5..len - 1];

    let bos = match trend {
        TrendState::Bullish => {
            last.high > window.iter().map(|b| b.high).fold(f64::MIN, f64::max)
        }
        TrendState::Bearish => {
            last.low < window.iter().map(|b| b.low).fold(f64::MAX, f64::min)
        }
        _ => false,
    };

    let choch = match trend {
        TrendState::Bullish => last.low < prev.low,
        TrendState::Bearish => last.high > prev.high,
        _ => false,
    };

    MarketStructure { trend, bos, choch }
}

/// A three-bar price gap: the middle bar jumped clear of the first bar's
/// range, leaving untraded prices between `low` and `high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub direction: Direction,
    /// Lower edge of the untraded region
    pub low: f64,
    /// Upper edge of the untraded region
    pub high: f64,
    /// Gap size in points
    pub size: f64,
}

/// Detect three-bar gaps whose size exceeds the local three-bar average
/// range scaled by `sensitivity`.
pub fn detect_gaps(bars: &[Bar], sensitivity: f64) -> Vec<Gap> {
    let mut gaps = Vec::new();

    for window in bars.windows(3) {
        let (first, middle, last) = (&window[0], &window[1], &window[2]);
        let avg_range = (first.range() + middle.range() + last.range()) / 3.0;

        if last.low > first.high {
            let size = last.low - first.high;
            if size > avg_range * sensitivity {
                gaps.push(Gap {
                    direction: Direction::Long,
                    low: first.high,
                    high: last.low,
                    size,
                });
            }
        } else if last.high < first.low {
            let size = first.low - last.high;
            if size > avg_range * sensitivity {
                gaps.push(Gap {
                    direction: Direction::Short,
                    low: last.high,
                    high: first.low,
                    size,
                });
            }
        }
    }

    gaps
}

/// Which side of the book a resting level sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquiditySide {
    /// Stops below price (swing lows)
    BuySide,
    /// Stops above price (swing highs)
    SellSide,
}

/// A resting liquidity level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityLevel {
    pub side: LiquiditySide,
    pub price: f64,
}

/// The `depth` most extreme highs and lows over the trailing `lookback` bars
pub fn find_liquidity(bars: &[Bar], lookback: usize, depth: usize) -> Vec<LiquidityLevel> {
    let tail = &bars[bars.len().saturating_sub(lookback)..];
    if tail.is_empty() {
        return Vec::new();
    }

    let mut highs: Vec<f64> = tail.iter().map(|b| b.high).collect();
    let mut lows: Vec<f64> = tail.iter().map(|b| b.low).collect();
    highs.sort_by(|a, b| b.total_cmp(a));
    lows.sort_by(f64::total_cmp);

    let mut levels = Vec::new();
    for price in highs.into_iter().take(depth) {
        levels.push(LiquidityLevel { side: LiquiditySide::SellSide, price });
    }
    for price in lows.into_iter().take(depth) {
        levels.push(LiquidityLevel { side: LiquiditySide::BuySide, price });
    }
    levels
}

/// Most extreme sell-side level (highest high), if any
pub fn sell_side_extreme(levels: &[LiquidityLevel]) -> Option<f64> {
    levels
        .iter()
        .filter(|l| l.side == LiquiditySide::SellSide)
        .map(|l| l.price)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
}

/// Most extreme buy-side level (lowest low), if any
pub fn buy_side_extreme(levels: &[LiquidityLevel]) -> Option<f64> {
    levels
        .iter()
        .filter(|l| l.side == LiquiditySide::BuySide)
        .map(|l| l.price)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
}

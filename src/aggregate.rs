//! Derived-timeframe aggregation
//!
//! Pure reduction of the 1-minute base series into the higher frames. Each
//! derived bar covers a wall-clock window aligned to the frame width:
//! open = first base open, high = max, low = min, close = last base close,
//! volume = sum. The unfinished tail window is withheld until its final
//! 1-minute slot arrives; completed windows with interior gaps aggregate
//! from whatever bars they contain.

use std::collections::HashMap;

use crate::bars::{Bar, Timeframe};

/// All derived series for one recompute
#[derive(Debug, Default)]
pub struct TimeframeSet {
    frames: HashMap<Timeframe, Vec<Bar>>,
}

impl TimeframeSet {
    pub fn get(&self, tf: Timeframe) -> &[Bar] {
        self.frames.get(&tf).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn insert(&mut self, tf: Timeframe, bars: Vec<Bar>) {
        self.frames.insert(tf, bars);
    }
}

/// Aggregate the base series into one derived frame
pub fn aggregate(base: &[Bar], tf: Timeframe) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::new();

    for bar in base {
        let start = tf.window_start(bar.timestamp);
        match out.last_mut() {
            Some(current) if current.timestamp == start => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
            }
            _ => out.push(Bar {
                timestamp: start,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            }),
        }
    }

    // Drop the tail window unless its final base slot is filled
    if let (Some(tail), Some(last_base)) = (out.last(), base.last()) {
        if last_base.timestamp < tf.last_slot(tail.timestamp) {
            out.pop();
        }
    }

    out
}

/// Recompute every derived frame from scratch. The base series rides along
/// as the M1 frame so downstream analysis sees all five.
pub fn recompute(base: &[Bar]) -> TimeframeSet {
    let mut frames = HashMap::new();
    frames.insert(Timeframe::M1, base.to_vec());
    for tf in Timeframe::DERIVED {
        frames.insert(tf, aggregate(base, tf));
    }
    TimeframeSet { frames }
}

//! Position lifecycle state machine
//!
//! One position at a time, managed by a stepped R-multiple ladder:
//!
//! | unrealized R | action                                  |
//! |--------------|-----------------------------------------|
//! | 1.5R         | close half, stop to entry + 0.5R        |
//! | 2R           | stop to entry + 1R                      |
//! | 3R           | stop to entry + 2R                      |
//! | 4R           | close the remainder                     |
//!
//! Ladder levels fire once and only ratchet upward. The manager is pure
//! with respect to I/O: it emits `PositionAction`s for the coordinator to
//! execute, and the same price sequence always replays to the same actions.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::signal::{Direction, TradeSignal};

/// Ladder rungs: (trigger R, stop destination in R from entry)
const TRAIL_LADDER: [(f64, f64); 3] = [(1.5, 0.5), (2.0, 1.0), (3.0, 2.0)];

/// Terminal rung
const TARGET_R: f64 = 4.0;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TargetReached,
    SessionEnd,
    Shutdown,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop loss"),
            Self::TargetReached => write!(f, "4R target"),
            Self::SessionEnd => write!(f, "session end"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// What the coordinator should do after a lifecycle evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionAction {
    Hold,
    /// Close `size` contracts at market and move the stop
    PartialClose { size: i32, price: f64, new_stop: f64, r_multiple: f64 },
    /// Move the protective stop
    TrailStop { new_stop: f64, r_multiple: f64 },
    /// Close all remaining contracts
    Close { size: i32, price: f64, pnl: f64, reason: ExitReason, r_multiple: f64 },
}

/// An open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// 1R in points
    pub risk_distance: f64,
    /// Remaining contracts
    pub size: i32,
    /// Contracts closed at the partial rung
    pub partial_size: i32,
    /// Highest ladder rung reached so far
    pub trail_level: f64,
    pub partial_filled: bool,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Unrealized R multiple at the given price
    pub fn unrealized_r(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign() / self.risk_distance
    }

    fn stop_at_r(&self, r: f64) -> f64 {
        self.entry_price + self.direction.sign() * self.risk_distance * r
    }

    fn stop_hit(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }
}

/// Owns the single open position plus the local equity and daily P&L books
pub struct PositionManager {
    position: Option<Position>,
    /// Dollars per point per contract (MNQ = 2.0)
    multiplier: f64,
    equity: f64,
    daily_pnl: f64,
    current_date: Option<NaiveDate>,
    trade_count: u32,
    wins: u32,
    losses: u32,
}

impl PositionManager {
    pub fn new(starting_equity: f64, multiplier: f64) -> Self {
        Self {
            position: None,
            multiplier,
            equity: starting_equity,
            daily_pnl: 0.0,
            current_date: None,
            trade_count: 0,
            wins: 0,
            losses: 0,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.position.is_some()
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    /// Reset the daily book on the first tick of a new calendar day
    pub fn roll_date(&mut self, today: NaiveDate) -> bool {
        if self.current_date == Some(today) {
            return false;
        }
        self.current_date = Some(today);
        self.daily_pnl = 0.0;
        true
    }

    /// Open a position from a sized signal
    pub fn open(&mut self, signal: &TradeSignal, size: i32, now: DateTime<Utc>) -> Result<()> {
        if self.position.is_some() {
            bail!("position already open");
        }
        if size <= 0 {
            bail!("cannot open position with size {}", size);
        }

        self.position = Some(Position {
            direction: signal.direction,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            risk_distance: signal.risk_distance,
            size,
            partial_size: 0,
            trail_level: 0.0,
            partial_filled: false,
            opened_at: now,
        });
        Ok(())
    }

    /// Evaluate the lifecycle at the current price. At most one ladder rung
    /// fires per call; a skipped-over rung fires on the next call.
    pub fn evaluate(&mut self, price: f64) -> PositionAction {
        let Some(pos) = self.position.as_mut() else {
            return PositionAction::Hold;
        };

        let r = pos.unrealized_r(price);

        // Lowest unvisited rung wins; a price that jumps several rungs walks
        // them one per tick
        for (level, stop_r) in TRAIL_LADDER {
            if r >= level && pos.trail_level < level {
                pos.trail_level = level;
                pos.stop_loss = pos.stop_at_r(stop_r);

                if level == TRAIL_LADDER[0].0 && !pos.partial_filled && pos.size >= 2 {
                    pos.partial_filled = true;
                    pos.partial_size = pos.size / 2;
                    pos.size -= pos.partial_size;

                    let pnl = (price - pos.entry_price)
                        * pos.direction.sign()
                        * pos.partial_size as f64
                        * self.multiplier;
                    self.equity += pnl;
                    self.daily_pnl += pnl;

                    info!(
                        "Partial close {} @ {:.2} ({:+.2} USD), stop to {:.2}",
                        pos.partial_size, price, pnl, pos.stop_loss
                    );
                    return PositionAction::PartialClose {
                        size: pos.partial_size,
                        price,
                        new_stop: pos.stop_loss,
                        r_multiple: r,
                    };
                }

                info!("Trail stop to {:.2} at {:.1}R", pos.stop_loss, r);
                return PositionAction::TrailStop { new_stop: pos.stop_loss, r_multiple: r };
            }
        }

        // Terminal rung
        if r >= TARGET_R && pos.trail_level < TARGET_R {
            return self.close_at(price, ExitReason::TargetReached);
        }

        if pos.stop_hit(price) {
            let stop = pos.stop_loss;
            return self.close_at(stop, ExitReason::StopLoss);
        }

        PositionAction::Hold
    }

    /// Drop the position without booking P&L or stats; used when the entry
    /// was rejected and never existed at the venue
    pub fn abandon(&mut self) {
        if let Some(pos) = self.position.take() {
            info!("Abandoned {} {} @ {:.2} (entry never filled)", pos.direction, pos.size, pos.entry_price);
        }
    }

    /// Close the remainder at the given price regardless of ladder state
    pub fn force_close(&mut self, price: f64, reason: ExitReason) -> PositionAction {
        if self.position.is_none() {
            return PositionAction::Hold;
        }
        self.close_at(price, reason)
    }

    fn close_at(&mut self, price: f64, reason: ExitReason) -> PositionAction {
        // Guarded by callers
        let Some(pos) = self.position.take() else {
            return PositionAction::Hold;
        };

        let r = pos.unrealized_r(price);
        let pnl =
            (price - pos.entry_price) * pos.direction.sign() * pos.size as f64 * self.multiplier;

        self.equity += pnl;
        self.daily_pnl += pnl;
        self.trade_count += 1;
        if pnl >= 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }

        info!(
            "Closed {} {} @ {:.2}: {:+.2} USD ({:.1}R, {})",
            pos.direction, pos.size, price, pnl, r, reason
        );

        PositionAction::Close { size: pos.size, price, pnl, reason, r_multiple: r }
    }

    pub fn stats_summary(&self) -> String {
        format!(
            "equity={:.2} daily_pnl={:+.2} trades={} W/L={}/{}",
            self.equity, self.daily_pnl, self.trade_count, self.wins, self.losses
        )
    }
}

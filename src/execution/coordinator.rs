//! Order coordinator
//!
//! Owns the venue connection and the live bracket. Translates signals and
//! lifecycle actions into venue operations, drains venue events back into
//! order state, and runs the conservative reconcile after a reconnect:
//! cancel everything that was in flight, then re-arm the protective stop
//! before evaluation resumes.
//!
//! Stop and take-profit exits are venue-resident: when a protective leg
//! fills, the position is already flat at the venue, so the coordinator
//! surfaces the fill as a `VenueExit` for the lifecycle books instead of
//! sending another market order against it.

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::execution::order::{BracketOrder, OrderKind, OrderSide, OrderState};
use crate::execution::venue::{VenueConnection, VenueEvent};
use crate::position::{ExitReason, Position, PositionAction};
use crate::signal::TradeSignal;

/// A position exit performed by a resting venue-side order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VenueExit {
    pub kind: OrderKind,
    pub price: f64,
    pub quantity: i32,
}

pub struct OrderCoordinator {
    venue: VenueConnection,
    bracket: Option<BracketOrder>,
    /// Venue ids of standalone exit orders still awaiting their fill event
    exit_orders: Vec<i32>,
    /// Venue ids whose state became unknown (disconnect mid-flight or a
    /// fill we could not attribute); cancelled at the next reconcile
    unknown_orders: Vec<i32>,
    needs_reconcile: bool,
    /// Protective-leg fill that closed the position venue-side before the
    /// lifecycle saw it; consumed by the tick loop
    venue_exit: Option<VenueExit>,
    /// Set when the lifecycle closed on a stop or target cross and the
    /// matching venue-side leg fill has not arrived yet
    pending_exit: Option<OrderKind>,
    entry_rejected: bool,
}

impl OrderCoordinator {
    pub fn new(venue: VenueConnection) -> Self {
        Self {
            venue,
            bracket: None,
            exit_orders: Vec::new(),
            unknown_orders: Vec::new(),
            needs_reconcile: false,
            venue_exit: None,
            pending_exit: None,
            entry_rejected: false,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.venue.connect().await
    }

    /// Shutdown: cancel every working order, then drop the connection
    pub fn shutdown(&mut self) {
        self.cancel_outstanding();
        self.venue.disconnect();
    }

    pub fn venue(&self) -> &VenueConnection {
        &self.venue
    }

    pub fn bracket(&self) -> Option<&BracketOrder> {
        self.bracket.as_ref()
    }

    pub fn needs_reconcile(&self) -> bool {
        self.needs_reconcile
    }

    /// Consume a venue-side exit (protective leg filled before the
    /// lifecycle closed locally)
    pub fn take_venue_exit(&mut self) -> Option<VenueExit> {
        self.venue_exit.take()
    }

    /// Consume an entry rejection; the local position never existed at the
    /// venue and must be dropped without booking P&L
    pub fn take_entry_rejection(&mut self) -> bool {
        std::mem::take(&mut self.entry_rejected)
    }

    /// Fetch the recent 1-minute window from the venue
    pub fn fetch_bars(&self) -> Result<Vec<crate::bars::Bar>> {
        self.venue.fetch_historical_bars()
    }

    /// Submit the bracket for a sized signal. Any submission failure leaves
    /// no working orders behind and the coordinator stays idle.
    pub fn open_position(&mut self, signal: &TradeSignal, size: i32) -> Result<()> {
        if self.bracket.is_some() {
            bail!("bracket already working");
        }

        let mut bracket = BracketOrder::from_signal(signal, size);
        let side: OrderSide = signal.direction.into();

        let (entry_id, stop_id, profit_id) = self.venue.place_bracket(
            side,
            size,
            signal.stop_loss,
            signal.take_profit,
            signal.entry_price,
        )?;

        bracket.entry.venue_id = Some(entry_id);
        bracket.stop_loss.venue_id = Some(stop_id);
        bracket.take_profit.venue_id = Some(profit_id);
        for leg in bracket.legs_mut() {
            leg.update_state(OrderState::Submitted);
        }

        info!(
            "Bracket working: entry={} stop={} profit={}",
            entry_id, stop_id, profit_id
        );
        self.bracket = Some(bracket);
        Ok(())
    }

    /// Execute a lifecycle action against the venue
    pub fn execute(&mut self, action: &PositionAction, position: Option<&Position>) -> Result<()> {
        match *action {
            PositionAction::Hold => Ok(()),

            PositionAction::PartialClose { size, price, new_stop, .. } => {
                let pos = position.ok_or_else(|| anyhow::anyhow!("partial close without position"))?;
                let side = OrderSide::from(pos.direction).opposite();

                let venue_id = self.venue.place_market_order(side, size, price)?;
                self.exit_orders.push(venue_id);
                self.move_stop(pos, new_stop)?;
                Ok(())
            }

            PositionAction::TrailStop { new_stop, .. } => {
                let pos = position.ok_or_else(|| anyhow::anyhow!("trail stop without position"))?;
                self.move_stop(pos, new_stop)
            }

            PositionAction::Close { size, price, reason, .. } => {
                // Stop and target exits are performed by the resting legs at
                // the venue; market-closing on top of them would reverse the
                // account. Wait for the leg's fill instead.
                if !self.venue.is_simulated()
                    && matches!(reason, ExitReason::StopLoss | ExitReason::TargetReached)
                {
                    self.pending_exit = Some(match reason {
                        ExitReason::TargetReached => OrderKind::TakeProfit,
                        _ => OrderKind::Stop,
                    });
                    info!("Position closed ({}); awaiting venue-side fill", reason);
                    return Ok(());
                }

                if size > 0 {
                    // Direction is gone with the position; the bracket entry
                    // still knows which way we were facing
                    let side = self
                        .bracket
                        .as_ref()
                        .map(|b| b.entry.side.opposite())
                        .ok_or_else(|| anyhow::anyhow!("close without a working bracket"))?;
                    let venue_id = self.venue.place_market_order(side, size, price)?;
                    self.exit_orders.push(venue_id);
                }
                info!("Position closed ({}); cancelling protective legs", reason);
                self.cancel_outstanding();
                Ok(())
            }
        }
    }

    fn move_stop(&mut self, position: &Position, new_stop: f64) -> Result<()> {
        let Some(bracket) = self.bracket.as_mut() else {
            bail!("no working bracket to adjust");
        };
        let Some(stop_id) = bracket.stop_loss.venue_id else {
            bail!("stop leg has no venue id");
        };

        let side = OrderSide::from(position.direction).opposite();
        self.venue.replace_stop(
            stop_id,
            bracket.entry.venue_id,
            side,
            position.size,
            new_stop,
        )?;

        bracket.stop_loss.price = Some(new_stop);
        bracket.stop_loss.quantity = position.size;
        Ok(())
    }

    /// Cancel all non-terminal bracket legs and clear the bracket
    pub fn cancel_outstanding(&mut self) {
        let Some(mut bracket) = self.bracket.take() else {
            return;
        };

        for leg in bracket.legs_mut() {
            if leg.is_terminal() {
                continue;
            }
            if let Some(venue_id) = leg.venue_id {
                if let Err(e) = self.venue.cancel_order(venue_id) {
                    warn!("Failed to cancel order {}: {}", venue_id, e);
                }
            }
            leg.update_state(OrderState::Cancelled);
        }
    }

    /// Drain the venue event queue. Single caller per tick keeps order state
    /// single-writer.
    pub fn drain_events(&mut self) {
        while let Some(event) = self.venue.try_next_event() {
            match event {
                VenueEvent::Connected => {
                    info!("Venue connected");
                    self.venue.reset_reconnect_counter();
                }
                VenueEvent::Disconnected { reason } => {
                    warn!("Venue disconnected: {}", reason);
                    // Everything in flight is now unknown
                    if let Some(bracket) = &self.bracket {
                        self.unknown_orders
                            .extend(bracket.open_legs().filter_map(|o| o.venue_id));
                    }
                    self.unknown_orders.append(&mut self.exit_orders);
                    self.needs_reconcile = true;
                }
                VenueEvent::OrderFilled { venue_id, fill_price, fill_quantity } => {
                    if let Some(i) = self.exit_orders.iter().position(|id| *id == venue_id) {
                        self.exit_orders.swap_remove(i);
                        info!("Exit fill: order {} {} @ {:.2}", venue_id, fill_quantity, fill_price);
                        continue;
                    }
                    let filled_leg = self
                        .bracket
                        .as_mut()
                        .and_then(|b| b.leg_by_venue_id(venue_id))
                        .map(|leg| {
                            leg.record_fill(fill_quantity, fill_price);
                            info!(
                                "Fill: order {} {} @ {:.2} ({})",
                                venue_id, fill_quantity, fill_price, leg.state
                            );
                            (leg.kind, leg.state, leg.avg_fill_price.unwrap_or(fill_price))
                        });
                    match filled_leg {
                        Some((kind, OrderState::Filled, avg_price))
                            if matches!(kind, OrderKind::Stop | OrderKind::TakeProfit) =>
                        {
                            // The position is flat at the venue
                            if self.pending_exit.take().is_none() {
                                self.venue_exit = Some(VenueExit {
                                    kind,
                                    price: avg_price,
                                    quantity: fill_quantity,
                                });
                            }
                            self.cancel_outstanding();
                        }
                        Some(_) => {}
                        None => {
                            error!(
                                "Fill for unknown order {} ({} @ {:.2}); scheduling reconcile",
                                venue_id, fill_quantity, fill_price
                            );
                            self.unknown_orders.push(venue_id);
                            self.needs_reconcile = true;
                        }
                    }
                }
                VenueEvent::OrderCancelled { venue_id } => {
                    if let Some(leg) =
                        self.bracket.as_mut().and_then(|b| b.leg_by_venue_id(venue_id))
                    {
                        leg.update_state(OrderState::Cancelled);
                    }
                }
                VenueEvent::OrderRejected { venue_id, reason } => {
                    warn!("Order {} rejected: {}", venue_id, reason);
                    let kind = self
                        .bracket
                        .as_mut()
                        .and_then(|b| b.leg_by_venue_id(venue_id))
                        .map(|leg| {
                            leg.update_state(OrderState::Rejected);
                            leg.kind
                        });
                    match kind {
                        Some(OrderKind::Entry) => {
                            // Nothing working at the venue; pull the children
                            self.entry_rejected = true;
                            self.cancel_outstanding();
                        }
                        Some(OrderKind::Stop) => {
                            // Position is unprotected; reconcile re-arms it
                            self.needs_reconcile = true;
                        }
                        _ => {}
                    }
                }
                VenueEvent::Error { message } => {
                    error!("Venue error: {}", message);
                }
            }
        }
    }

    /// Reconnect and restore a safe order state: cancel everything whose
    /// state is unknown, then re-arm the protective stop for any open
    /// position. Evaluation must not resume until this succeeds.
    pub async fn reconnect_and_reconcile(&mut self, position: Option<&Position>) -> Result<()> {
        self.venue.reconnect().await?;

        let unknown = std::mem::take(&mut self.unknown_orders);
        for venue_id in unknown {
            if let Err(e) = self.venue.cancel_order(venue_id) {
                warn!("Reconcile: failed to cancel order {}: {}", venue_id, e);
            }
        }

        if let Some(pos) = position {
            let side = OrderSide::from(pos.direction).opposite();
            let stop_id = self.venue.place_stop(side, pos.size, pos.stop_loss)?;
            if let Some(bracket) = self.bracket.as_mut() {
                bracket.stop_loss.venue_id = Some(stop_id);
                bracket.stop_loss.quantity = pos.size;
                bracket.stop_loss.price = Some(pos.stop_loss);
                bracket.stop_loss.update_state(OrderState::Submitted);
            }
            info!("Reconcile: protective stop re-armed @ {:.2}", pos.stop_loss);
        } else {
            // Flat locally and everything unknown was cancelled; drop any
            // leftover bracket so new entries are not blocked
            self.bracket = None;
            self.pending_exit = None;
        }

        self.needs_reconcile = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Timeframe;
    use crate::config::{AgentConfig, ExecutionMode};
    use crate::position::{ExitReason, PositionManager};
    use crate::signal::{Direction, TrendState};
    use chrono::Utc;

    fn long_signal() -> TradeSignal {
        TradeSignal {
            direction: Direction::Long,
            entry_price: 18_000.0,
            stop_loss: 17_980.0,
            take_profit: 18_080.0,
            risk_distance: 20.0,
            confidence: 0.7,
            alignment_score: 1.0,
            trends: vec![(Timeframe::H4, TrendState::Bullish)],
        }
    }

    async fn sim_coordinator() -> OrderCoordinator {
        let venue = VenueConnection::new(AgentConfig {
            mode: ExecutionMode::Simulation,
            ..Default::default()
        });
        let mut coordinator = OrderCoordinator::new(venue);
        coordinator.connect().await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_open_position_fills_entry_through_events() {
        let mut coordinator = sim_coordinator().await;

        coordinator.open_position(&long_signal(), 2).unwrap();
        coordinator.drain_events();

        let bracket = coordinator.bracket().unwrap();
        assert_eq!(bracket.entry.state, OrderState::Filled);
        assert_eq!(bracket.entry.avg_fill_price, Some(18_000.0));
        assert_eq!(bracket.stop_loss.state, OrderState::Submitted);
    }

    #[tokio::test]
    async fn test_second_open_rejected_while_bracket_working() {
        let mut coordinator = sim_coordinator().await;

        coordinator.open_position(&long_signal(), 2).unwrap();
        assert!(coordinator.open_position(&long_signal(), 1).is_err());
    }

    #[tokio::test]
    async fn test_partial_close_moves_stop() {
        let mut coordinator = sim_coordinator().await;
        coordinator.open_position(&long_signal(), 4).unwrap();
        coordinator.drain_events();

        let mut mgr = PositionManager::new(100_000.0, 2.0);
        mgr.open(&long_signal(), 4, Utc::now()).unwrap();
        let action = mgr.evaluate(18_030.0); // 1.5R

        coordinator.execute(&action, mgr.position()).unwrap();

        let bracket = coordinator.bracket().unwrap();
        assert_eq!(bracket.stop_loss.price, Some(18_010.0));
        assert_eq!(bracket.stop_loss.quantity, 2);

        // The exit fill is attributable and must not schedule a reconcile
        coordinator.drain_events();
        assert!(!coordinator.needs_reconcile());
    }

    #[tokio::test]
    async fn test_close_cancels_protective_legs() {
        let mut coordinator = sim_coordinator().await;
        coordinator.open_position(&long_signal(), 2).unwrap();
        coordinator.drain_events();

        let action = PositionAction::Close {
            size: 2,
            price: 18_010.0,
            pnl: 40.0,
            reason: ExitReason::SessionEnd,
            r_multiple: 0.5,
        };
        coordinator.execute(&action, None).unwrap();

        assert!(coordinator.bracket().is_none());
    }

    #[tokio::test]
    async fn test_venue_stop_fill_surfaces_exit() {
        let mut coordinator = sim_coordinator().await;
        coordinator.open_position(&long_signal(), 2).unwrap();
        coordinator.drain_events();

        // The resting stop fills at the venue before any local evaluation
        let stop_id = coordinator.bracket().unwrap().stop_loss.venue_id.unwrap();
        coordinator
            .venue
            .event_sender()
            .try_send(VenueEvent::OrderFilled {
                venue_id: stop_id,
                fill_price: 17_980.0,
                fill_quantity: 2,
            })
            .unwrap();
        coordinator.drain_events();

        assert_eq!(
            coordinator.take_venue_exit(),
            Some(VenueExit { kind: OrderKind::Stop, price: 17_980.0, quantity: 2 })
        );
        assert!(coordinator.bracket().is_none());
        assert!(!coordinator.needs_reconcile());
    }

    #[tokio::test]
    async fn test_local_stop_close_waits_for_venue_fill() {
        // Paper mode: the protective stop rests at the venue, so a local
        // stop-cross close must not place another market order
        let venue = VenueConnection::new(AgentConfig {
            mode: ExecutionMode::Paper,
            ..Default::default()
        });
        let mut coordinator = OrderCoordinator::new(venue);

        let mut bracket = BracketOrder::from_signal(&long_signal(), 2);
        bracket.entry.venue_id = Some(1);
        bracket.entry.record_fill(2, 18_000.0);
        bracket.stop_loss.venue_id = Some(2);
        bracket.stop_loss.update_state(OrderState::Submitted);
        bracket.take_profit.venue_id = Some(3);
        bracket.take_profit.update_state(OrderState::Submitted);
        coordinator.bracket = Some(bracket);

        let action = PositionAction::Close {
            size: 2,
            price: 17_980.0,
            pnl: -80.0,
            reason: ExitReason::StopLoss,
            r_multiple: -1.0,
        };
        coordinator.execute(&action, None).unwrap();
        // No market order went out and the bracket waits for the leg fill
        assert!(coordinator.bracket().is_some());

        coordinator
            .venue
            .event_sender()
            .try_send(VenueEvent::OrderFilled {
                venue_id: 2,
                fill_price: 17_980.0,
                fill_quantity: 2,
            })
            .unwrap();
        coordinator.drain_events();

        // The fill was expected: no second exit is surfaced
        assert!(coordinator.take_venue_exit().is_none());
        assert!(coordinator.bracket().is_none());
    }

    #[tokio::test]
    async fn test_entry_rejection_is_flagged() {
        let mut coordinator = sim_coordinator().await;
        coordinator.open_position(&long_signal(), 2).unwrap();

        let entry_id = coordinator.bracket().unwrap().entry.venue_id.unwrap();
        coordinator
            .venue
            .event_sender()
            .try_send(VenueEvent::OrderRejected {
                venue_id: entry_id,
                reason: "margin".to_string(),
            })
            .unwrap();
        coordinator.drain_events();

        assert!(coordinator.take_entry_rejection());
        assert!(coordinator.bracket().is_none());
    }

    #[tokio::test]
    async fn test_stop_leg_rejection_schedules_reconcile() {
        let mut coordinator = sim_coordinator().await;
        coordinator.open_position(&long_signal(), 2).unwrap();
        coordinator.drain_events();

        let stop_id = coordinator.bracket().unwrap().stop_loss.venue_id.unwrap();
        coordinator
            .venue
            .event_sender()
            .try_send(VenueEvent::OrderRejected {
                venue_id: stop_id,
                reason: "invalid price".to_string(),
            })
            .unwrap();
        coordinator.drain_events();

        assert!(coordinator.needs_reconcile());
        assert!(!coordinator.take_entry_rejection());
    }

    #[tokio::test]
    async fn test_unknown_fill_schedules_reconcile() {
        let mut coordinator = sim_coordinator().await;
        coordinator.drain_events(); // Connected

        coordinator
            .venue
            .event_sender()
            .try_send(VenueEvent::OrderFilled {
                venue_id: 999,
                fill_price: 18_000.0,
                fill_quantity: 1,
            })
            .unwrap();
        coordinator.drain_events();

        assert!(coordinator.needs_reconcile());
    }

    #[tokio::test]
    async fn test_reconcile_rearms_stop_for_open_position() {
        let mut coordinator = sim_coordinator().await;
        coordinator.open_position(&long_signal(), 2).unwrap();
        coordinator.drain_events();

        coordinator
            .venue
            .event_sender()
            .try_send(VenueEvent::Disconnected { reason: "socket closed".to_string() })
            .unwrap();
        coordinator.drain_events();
        assert!(coordinator.needs_reconcile());

        let mut mgr = PositionManager::new(100_000.0, 2.0);
        mgr.open(&long_signal(), 2, Utc::now()).unwrap();

        coordinator.reconnect_and_reconcile(mgr.position()).await.unwrap();
        assert!(!coordinator.needs_reconcile());

        let bracket = coordinator.bracket().unwrap();
        assert_eq!(bracket.stop_loss.state, OrderState::Submitted);
        assert_eq!(bracket.stop_loss.price, Some(17_980.0));
    }
}

//! Venue gateway: IB TWS/Gateway via `ibapi`, with a simulation short-circuit
//!
//! Every operation checks the execution mode first: Simulation never touches
//! the network and synthesizes fills through the event queue. In Paper and
//! Live modes fills, cancels, and rejections come from the venue's order
//! update stream, pumped into the same queue by a dedicated thread. Events
//! are drained by the tick loop only, so all order state has a single
//! writer.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ibapi::contracts::{Contract, SecurityType};
use ibapi::market_data::historical::{BarSize, ToDuration, WhatToShow};
use ibapi::orders::{order_builder, Action, OrderUpdate};
use ibapi::Client;

use crate::bars::Bar;
use crate::config::{AgentConfig, ExecutionMode};
use crate::execution::order::OrderSide;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Events surfaced by the venue connection, drained each tick
#[derive(Debug, Clone)]
pub enum VenueEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected { reason: String },
    /// Order filled
    OrderFilled { venue_id: i32, fill_price: f64, fill_quantity: i32 },
    /// Order rejected
    OrderRejected { venue_id: i32, reason: String },
    /// Order cancelled
    OrderCancelled { venue_id: i32 },
    /// Error
    Error { message: String },
}

/// Build the futures contract the agent trades
fn futures_contract(config: &AgentConfig) -> Contract {
    Contract {
        symbol: config.symbol.clone(),
        security_type: SecurityType::Future,
        exchange: config.exchange.clone(),
        currency: config.currency.clone(),
        local_symbol: config.local_symbol.clone(),
        primary_exchange: config.exchange.clone(),
        ..Default::default()
    }
}

fn to_action(side: OrderSide) -> Action {
    match side {
        OrderSide::Buy => Action::Buy,
        OrderSide::Sell => Action::Sell,
    }
}

/// Pump the venue's order update stream into the event queue. Runs on its
/// own thread for the life of the connection; the stream ends when the
/// client drops or the socket dies, which surfaces as a disconnect.
fn forward_order_updates(client: Arc<Client>, events: mpsc::Sender<VenueEvent>) {
    let subscription = match client.order_update_stream() {
        Ok(s) => s,
        Err(e) => {
            let _ = events.blocking_send(VenueEvent::Error {
                message: format!("order update stream unavailable: {}", e),
            });
            return;
        }
    };

    for update in subscription {
        let event = match update {
            OrderUpdate::ExecutionData(data) => Some(VenueEvent::OrderFilled {
                venue_id: data.execution.order_id,
                fill_price: data.execution.price,
                fill_quantity: data.execution.shares as i32,
            }),
            OrderUpdate::OrderStatus(status) => match status.status.as_str() {
                "Cancelled" | "ApiCancelled" => {
                    Some(VenueEvent::OrderCancelled { venue_id: status.order_id })
                }
                "Inactive" => Some(VenueEvent::OrderRejected {
                    venue_id: status.order_id,
                    reason: status.why_held,
                }),
                _ => None,
            },
            OrderUpdate::Message(notice) => {
                Some(VenueEvent::Error { message: notice.message })
            }
            _ => None,
        };
        if let Some(event) = event {
            if events.blocking_send(event).is_err() {
                return;
            }
        }
    }

    let _ = events.blocking_send(VenueEvent::Disconnected {
        reason: "order update stream closed".to_string(),
    });
}

/// IB connection wrapper
pub struct VenueConnection {
    config: AgentConfig,
    state: ConnectionState,
    client: Option<Arc<Client>>,
    contract: Contract,
    event_tx: mpsc::Sender<VenueEvent>,
    event_rx: mpsc::Receiver<VenueEvent>,
    next_order_id: i32,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
}

impl VenueConnection {
    pub fn new(config: AgentConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);
        let contract = futures_contract(&config);

        Self {
            config,
            state: ConnectionState::Disconnected,
            client: None,
            contract,
            event_tx,
            event_rx,
            next_order_id: 1,
            reconnect_attempts: 0,
            max_reconnect_attempts: 5,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_simulated(&self) -> bool {
        self.config.mode == ExecutionMode::Simulation
    }

    fn next_order_id(&mut self) -> i32 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    fn emit(&self, event: VenueEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Venue event queue full; event dropped");
        }
    }

    /// Connect to TWS/Gateway
    pub async fn connect(&mut self) -> Result<()> {
        if self.config.mode == ExecutionMode::Simulation {
            info!("Simulation mode - skipping venue connection");
            self.state = ConnectionState::Connected;
            self.emit(VenueEvent::Connected);
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let connection_url = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to IB at {}...", connection_url);

        let client = Client::connect(&connection_url, self.config.client_id)
            .context("Failed to connect to IB TWS/Gateway. Make sure TWS or IB Gateway is running.")?;

        let client = Arc::new(client);
        let stream_client = Arc::clone(&client);
        let events = self.event_tx.clone();
        std::thread::spawn(move || forward_order_updates(stream_client, events));

        self.client = Some(client);
        self.state = ConnectionState::Connected;

        info!("Connected to IB ({} on {})", self.config.local_symbol, self.config.exchange);
        self.emit(VenueEvent::Connected);

        Ok(())
    }

    /// Disconnect, dropping the client
    pub fn disconnect(&mut self) {
        if self.client.take().is_some() {
            info!("Disconnected from IB");
        }
        self.state = ConnectionState::Disconnected;
        self.emit(VenueEvent::Disconnected { reason: "user requested disconnect".to_string() });
    }

    /// Attempt to reconnect with exponential backoff
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            self.state = ConnectionState::Failed;
            bail!("Max reconnect attempts ({}) exceeded", self.max_reconnect_attempts);
        }

        self.state = ConnectionState::Reconnecting;
        self.reconnect_attempts += 1;

        let delay = Duration::from_secs(2u64.pow(self.reconnect_attempts));
        warn!(
            "Reconnecting to IB (attempt {}/{}) in {:?}...",
            self.reconnect_attempts, self.max_reconnect_attempts, delay
        );

        tokio::time::sleep(delay).await;
        self.connect().await
    }

    /// Reset reconnect counter (call after a successful operation)
    pub fn reset_reconnect_counter(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Fetch the recent 1-minute history window. Simulation has no data
    /// source and returns an empty batch.
    pub fn fetch_historical_bars(&self) -> Result<Vec<Bar>> {
        if self.config.mode == ExecutionMode::Simulation {
            debug!("SIMULATION: no historical bars");
            return Ok(Vec::new());
        }

        let client = self.require_client()?;
        let history = client
            .historical_data(
                &self.contract,
                None, // end time: now
                self.config.history_window_secs.seconds(),
                BarSize::Min,
                WhatToShow::Trades,
                false, // include extended hours; the session filter is ours
            )
            .context("historical data request failed")?;

        let bars = history
            .bars
            .iter()
            .map(|b| Bar {
                timestamp: DateTime::from_timestamp(b.date.unix_timestamp(), 0)
                    .unwrap_or_else(Utc::now),
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
                volume: b.volume as f64,
            })
            .collect();

        Ok(bars)
    }

    /// Place a three-legged bracket: market parent staged with transmit off,
    /// children attached by parent id, last child transmits the group.
    /// Returns the venue ids (entry, stop, take-profit).
    ///
    /// In simulation the entry fill is synthesized at `reference_price`;
    /// live fills arrive through the order update stream.
    pub fn place_bracket(
        &mut self,
        side: OrderSide,
        quantity: i32,
        stop_price: f64,
        target_price: f64,
        reference_price: f64,
    ) -> Result<(i32, i32, i32)> {
        if !self.is_connected() {
            bail!("not connected to venue");
        }

        let parent_id = self.next_order_id();
        let stop_id = self.next_order_id();
        let profit_id = self.next_order_id();

        info!(
            "Submitting bracket: {} {} @ MKT | Stop: {:.2} | Target: {:.2}",
            side, quantity, stop_price, target_price
        );

        if self.config.mode == ExecutionMode::Simulation {
            debug!("SIMULATION: bracket parent={} stop={} profit={}", parent_id, stop_id, profit_id);
            self.emit(VenueEvent::OrderFilled {
                venue_id: parent_id,
                fill_price: reference_price,
                fill_quantity: quantity,
            });
            return Ok((parent_id, stop_id, profit_id));
        }

        let client = self.require_client()?;
        let action = to_action(side);
        let reverse = to_action(side.opposite());

        let mut parent = order_builder::market_order(action, quantity as f64);
        parent.order_id = parent_id;
        parent.transmit = false;

        let mut stop_order = order_builder::stop(reverse.clone(), quantity as f64, stop_price);
        stop_order.order_id = stop_id;
        stop_order.parent_id = parent_id;
        stop_order.transmit = false;

        let mut profit_order = order_builder::limit_order(reverse, quantity as f64, target_price);
        profit_order.order_id = profit_id;
        profit_order.parent_id = parent_id;
        profit_order.transmit = true;

        // On partial failure, pull back whatever was already staged so the
        // caller returns to a clean slate
        client.place_order(parent_id, &self.contract, &parent)?;
        if let Err(e) = client.place_order(stop_id, &self.contract, &stop_order) {
            warn!("Bracket stop leg failed; cancelling parent {}: {}", parent_id, e);
            let _ = client.cancel_order(parent_id, "");
            return Err(e.into());
        }
        if let Err(e) = client.place_order(profit_id, &self.contract, &profit_order) {
            warn!("Bracket profit leg failed; cancelling staged legs: {}", e);
            let _ = client.cancel_order(stop_id, "");
            let _ = client.cancel_order(parent_id, "");
            return Err(e.into());
        }

        Ok((parent_id, stop_id, profit_id))
    }

    /// Place a standalone market order (partial and terminal exits).
    /// Returns the venue id. Simulation synthesizes the fill at
    /// `reference_price`; live fills arrive through the order update stream.
    pub fn place_market_order(
        &mut self,
        side: OrderSide,
        quantity: i32,
        reference_price: f64,
    ) -> Result<i32> {
        if !self.is_connected() {
            bail!("not connected to venue");
        }

        let venue_id = self.next_order_id();
        info!("Submitting market order: {} {} (id {})", side, quantity, venue_id);

        if self.config.mode == ExecutionMode::Simulation {
            self.emit(VenueEvent::OrderFilled {
                venue_id,
                fill_price: reference_price,
                fill_quantity: quantity,
            });
            return Ok(venue_id);
        }

        let client = self.require_client()?;
        let mut order = order_builder::market_order(to_action(side), quantity as f64);
        order.order_id = venue_id;
        client.place_order(venue_id, &self.contract, &order)?;

        Ok(venue_id)
    }

    /// Move the protective stop by re-placing it under the same venue id
    pub fn replace_stop(
        &mut self,
        venue_id: i32,
        parent_id: Option<i32>,
        side: OrderSide,
        quantity: i32,
        new_stop_price: f64,
    ) -> Result<()> {
        if !self.is_connected() {
            bail!("not connected to venue");
        }

        if self.config.mode == ExecutionMode::Simulation {
            debug!("SIMULATION: stop {} moved to {:.2}", venue_id, new_stop_price);
            return Ok(());
        }

        let client = self.require_client()?;

        let mut stop_order = order_builder::stop(to_action(side), quantity as f64, new_stop_price);
        stop_order.order_id = venue_id;
        if let Some(parent) = parent_id {
            stop_order.parent_id = parent;
        }
        stop_order.transmit = true;

        debug!("Moving stop {} to {:.2}", venue_id, new_stop_price);
        client.place_order(venue_id, &self.contract, &stop_order)?;

        Ok(())
    }

    /// Place a standalone protective stop (used when re-arming after a
    /// reconnect). Returns the venue id.
    pub fn place_stop(&mut self, side: OrderSide, quantity: i32, stop_price: f64) -> Result<i32> {
        if !self.is_connected() {
            bail!("not connected to venue");
        }

        let venue_id = self.next_order_id();
        info!("Submitting stop order: {} {} @ {:.2} (id {})", side, quantity, stop_price, venue_id);

        if self.config.mode != ExecutionMode::Simulation {
            let client = self.require_client()?;
            let mut order = order_builder::stop(to_action(side), quantity as f64, stop_price);
            order.order_id = venue_id;
            client.place_order(venue_id, &self.contract, &order)?;
        }

        Ok(venue_id)
    }

    /// Cancel a working order
    pub fn cancel_order(&mut self, venue_id: i32) -> Result<()> {
        if !self.is_connected() {
            bail!("not connected to venue");
        }

        if self.config.mode == ExecutionMode::Simulation {
            debug!("SIMULATION: cancel order {}", venue_id);
            self.emit(VenueEvent::OrderCancelled { venue_id });
            return Ok(());
        }

        let client = self.require_client()?;
        client.cancel_order(venue_id, "")?;

        Ok(())
    }

    /// Non-blocking event drain, called once per tick
    pub fn try_next_event(&mut self) -> Option<VenueEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Event sender for external producers
    pub fn event_sender(&self) -> mpsc::Sender<VenueEvent> {
        self.event_tx.clone()
    }

    fn require_client(&self) -> Result<&Arc<Client>> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("venue client not available"))
    }
}

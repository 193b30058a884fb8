//! The trading agent tick loop
//!
//! One strictly-sequential tick: drain venue events, sync bars, aggregate,
//! then either manage the open position or look for a new signal. All state
//! mutation happens on this path; the venue only talks back through the
//! event queue.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregate;
use crate::config::AgentConfig;
use crate::execution::{OrderCoordinator, OrderKind, VenueConnection};
use crate::position::{ExitReason, PositionManager};
use crate::risk::RiskSizer;
use crate::signal::{SignalConfig, SignalEngine};
use crate::store::BarStore;

pub struct TradingAgent {
    config: AgentConfig,
    store: BarStore,
    engine: SignalEngine,
    manager: PositionManager,
    sizer: RiskSizer,
    coordinator: OrderCoordinator,
}

impl TradingAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let store = BarStore::open(&config.historical_path, &config.live_path, config.retention)
            .context("failed to open bar store")?;

        let signal_config = match &config.signal_config_path {
            Some(path) => SignalConfig::from_file(path)?,
            None => SignalConfig::default(),
        };
        info!("Signal config: {}", signal_config.version);

        let manager = PositionManager::new(config.starting_equity, config.multiplier);
        let sizer = config.risk_sizer();
        let coordinator = OrderCoordinator::new(VenueConnection::new(config.clone()));

        Ok(Self {
            config,
            store,
            engine: SignalEngine::new(signal_config),
            manager,
            sizer,
            coordinator,
        })
    }

    /// Connect, retrying with backoff; a venue that never comes up is fatal
    async fn connect(&mut self) -> Result<()> {
        if self.coordinator.connect().await.is_ok() {
            return Ok(());
        }
        loop {
            match self.coordinator.reconnect_and_reconcile(None).await {
                Ok(()) => return Ok(()),
                Err(e) if self.coordinator.venue().state() == crate::execution::ConnectionState::Failed => {
                    return Err(e);
                }
                Err(e) => warn!("Connect attempt failed: {}", e),
            }
        }
    }

    /// Run until ctrl-c. The in-progress tick always completes before
    /// shutdown proceeds.
    pub async fn run(&mut self) -> Result<()> {
        self.connect().await?;

        info!(
            "Agent started: {} on {} ({}), session {:02}:00-{:02}:00 America/Chicago, tick {}s",
            self.config.local_symbol,
            self.config.exchange,
            self.config.mode,
            self.config.session_start_hour,
            self.config.session_end_hour,
            self.config.poll_interval_secs
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        warn!("Tick failed: {}; retrying next tick", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.manager.is_active() {
            if let Some(price) = self.store.current_price() {
                let action = self.manager.force_close(price, ExitReason::Shutdown);
                if let Err(e) = self.coordinator.execute(&action, None) {
                    warn!("Failed to flatten on shutdown: {}", e);
                }
            }
        }
        info!("Shutting down: {}", self.manager.stats_summary());
        self.coordinator.shutdown();
    }

    /// One tick of the control loop
    async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.coordinator.drain_events();

        // No evaluation until order state is known-good again
        if self.coordinator.needs_reconcile() {
            self.coordinator
                .reconnect_and_reconcile(self.manager.position())
                .await?;
            return Ok(());
        }

        if self.coordinator.take_entry_rejection() {
            warn!("Entry rejected by venue; dropping local position");
            self.manager.abandon();
            return Ok(());
        }

        // A protective leg filled at the venue: book the exit at its fill
        // price and stand down for this tick
        if let Some(exit) = self.coordinator.take_venue_exit() {
            if self.manager.is_active() {
                let reason = match exit.kind {
                    OrderKind::TakeProfit => ExitReason::TargetReached,
                    _ => ExitReason::StopLoss,
                };
                self.manager.force_close(exit.price, reason);
            }
            return Ok(());
        }

        if self.manager.roll_date(now.date_naive()) {
            info!("New trading day {}", now.date_naive());
        }

        let fetched = self.coordinator.fetch_bars()?;
        let updated = self.store.merge(&fetched);
        if updated > 0 {
            self.store.persist();
        }

        let Some(price) = self.store.current_price() else {
            return Ok(());
        };
        let frames = aggregate::recompute(self.store.bars());
        let in_session = self.config.is_session_open(now);

        if self.manager.is_active() {
            let action = if in_session {
                self.manager.evaluate(price)
            } else {
                info!("Session closed; flattening open position");
                self.manager.force_close(price, ExitReason::SessionEnd)
            };
            self.coordinator.execute(&action, self.manager.position())?;
            return Ok(());
        }

        if !in_session {
            return Ok(());
        }
        if !self.sizer.should_trade(self.manager.equity(), self.manager.daily_pnl()) {
            warn!("Circuit breaker active: {}", self.manager.stats_summary());
            return Ok(());
        }

        let Some(signal) = self.engine.evaluate(&frames, price) else {
            return Ok(());
        };

        let size = self.sizer.size(self.manager.equity(), signal.entry_price, signal.stop_loss);
        if size == 0 {
            return Ok(());
        }

        self.coordinator.open_position(&signal, size)?;
        self.manager.open(&signal, size, now)?;
        info!(
            "Opened {} {} @ {:.2} stop {:.2} tp {:.2} (conf {:.0}%)",
            signal.direction,
            size,
            signal.entry_price,
            signal.stop_loss,
            signal.take_profit,
            signal.confidence * 100.0
        );

        Ok(())
    }
}

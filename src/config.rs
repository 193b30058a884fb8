//! Agent configuration

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::Chicago;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::risk::RiskSizer;

/// Execution mode determines whether orders are simulated or sent to the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionMode {
    /// Simulated execution (no venue connection)
    #[default]
    Simulation,
    /// Paper trading via TWS/Gateway paper account
    Paper,
    /// Live trading
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "Simulation"),
            Self::Paper => write!(f, "Paper"),
            Self::Live => write!(f, "Live"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" | "sim" => Ok(Self::Simulation),
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Full agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Execution mode (simulation, paper, or live)
    pub mode: ExecutionMode,

    /// Base symbol (e.g., "MNQ")
    pub symbol: String,

    /// Contract local symbol: base + month code + year digit (e.g., "MNQH6")
    pub local_symbol: String,

    /// Exchange
    pub exchange: String,

    /// Currency
    pub currency: String,

    /// Dollars per point per contract (MNQ = $2)
    pub multiplier: f64,

    /// Starting account equity; adjusted by realized P&L while running
    pub starting_equity: f64,

    /// Fraction of equity risked per trade
    pub risk_pct: f64,

    /// Maximum contracts per position
    pub max_position_size: i32,

    /// Daily loss limit as a fraction of equity
    pub daily_loss_limit_pct: f64,

    /// Equity floor below which trading halts
    pub min_equity: f64,

    /// 1-minute bars retained in memory and on disk
    pub retention: usize,

    /// Tick interval in seconds
    pub poll_interval_secs: u64,

    /// Historical window requested from the venue each sync, in seconds
    pub history_window_secs: i32,

    /// Session open hour, America/Chicago
    pub session_start_hour: u32,

    /// Session close hour, America/Chicago
    pub session_end_hour: u32,

    /// Cold historical bar file (read-only seed)
    pub historical_path: PathBuf,

    /// Live-session bar file (rewritten after each sync)
    pub live_path: PathBuf,

    /// Optional signal config version file (JSON); defaults apply when unset
    pub signal_config_path: Option<PathBuf>,

    /// TWS/Gateway host
    pub host: String,

    /// TWS/Gateway port (paper: 7497, live: 7496)
    pub port: u16,

    /// Client ID, unique per connection
    pub client_id: i32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Simulation,
            symbol: "MNQ".to_string(),
            local_symbol: "MNQH6".to_string(),
            exchange: "CME".to_string(),
            currency: "USD".to_string(),
            multiplier: 2.0,
            starting_equity: 100_000.0,
            risk_pct: 0.01,
            max_position_size: 10,
            daily_loss_limit_pct: 0.03,
            min_equity: 1000.0,
            // Must cover min_bars complete 4-hour windows for the signal
            // engine; 7200 minutes = five trading days
            retention: 7200,
            poll_interval_secs: 60,
            history_window_secs: 14_400, // 4 hours of 1-minute bars
            session_start_hour: 7,
            session_end_hour: 20,
            historical_path: PathBuf::from("data/historical_1m.csv"),
            live_path: PathBuf::from("data/live_1m.csv"),
            signal_config_path: None,
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
        }
    }
}

impl AgentConfig {
    /// Risk parameters derived from the config
    pub fn risk_sizer(&self) -> RiskSizer {
        RiskSizer {
            risk_pct: self.risk_pct,
            multiplier: self.multiplier,
            max_position_size: self.max_position_size,
            daily_loss_limit_pct: self.daily_loss_limit_pct,
            min_equity: self.min_equity,
        }
    }

    /// Whether the trading session is open at the given instant.
    /// Session hours are wall-clock America/Chicago.
    pub fn is_session_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&Chicago);
        let hour = local.hour();
        hour >= self.session_start_hour && hour < self.session_end_hour
    }
}

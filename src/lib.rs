// Library crate - exports the trading core and execution layer

pub mod agent;
pub mod aggregate;
pub mod bars;
pub mod config;
pub mod execution;
pub mod position;
pub mod risk;
pub mod signal;
pub mod store;

// Re-export commonly used types
pub use agent::TradingAgent;
pub use bars::{Bar, Timeframe};
pub use config::{AgentConfig, ExecutionMode};
pub use position::{Position, PositionAction, PositionManager};
pub use risk::RiskSizer;
pub use signal::{SignalConfig, SignalEngine, TradeSignal};
pub use store::BarStore;

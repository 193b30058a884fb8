//! Signal synthesis: market structure primitives and the alignment engine

pub mod engine;
pub mod structure;

pub use engine::{SignalConfig, SignalEngine, TradeSignal};
pub use structure::{
    Direction, Gap, LiquidityLevel, LiquiditySide, MarketStructure, TrendState,
};

//! Position sizing and the daily circuit breaker

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Risk parameters, all tunable from AgentConfig
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSizer {
    /// Fraction of equity risked per trade (0.01 = 1%)
    pub risk_pct: f64,
    /// Dollars per point per contract (MNQ = 2.0)
    pub multiplier: f64,
    /// Hard cap on contracts per position
    pub max_position_size: i32,
    /// |daily P&L| that halts trading for the day (fraction of equity)
    pub daily_loss_limit_pct: f64,
    /// Equity floor below which no trades are taken
    pub min_equity: f64,
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self {
            risk_pct: 0.01,
            multiplier: 2.0,
            max_position_size: 10,
            daily_loss_limit_pct: 0.03,
            min_equity: 1000.0,
        }
    }
}

impl RiskSizer {
    /// Contracts for a trade risking `risk_pct` of equity between entry and
    /// stop. Degenerate inputs (no equity, zero stop distance) size to zero.
    pub fn size(&self, equity: f64, entry_price: f64, stop_loss: f64) -> i32 {
        if equity <= 0.0 {
            return 0;
        }

        let risk_amount = equity * self.risk_pct;
        let risk_per_contract = (entry_price - stop_loss).abs() * self.multiplier;
        if risk_per_contract <= 0.0 {
            warn!("Zero risk distance for entry {:.2}; sizing to 0", entry_price);
            return 0;
        }

        let size = (risk_amount / risk_per_contract) as i32;
        size.clamp(0, self.max_position_size)
    }

    /// Circuit breaker: false once the daily loss limit is consumed in
    /// either direction, or equity is below the floor
    pub fn should_trade(&self, equity: f64, daily_pnl: f64) -> bool {
        if equity < self.min_equity {
            return false;
        }
        daily_pnl.abs() < equity * self.daily_loss_limit_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing_floors_fractional_contracts() {
        let sizer = RiskSizer { max_position_size: 100, ..Default::default() };

        // 100k * 1% = 1000 risk budget; 20 pts * $2 = $40 per contract -> 25
        assert_eq!(sizer.size(100_000.0, 18_000.0, 17_980.0), 25);

        // 1030 / 40 = 25.75 still floors to 25
        assert_eq!(sizer.size(103_000.0, 18_000.0, 17_980.0), 25);
    }

    #[test]
    fn test_sizing_clamps_to_max() {
        let sizer = RiskSizer::default();
        assert_eq!(sizer.size(100_000.0, 18_000.0, 17_980.0), 10);
    }

    #[test]
    fn test_degenerate_inputs_size_to_zero() {
        let sizer = RiskSizer::default();
        assert_eq!(sizer.size(0.0, 18_000.0, 17_980.0), 0);
        assert_eq!(sizer.size(-5_000.0, 18_000.0, 17_980.0), 0);
        // Stop at entry: no measurable risk per contract
        assert_eq!(sizer.size(100_000.0, 18_000.0, 18_000.0), 0);
    }

    #[test]
    fn test_sizing_is_direction_agnostic() {
        let sizer = RiskSizer { max_position_size: 100, ..Default::default() };
        assert_eq!(
            sizer.size(100_000.0, 18_000.0, 17_980.0),
            sizer.size(100_000.0, 18_000.0, 18_020.0)
        );
    }

    #[test]
    fn test_circuit_breaker() {
        let sizer = RiskSizer::default();

        assert!(sizer.should_trade(100_000.0, 0.0));
        assert!(sizer.should_trade(100_000.0, -2_999.0));
        // 3% of equity consumed, long or short side
        assert!(!sizer.should_trade(100_000.0, -3_000.0));
        assert!(!sizer.should_trade(100_000.0, 3_000.0));
        // Equity floor
        assert!(!sizer.should_trade(999.0, 0.0));
    }
}

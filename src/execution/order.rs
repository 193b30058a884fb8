//! Order records and the bracket grouping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::{Direction, TradeSignal};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl From<Direction> for OrderSide {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => Self::Buy,
            Direction::Short => Self::Sell,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Role of an order within the trade lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Market entry (bracket parent)
    Entry,
    /// Protective stop (bracket child)
    Stop,
    /// Take-profit limit (bracket child)
    TakeProfit,
    /// Market order closing part or all of an open position
    Flatten,
}

/// Order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Created but not yet submitted
    Pending,
    /// Accepted by the venue
    Submitted,
    /// Partially filled
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Cancelled
    Cancelled,
    /// Rejected by the venue
    Rejected,
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::PartiallyFilled => write!(f, "PARTIAL"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Individual order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID (client-side)
    pub id: Uuid,

    /// Venue order ID (set at submission)
    pub venue_id: Option<i32>,

    /// Role within the trade
    pub kind: OrderKind,

    /// Order side
    pub side: OrderSide,

    /// Quantity in contracts
    pub quantity: i32,

    /// Filled quantity
    pub filled_quantity: i32,

    /// Stop or limit price; None for market orders
    pub price: Option<f64>,

    /// Current state
    pub state: OrderState,

    /// Average fill price
    pub avg_fill_price: Option<f64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Order {
    fn new(kind: OrderKind, side: OrderSide, quantity: i32, price: Option<f64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            venue_id: None,
            kind,
            side,
            quantity,
            filled_quantity: 0,
            price,
            state: OrderState::Pending,
            avg_fill_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Market entry order
    pub fn entry(side: OrderSide, quantity: i32) -> Self {
        Self::new(OrderKind::Entry, side, quantity, None)
    }

    /// Protective stop order
    pub fn stop(side: OrderSide, quantity: i32, stop_price: f64) -> Self {
        Self::new(OrderKind::Stop, side, quantity, Some(stop_price))
    }

    /// Take-profit limit order
    pub fn take_profit(side: OrderSide, quantity: i32, limit_price: f64) -> Self {
        Self::new(OrderKind::TakeProfit, side, quantity, Some(limit_price))
    }

    /// Market order closing part or all of an open position
    pub fn flatten(side: OrderSide, quantity: i32) -> Self {
        Self::new(OrderKind::Flatten, side, quantity, None)
    }

    /// Check if order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
        )
    }

    /// Update order state
    pub fn update_state(&mut self, state: OrderState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record a fill, tracking the weighted average price
    pub fn record_fill(&mut self, fill_quantity: i32, fill_price: f64) {
        let prev_value = self.avg_fill_price.unwrap_or(0.0) * self.filled_quantity as f64;
        let new_value = fill_price * fill_quantity as f64;
        self.filled_quantity += fill_quantity;
        self.avg_fill_price = Some((prev_value + new_value) / self.filled_quantity as f64);
        self.updated_at = Utc::now();

        if self.filled_quantity >= self.quantity {
            self.state = OrderState::Filled;
        } else {
            self.state = OrderState::PartiallyFilled;
        }
    }
}

/// Entry plus its two protective children, submitted as one linked group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketOrder {
    /// Unique bracket ID
    pub id: Uuid,

    /// Market entry (parent)
    pub entry: Order,

    /// Protective stop (child)
    pub stop_loss: Order,

    /// Take-profit limit (child)
    pub take_profit: Order,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl BracketOrder {
    /// Build the three legs from a sized signal. Stop movement after entry
    /// belongs to the position lifecycle, not the bracket.
    pub fn from_signal(signal: &TradeSignal, size: i32) -> Self {
        let side: OrderSide = signal.direction.into();

        Self {
            id: Uuid::new_v4(),
            entry: Order::entry(side, size),
            stop_loss: Order::stop(side.opposite(), size, signal.stop_loss),
            take_profit: Order::take_profit(side.opposite(), size, signal.take_profit),
            created_at: Utc::now(),
        }
    }

    /// Legs that are still working at the venue
    pub fn open_legs(&self) -> impl Iterator<Item = &Order> {
        [&self.entry, &self.stop_loss, &self.take_profit]
            .into_iter()
            .filter(|o| !o.is_terminal())
    }

    pub fn legs_mut(&mut self) -> [&mut Order; 3] {
        [&mut self.entry, &mut self.stop_loss, &mut self.take_profit]
    }

    /// Find a leg by its venue order id
    pub fn leg_by_venue_id(&mut self, venue_id: i32) -> Option<&mut Order> {
        self.legs_mut()
            .into_iter()
            .find(|o| o.venue_id == Some(venue_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::Timeframe;
    use crate::signal::TrendState;

    fn signal(direction: Direction) -> TradeSignal {
        let sign = direction.sign();
        TradeSignal {
            direction,
            entry_price: 18_000.0,
            stop_loss: 18_000.0 - sign * 20.0,
            take_profit: 18_000.0 + sign * 80.0,
            risk_distance: 20.0,
            confidence: 0.7,
            alignment_score: sign,
            trends: vec![(Timeframe::H4, TrendState::Bullish)],
        }
    }

    #[test]
    fn test_bracket_legs_from_long_signal() {
        let bracket = BracketOrder::from_signal(&signal(Direction::Long), 3);

        assert_eq!(bracket.entry.side, OrderSide::Buy);
        assert_eq!(bracket.entry.kind, OrderKind::Entry);
        assert_eq!(bracket.entry.quantity, 3);
        assert_eq!(bracket.entry.price, None);

        assert_eq!(bracket.stop_loss.side, OrderSide::Sell);
        assert_eq!(bracket.stop_loss.price, Some(17_980.0));
        assert_eq!(bracket.take_profit.side, OrderSide::Sell);
        assert_eq!(bracket.take_profit.price, Some(18_080.0));
    }

    #[test]
    fn test_bracket_legs_from_short_signal() {
        let bracket = BracketOrder::from_signal(&signal(Direction::Short), 2);

        assert_eq!(bracket.entry.side, OrderSide::Sell);
        assert_eq!(bracket.stop_loss.side, OrderSide::Buy);
        assert_eq!(bracket.stop_loss.price, Some(18_020.0));
        assert_eq!(bracket.take_profit.price, Some(17_920.0));
    }

    #[test]
    fn test_record_fill_weighted_average() {
        let mut order = Order::entry(OrderSide::Buy, 4);

        order.record_fill(2, 18_000.0);
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.avg_fill_price, Some(18_000.0));

        order.record_fill(2, 18_002.0);
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.avg_fill_price, Some(18_001.0));
        assert!(order.is_terminal());
    }

    #[test]
    fn test_open_legs_excludes_terminal() {
        let mut bracket = BracketOrder::from_signal(&signal(Direction::Long), 1);
        assert_eq!(bracket.open_legs().count(), 3);

        bracket.entry.record_fill(1, 18_000.0);
        bracket.take_profit.update_state(OrderState::Cancelled);
        assert_eq!(bracket.open_legs().count(), 1);
    }

    #[test]
    fn test_leg_lookup_by_venue_id() {
        let mut bracket = BracketOrder::from_signal(&signal(Direction::Long), 1);
        bracket.entry.venue_id = Some(101);
        bracket.stop_loss.venue_id = Some(102);

        assert_eq!(bracket.leg_by_venue_id(102).unwrap().kind, OrderKind::Stop);
        assert!(bracket.leg_by_venue_id(999).is_none());
    }
}

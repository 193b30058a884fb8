//! Execution module: venue connection, order records, and the coordinator
//!
//! Translates signals and position lifecycle actions into orders at the
//! venue, and reconciles venue events back into local state.

pub mod coordinator;
pub mod order;
pub mod venue;

pub use coordinator::{OrderCoordinator, VenueExit};
pub use order::{BracketOrder, Order, OrderKind, OrderSide, OrderState};
pub use venue::{ConnectionState, VenueConnection, VenueEvent};

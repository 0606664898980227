use crate::side::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fill reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Client-assigned idempotent key of the order this fill belongs to
    pub client_key: String,
    /// Instrument
    pub symbol: String,
    /// Fill side
    pub side: Side,
    /// Quantity filled in this event
    pub quantity: Decimal,
    /// Fill price
    pub price: Decimal,
    /// Exchange-assigned sequence number; fills are applied in this order
    pub sequence: u64,
    /// When the fill occurred
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Notional value of this fill
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

//! Broadcast room addressing.
//!
//! The REST and real-time paths both derive room keys here, so a message
//! sent through either one reaches listeners that joined through the other.

use crate::entity::{OrderContext, OrderId, UserId};
use serde::Serialize;
use std::fmt;

const ORDER_PREFIX: &str = "order-";
const COUNTERPARTY_PREFIX: &str = "supplier-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn for_order(order_id: &OrderId) -> Self {
        Self(format!("{}{}", ORDER_PREFIX, order_id))
    }

    pub fn for_counterparty(counterparty_id: &UserId) -> Self {
        Self(format!("{}{}", COUNTERPARTY_PREFIX, counterparty_id))
    }

    /// Rooms a new message is fanned out to: always the counterparty room,
    /// plus the order room when the message belongs to a specific order.
    pub fn for_message(counterparty_id: &UserId, context: &OrderContext) -> Vec<Self> {
        let mut rooms = vec![Self::for_counterparty(counterparty_id)];
        if let OrderContext::Specific(order_id) = context {
            rooms.push(Self::for_order(order_id));
        }
        rooms
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{OrderStatus, PaymentStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: String, order_number: String, total: Decimal },
    StatusChanged { order_id: String, from: OrderStatus, to: OrderStatus, tracking_number: Option<String> },
    PaymentStatusChanged { order_id: String, from: PaymentStatus, to: PaymentStatus },
}

impl OrderEvent {
    /// Message subject the event is published under.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Created { .. } => "orders.created",
            Self::StatusChanged { .. } => "orders.status_changed",
            Self::PaymentStatusChanged { .. } => "orders.payment_changed",
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            Self::Created { order_id, .. }
            | Self::StatusChanged { order_id, .. }
            | Self::PaymentStatusChanged { order_id, .. } => order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload() {
        let event = OrderEvent::StatusChanged {
            order_id: "o-1".into(), from: OrderStatus::Processing, to: OrderStatus::Shipped, tracking_number: Some("T1".into()),
        };
        assert_eq!(event.subject(), "orders.status_changed");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["to"], "shipped");
    }
}

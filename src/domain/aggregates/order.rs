//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::OrderEvent;
use crate::domain::pricing::PriceBreakdown;
use crate::domain::value_objects::generate_order_number;

/// A placed order. Line items and price components are fixed at creation;
/// only the status, payment status and tracking number change afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: String,
    pub(crate) order_number: String,
    pub(crate) user_id: Option<String>,
    pub(crate) shipping_info: ShippingInfo,
    pub(crate) billing_same_as_shipping: bool,
    pub(crate) billing_address: Option<Address>,
    pub(crate) notes: Option<String>,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) subtotal: Decimal,
    pub(crate) shipping_cost: Decimal,
    pub(crate) discount: Decimal,
    pub(crate) discount_code: Option<String>,
    pub(crate) total: Decimal,
    pub(crate) status: OrderStatus,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) payment_method: String,
    pub(crate) tracking_number: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<OrderEvent>,
}

/// Snapshot of a product line at the time of purchase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub product_sku: String,
    pub product_image: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(min = 1, max = 20))]
    pub house_number: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 40))]
    pub phone: String,
    #[validate]
    pub address: Address,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        Self::Pending, Self::Confirmed, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Forward moves go one step along pending -> confirmed -> processing ->
    /// shipped -> delivered; any non-terminal state may be cancelled.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Processing) | (Processing, Shipped) | (Shipped, Delivered)
        ) || (next == Cancelled && !self.is_terminal())
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|status| status.as_str() == s).ok_or_else(|| OrderError::InvalidStatus(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [Self::Pending, Self::Paid, Self::Failed, Self::Refunded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Pending, Paid) | (Pending, Failed) | (Paid, Refunded))
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|status| status.as_str() == s).ok_or_else(|| OrderError::InvalidStatus(s.to_string()))
    }
}

/// Everything the checkout has decided before an order exists.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub user_id: Option<String>,
    pub shipping_info: ShippingInfo,
    pub billing_same_as_shipping: bool,
    pub billing_address: Option<Address>,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub pricing: PriceBreakdown,
    pub discount_code: Option<String>,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
}

impl Order {
    pub fn place(draft: OrderDraft) -> Self {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let order_number = generate_order_number(now);
        let mut order = Self {
            id: id.clone(), order_number: order_number.clone(), user_id: draft.user_id,
            shipping_info: draft.shipping_info, billing_same_as_shipping: draft.billing_same_as_shipping,
            billing_address: draft.billing_address, notes: draft.notes, items: draft.items,
            subtotal: draft.pricing.subtotal, shipping_cost: draft.pricing.shipping_cost,
            discount: draft.pricing.discount, discount_code: draft.discount_code, total: draft.pricing.total(),
            status: OrderStatus::Pending, payment_status: draft.payment_status, payment_method: draft.payment_method,
            tracking_number: None, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(OrderEvent::Created { order_id: id, order_number, total: order.total });
        order
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> Option<&str> { self.user_id.as_deref() }
    pub fn shipping_info(&self) -> &ShippingInfo { &self.shipping_info }
    pub fn billing_address(&self) -> Option<&Address> { self.billing_address.as_ref() }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> Decimal { self.subtotal }
    pub fn shipping_cost(&self) -> Decimal { self.shipping_cost }
    pub fn discount(&self) -> Decimal { self.discount }
    pub fn discount_code(&self) -> Option<&str> { self.discount_code.as_deref() }
    pub fn total(&self) -> Decimal { self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_method(&self) -> &str { &self.payment_method }
    pub fn tracking_number(&self) -> Option<&str> { self.tracking_number.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn transition_to(&mut self, next: OrderStatus, tracking_number: Option<String>) -> Result<(), OrderError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(OrderError::InvalidTransition { from: from.to_string(), to: next.to_string() });
        }
        self.record_status(next, tracking_number.clone());
        self.raise_event(OrderEvent::StatusChanged { order_id: self.id.clone(), from, to: next, tracking_number });
        Ok(())
    }

    pub fn set_payment_status(&mut self, next: PaymentStatus) -> Result<(), OrderError> {
        let from = self.payment_status;
        if !from.can_transition_to(next) {
            return Err(OrderError::InvalidTransition { from: from.to_string(), to: next.to_string() });
        }
        self.record_payment_status(next);
        self.raise_event(OrderEvent::PaymentStatusChanged { order_id: self.id.clone(), from, to: next });
        Ok(())
    }

    pub(crate) fn record_status(&mut self, next: OrderStatus, tracking_number: Option<String>) {
        self.status = next;
        if tracking_number.is_some() { self.tracking_number = tracking_number; }
        self.touch();
    }

    pub(crate) fn record_payment_status(&mut self, next: PaymentStatus) { self.payment_status = next; self.touch(); }

    /// Picks a fresh order number after a collision on insert.
    pub(crate) fn renumber(&mut self) {
        self.order_number = generate_order_number(self.created_at);
        let order_number = self.order_number.clone();
        for event in &mut self.events {
            if let OrderEvent::Created { order_number: n, .. } = event { n.clone_from(&order_number); }
        }
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn shipping_info() -> ShippingInfo {
        ShippingInfo {
            first_name: "Anna".into(), last_name: "Huber".into(), email: "anna@example.com".into(),
            phone: "+43 660 1234567".into(),
            address: Address {
                street: "Hauptstrasse".into(), house_number: "12".into(), postal_code: "1010".into(),
                city: "Wien".into(), country: "Austria".into(),
            },
        }
    }

    fn draft() -> OrderDraft {
        OrderDraft {
            user_id: Some("u-1".into()), shipping_info: shipping_info(), billing_same_as_shipping: true,
            billing_address: None, notes: None,
            items: vec![OrderItem {
                product_id: "P1".into(), product_name: "Widget".into(), product_sku: "W001".into(), product_image: None,
                quantity: 2, unit_price: Decimal::new(10, 0), total_price: Decimal::new(20, 0),
            }],
            pricing: PriceBreakdown { subtotal: Decimal::new(20, 0), shipping_cost: Decimal::new(599, 2), discount: Decimal::new(2, 0) },
            discount_code: Some("TWO".into()), payment_method: "invoice".into(), payment_status: PaymentStatus::Pending,
        }
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::place(draft());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total(), Decimal::new(2399, 2));
        assert!(order.order_number().starts_with("CT-"));
        order.transition_to(OrderStatus::Confirmed, None).unwrap();
        order.transition_to(OrderStatus::Processing, None).unwrap();
        order.transition_to(OrderStatus::Shipped, Some("1Z999".into())).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.tracking_number(), Some("1Z999"));
        let events = order.take_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], OrderEvent::Created { .. }));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut order = Order::place(draft());
        assert_eq!(
            order.transition_to(OrderStatus::Delivered, None),
            Err(OrderError::InvalidTransition { from: "pending".into(), to: "delivered".into() })
        );
        order.transition_to(OrderStatus::Cancelled, None).unwrap();
        assert!(order.transition_to(OrderStatus::Cancelled, None).is_err());
        assert!(order.transition_to(OrderStatus::Confirmed, None).is_err());
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for status in [OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped] {
            assert!(status.can_transition_to(OrderStatus::Cancelled), "{status} should be cancellable");
        }
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("shipped".parse::<OrderStatus>(), Ok(OrderStatus::Shipped));
        assert_eq!("lost".parse::<OrderStatus>(), Err(OrderError::InvalidStatus("lost".into())));
        assert_eq!("refunded".parse::<PaymentStatus>(), Ok(PaymentStatus::Refunded));
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_payment_state_machine() {
        let mut order = Order::place(draft());
        assert!(order.set_payment_status(PaymentStatus::Refunded).is_err());
        order.set_payment_status(PaymentStatus::Paid).unwrap();
        order.set_payment_status(PaymentStatus::Refunded).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Paid));
    }

    #[test]
    fn test_serialized_field_names() {
        let order = Order::place(draft());
        let json = serde_json::to_value(&order).unwrap();
        for key in ["order_number", "subtotal", "shipping_cost", "discount", "total", "status", "payment_status"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["status"], "pending");
        assert!(json.get("events").is_none());
    }

    #[test]
    fn test_shipping_info_validation() {
        assert!(shipping_info().validate().is_ok());
        let mut info = shipping_info();
        info.email = "not-an-email".into();
        info.address.city.clear();
        let errors = info.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
        assert!(errors.errors().contains_key("address"));
    }
}

//! Cart Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::Quantity;

/// Who a cart belongs to: a signed-in user or an anonymous session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CartOwner {
    User(String),
    Session(String),
}

impl fmt::Display for CartOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Session(id) => write!(f, "session:{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line. `price` is captured when the product is first added and is
/// what the checkout charges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: Quantity,
    pub price: Decimal,
}

impl CartItem {
    pub fn new(product_id: impl Into<String>, quantity: Quantity, price: Decimal) -> Self {
        Self { product_id: product_id.into(), quantity, price }
    }
    pub fn line_total(&self) -> Decimal { self.price * Decimal::from(self.quantity.value()) }
}

/// Whether two sets of lines hold the same products at the same quantities
/// and prices, in any order.
pub fn same_lines(left: &[CartItem], right: &[CartItem]) -> bool {
    left.len() == right.len()
        && left.iter().all(|line| right.iter().any(|other| other == line))
}

impl Cart {
    pub fn new(owner: &CartOwner) -> Self {
        let (user_id, session_id) = match owner {
            CartOwner::User(id) => (Some(id.clone()), None),
            CartOwner::Session(id) => (None, Some(id.clone())),
        };
        Self { id: Uuid::new_v4().to_string(), user_id, session_id, items: vec![], updated_at: Utc::now() }
    }

    pub fn owner(&self) -> Option<CartOwner> {
        match (&self.user_id, &self.session_id) {
            (Some(user), _) => Some(CartOwner::User(user.clone())),
            (None, Some(session)) => Some(CartOwner::Session(session.clone())),
            (None, None) => None,
        }
    }

    pub fn is_owned_by(&self, owner: &CartOwner) -> bool { self.owner().as_ref() == Some(owner) }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn item_count(&self) -> u32 { self.items.iter().map(|i| i.quantity.value()).sum() }
    pub fn subtotal(&self) -> Decimal { self.items.iter().map(CartItem::line_total).sum() }
    pub fn line(&self, product_id: &str) -> Option<&CartItem> { self.items.iter().find(|i| i.product_id == product_id) }

    /// Adds a line, merging into an existing line for the same product. The
    /// merged line keeps the price captured when it was first added.
    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            existing.quantity = existing.quantity.add(item.quantity);
        } else {
            self.items.push(item);
        }
        self.touch();
    }

    pub fn set_quantity(&mut self, product_id: &str, quantity: Quantity) -> Result<(), CartError> {
        let item = self.items.iter_mut().find(|i| i.product_id == product_id).ok_or(CartError::ItemNotFound)?;
        item.quantity = quantity;
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.touch(); }

    /// Empties the cart and returns its lines, but only while they still
    /// match `expected`.
    pub fn take_items(&mut self, expected: &[CartItem]) -> Option<Vec<CartItem>> {
        if !same_lines(&self.items, expected) { return None; }
        let taken = std::mem::take(&mut self.items);
        self.touch();
        Some(taken)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("item not found in cart")]
    ItemNotFound,
}

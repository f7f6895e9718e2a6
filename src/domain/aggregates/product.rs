//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::Sku;

/// Catalog product as seen by the checkout. `stock` is unsigned so it can
/// never go below zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: Sku,
    pub name: String,
    pub price: Decimal,
    pub stock: u32,
    pub sold_count: u64,
    pub images: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, price: Decimal, stock: u32) -> Result<Self, ProductError> {
        if price.is_sign_negative() { return Err(ProductError::NegativePrice); }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(), sku, name: name.into(), price, stock,
            sold_count: 0, images: vec![], is_active: true, created_at: now, updated_at: now,
        })
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self { self.images.push(url.into()); self }

    pub fn primary_image(&self) -> Option<&str> { self.images.first().map(String::as_str) }
    pub fn has_stock(&self, quantity: u32) -> bool { self.stock >= quantity }

    /// Takes `quantity` units out of stock, or leaves the product untouched.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), ProductError> {
        if !self.is_active { return Err(ProductError::Inactive); }
        self.stock = self.stock.checked_sub(quantity).ok_or(ProductError::InsufficientStock {
            requested: quantity,
            available: self.stock,
        })?;
        self.touch();
        Ok(())
    }

    pub fn restock(&mut self, quantity: u32) { self.stock = self.stock.saturating_add(quantity); self.touch(); }

    pub fn record_sale(&mut self, quantity: u32) {
        self.sold_count = self.sold_count.saturating_add(u64::from(quantity));
        self.touch();
    }

    pub fn deactivate(&mut self) { self.is_active = false; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("price must not be negative")]
    NegativePrice,
    #[error("product is inactive")]
    Inactive,
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
}

//! Carvatoo Checkout
//!
//! Checkout engine for an online car-parts shop: turns a shopping cart into
//! an order without overselling stock or over-redeeming coupons.
//!
//! ## Features
//! - Guest and user carts with stock-checked line management
//! - Atomic stock reservation with compensation on failure
//! - Percentage and fixed coupons with validity windows and usage caps
//! - Order status and payment state machines
//! - PostgreSQL or in-memory storage, NATS order events

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod services;
pub mod store;

#[cfg(test)]
mod test;

pub use config::{Config, ConfigError};
pub use error::{EcommerceError, Result};
pub use http::{router, AppState};

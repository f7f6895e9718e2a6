//! Repository traits for the four stores the checkout touches.
//!
//! Counters that several requests race on (product stock, coupon usage,
//! order status) are only ever changed through conditional single-step
//! operations. Implementations must perform the check and the write as one
//! atomic step.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::aggregates::{Cart, CartItem, CartOwner, Coupon, Order, OrderStatus, PaymentStatus, Product};
use crate::domain::value_objects::{CouponCode, Quantity};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("corrupt record: {0}")]
    Decode(String),

    #[error("storage error")]
    Sql(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => Self::Unavailable(error.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode(error.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate(db.message().to_string()),
            _ => Self::Sql(error),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: &str) -> StoreResult<Option<Product>>;

    /// Decrements stock by `quantity` only if the product is active and has at
    /// least that much stock. Returns whether the decrement happened.
    async fn atomic_decrement_stock(&self, id: &str, quantity: u32) -> StoreResult<bool>;

    /// Puts back stock taken by [`CatalogStore::atomic_decrement_stock`].
    async fn restore_stock(&self, id: &str, quantity: u32) -> StoreResult<()>;

    async fn increment_sold_count(&self, id: &str, quantity: u32) -> StoreResult<()>;

    /// Inserts or replaces a product.
    async fn insert_product(&self, product: &Product) -> StoreResult<()>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart(&self, owner: &CartOwner) -> StoreResult<Option<Cart>>;

    /// Stores `cart` unless the owner already has one; returns the owner's cart
    /// either way.
    async fn create_cart(&self, cart: &Cart) -> StoreResult<Cart>;

    /// Adds a line, or bumps the quantity of the existing line for the same
    /// product. Other lines are untouched. Returns `false`, changing nothing,
    /// when the merged quantity is more than the product's current stock.
    async fn add_line(&self, cart_id: &str, item: &CartItem) -> StoreResult<bool>;

    /// Returns `false` when the cart has no line for `product_id`.
    async fn set_line_quantity(&self, cart_id: &str, product_id: &str, quantity: Quantity) -> StoreResult<bool>;

    /// Returns `false` when the cart has no line for `product_id`.
    async fn remove_line(&self, cart_id: &str, product_id: &str) -> StoreResult<bool>;

    /// Empties the cart, keeping the cart itself.
    async fn clear_cart(&self, cart_id: &str) -> StoreResult<()>;

    /// Empties the cart only while its lines still equal `expected`, so one
    /// cart is turned into at most one order. Returns whether it did.
    async fn take_items(&self, cart_id: &str, expected: &[CartItem]) -> StoreResult<bool>;

    /// Merges lines removed by [`CartStore::take_items`] back into the cart.
    /// No stock check is made.
    async fn restore_items(&self, cart_id: &str, items: &[CartItem]) -> StoreResult<()>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_coupon(&self, code: &CouponCode) -> StoreResult<Option<Coupon>>;

    /// Increments `used_count` only while it is below `max_uses` (or there is
    /// no cap). Returns whether the increment happened.
    async fn atomic_increment_usage(&self, code: &CouponCode) -> StoreResult<bool>;

    /// Gives back a use taken by [`CouponStore::atomic_increment_usage`].
    async fn release_usage(&self, code: &CouponCode) -> StoreResult<()>;

    /// Inserts or replaces a coupon.
    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub page: u32,
    pub limit: u32,
}

impl Default for OrderFilter {
    fn default() -> Self { Self { status: None, page: 1, limit: 20 } }
}

impl OrderFilter {
    pub fn offset(&self) -> u64 { u64::from(self.page.max(1) - 1) * u64::from(self.limit) }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub page: u32,
    pub pages: u64,
}

impl OrderPage {
    pub fn new(orders: Vec<Order>, total: u64, filter: &OrderFilter) -> Self {
        let limit = u64::from(filter.limit.max(1));
        Self { orders, total, page: filter.page.max(1), pages: total.div_ceil(limit) }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the id or order number is taken.
    async fn insert_order(&self, order: &Order) -> StoreResult<()>;

    async fn find_order(&self, id_or_number: &str) -> StoreResult<Option<Order>>;

    /// Newest first.
    async fn list_orders_for_user(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Order>>;

    /// Newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage>;

    /// Sets the status only if it is still `expected`. Returns whether it did.
    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        tracking_number: Option<&str>,
    ) -> StoreResult<bool>;

    /// Sets the payment status only if it is still `expected`. Returns whether it did.
    async fn update_payment_status(&self, id: &str, expected: PaymentStatus, next: PaymentStatus) -> StoreResult<bool>;
}

/// The injected store handles, one per entity.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: Arc<dyn CartStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub orders: Arc<dyn OrderStore>,
}

impl Stores {
    /// Uses one backend for every entity.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: CatalogStore + CartStore + CouponStore + OrderStore + 'static,
    {
        Self { catalog: store.clone(), carts: store.clone(), coupons: store.clone(), orders: store }
    }

    pub fn in_memory() -> Self { Self::shared(Arc::new(MemoryStore::new())) }
}

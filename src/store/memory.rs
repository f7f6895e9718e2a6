//! In-process store backed by `RwLock`ed maps.
//!
//! Every mutation takes the relevant write lock once, so each conditional
//! update is checked and applied inside a single critical section.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CartStore, CatalogStore, CouponStore, OrderFilter, OrderPage, OrderStore, StoreError, StoreResult};
use crate::domain::aggregates::{Cart, CartItem, CartOwner, Coupon, Order, OrderStatus, PaymentStatus, Product};
use crate::domain::value_objects::{CouponCode, Quantity};

#[derive(Debug, Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<String, Product>>,
    carts: RwLock<HashMap<String, Cart>>,
    coupons: RwLock<HashMap<CouponCode, Coupon>>,
    orders: RwLock<Vec<Order>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_product(&self, id: &str) -> StoreResult<Option<Product>> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn atomic_decrement_stock(&self, id: &str, quantity: u32) -> StoreResult<bool> {
        let mut products = self.products.write().await;
        Ok(products.get_mut(id).is_some_and(|product| product.reserve(quantity).is_ok()))
    }

    async fn restore_stock(&self, id: &str, quantity: u32) -> StoreResult<()> {
        if let Some(product) = self.products.write().await.get_mut(id) {
            product.restock(quantity);
        }
        Ok(())
    }

    async fn increment_sold_count(&self, id: &str, quantity: u32) -> StoreResult<()> {
        if let Some(product) = self.products.write().await.get_mut(id) {
            product.record_sale(quantity);
        }
        Ok(())
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<()> {
        self.products.write().await.insert(product.id.clone(), product.clone());
        Ok(())
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn get_cart(&self, owner: &CartOwner) -> StoreResult<Option<Cart>> {
        Ok(self.carts.read().await.values().find(|cart| cart.is_owned_by(owner)).cloned())
    }

    async fn create_cart(&self, cart: &Cart) -> StoreResult<Cart> {
        let owner = cart.owner().ok_or_else(|| StoreError::Decode(format!("cart {} has no owner", cart.id)))?;
        let mut carts = self.carts.write().await;
        if let Some(existing) = carts.values().find(|c| c.is_owned_by(&owner)) {
            return Ok(existing.clone());
        }
        carts.insert(cart.id.clone(), cart.clone());
        Ok(cart.clone())
    }

    async fn add_line(&self, cart_id: &str, item: &CartItem) -> StoreResult<bool> {
        let mut carts = self.carts.write().await;
        let cart = carts.get_mut(cart_id).ok_or_else(|| StoreError::Decode(format!("cart {cart_id} vanished")))?;
        let merged = cart.line(&item.product_id).map_or(item.quantity, |line| line.quantity.add(item.quantity));
        // Lock order is carts, then products.
        let in_stock = self
            .products
            .read()
            .await
            .get(&item.product_id)
            .is_some_and(|product| product.has_stock(merged.value()));
        if in_stock {
            cart.add_item(item.clone());
        }
        Ok(in_stock)
    }

    async fn set_line_quantity(&self, cart_id: &str, product_id: &str, quantity: Quantity) -> StoreResult<bool> {
        let mut carts = self.carts.write().await;
        Ok(carts.get_mut(cart_id).is_some_and(|cart| cart.set_quantity(product_id, quantity).is_ok()))
    }

    async fn remove_line(&self, cart_id: &str, product_id: &str) -> StoreResult<bool> {
        let mut carts = self.carts.write().await;
        Ok(carts.get_mut(cart_id).is_some_and(|cart| cart.remove_item(product_id).is_ok()))
    }

    async fn clear_cart(&self, cart_id: &str) -> StoreResult<()> {
        if let Some(cart) = self.carts.write().await.get_mut(cart_id) {
            cart.clear();
        }
        Ok(())
    }

    async fn take_items(&self, cart_id: &str, expected: &[CartItem]) -> StoreResult<bool> {
        let mut carts = self.carts.write().await;
        Ok(carts.get_mut(cart_id).and_then(|cart| cart.take_items(expected)).is_some())
    }

    async fn restore_items(&self, cart_id: &str, items: &[CartItem]) -> StoreResult<()> {
        let mut carts = self.carts.write().await;
        let cart = carts.get_mut(cart_id).ok_or_else(|| StoreError::Decode(format!("cart {cart_id} vanished")))?;
        for item in items {
            cart.add_item(item.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn find_coupon(&self, code: &CouponCode) -> StoreResult<Option<Coupon>> {
        Ok(self.coupons.read().await.get(code).cloned())
    }

    async fn atomic_increment_usage(&self, code: &CouponCode) -> StoreResult<bool> {
        let mut coupons = self.coupons.write().await;
        match coupons.get_mut(code) {
            Some(coupon) if !coupon.is_exhausted() => {
                coupon.used_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_usage(&self, code: &CouponCode) -> StoreResult<()> {
        if let Some(coupon) = self.coupons.write().await.get_mut(code) {
            coupon.used_count = coupon.used_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
        self.coupons.write().await.insert(coupon.code.clone(), coupon.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        if orders.iter().any(|o| o.id == order.id || o.order_number == order.order_number) {
            return Err(StoreError::Duplicate(order.order_number.clone()));
        }
        let mut stored = order.clone();
        stored.events.clear();
        orders.push(stored);
        Ok(())
    }

    async fn find_order(&self, id_or_number: &str) -> StoreResult<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.iter().find(|o| o.id == id_or_number || o.order_number == id_or_number).cloned())
    }

    async fn list_orders_for_user(&self, user_id: &str, limit: u32) -> StoreResult<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.iter().rev().filter(|o| o.user_id.as_deref() == Some(user_id)).take(limit as usize).cloned().collect())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage> {
        let orders = self.orders.read().await;
        let matching: Vec<&Order> = orders.iter().rev().filter(|o| filter.status.map_or(true, |s| o.status == s)).collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok(OrderPage::new(page, total, filter))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        tracking_number: Option<&str>,
    ) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.iter_mut().find(|o| o.id == id) {
            Some(order) if order.status == expected => {
                order.record_status(next, tracking_number.map(str::to_string));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_payment_status(&self, id: &str, expected: PaymentStatus, next: PaymentStatus) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.iter_mut().find(|o| o.id == id) {
            Some(order) if order.payment_status == expected => {
                order.record_payment_status(next);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

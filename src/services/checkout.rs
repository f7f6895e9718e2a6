//! Checkout engine: turns a cart into an order.
//!
//! Validation and pricing run first and touch nothing. The cart is then
//! claimed, emptied only if it still holds the validated lines, so one cart
//! yields at most one order. Stock and coupon usage are reserved with
//! conditional updates before the order is written. If a later step fails
//! every reservation is undone and the lines go back into the cart. Once the
//! order is stored it stays stored; sold counters and events only log their
//! failures.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::aggregates::{Address, CartItem, CartOwner, Order, OrderDraft, OrderItem, ShippingInfo};
use crate::domain::pricing::{PriceBreakdown, ShippingPolicy};
use crate::domain::value_objects::CouponCode;
use crate::error::{EcommerceError, Result};
use crate::services::events::{publish_all, EventPublisher};
use crate::services::payment::PaymentGateway;
use crate::store::{StoreError, Stores};

const MAX_INSERT_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub shipping_info: ShippingInfo,
    pub billing_same_as_shipping: bool,
    pub billing_address: Option<Address>,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

/// Result of the side-effect free part of a checkout.
#[derive(Debug)]
struct ValidatedCheckout {
    cart_id: String,
    lines: Vec<CartItem>,
    items: Vec<OrderItem>,
    pricing: PriceBreakdown,
    coupon: Option<CouponCode>,
}

#[derive(Clone)]
pub struct CheckoutEngine {
    stores: Stores,
    shipping: ShippingPolicy,
    payments: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventPublisher>,
}

impl CheckoutEngine {
    pub fn new(
        stores: Stores,
        shipping: ShippingPolicy,
        payments: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { stores, shipping, payments, events }
    }

    #[tracing::instrument(skip_all, fields(owner = %owner))]
    pub async fn checkout(&self, owner: &CartOwner, request: CheckoutRequest) -> Result<Order> {
        let validated = self.validate(owner, request.coupon_code.as_deref()).await?;
        self.claim_cart(owner, &validated).await?;

        if let Err(error) = self.reserve(&validated).await {
            self.restore_cart(&validated).await;
            return Err(error);
        }

        let user_id = match owner {
            CartOwner::User(id) => Some(id.clone()),
            CartOwner::Session(_) => None,
        };
        let mut order = Order::place(OrderDraft {
            user_id,
            shipping_info: request.shipping_info,
            billing_same_as_shipping: request.billing_same_as_shipping,
            billing_address: request.billing_address,
            notes: request.notes,
            items: validated.items.clone(),
            pricing: validated.pricing,
            discount_code: validated.coupon.as_ref().map(ToString::to_string),
            payment_status: self.payments.initial_status(&request.payment_method),
            payment_method: request.payment_method,
        });

        if let Err(store_error) = self.persist(&mut order).await {
            error!(error = %store_error, "failed to store order, releasing reservations");
            self.release_stock(&validated.items).await;
            if let Some(code) = &validated.coupon {
                self.release_coupon(code).await;
            }
            self.restore_cart(&validated).await;
            return Err(store_error.into());
        }

        for item in order.items() {
            if let Err(error) = self.stores.catalog.increment_sold_count(&item.product_id, item.quantity).await {
                warn!(order_number = %order.order_number(), product_id = %item.product_id, %error, "failed to update sold count");
            }
        }

        publish_all(self.events.as_ref(), order.take_events()).await;

        info!(
            order_number = %order.order_number(),
            total = %order.total(),
            lines = order.items().len(),
            "order created"
        );
        Ok(order)
    }

    async fn validate(&self, owner: &CartOwner, coupon_code: Option<&str>) -> Result<ValidatedCheckout> {
        let cart = self
            .stores
            .carts
            .get_cart(owner)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(EcommerceError::EmptyCart)?;

        let mut items = Vec::with_capacity(cart.items().len());
        let mut subtotal = Decimal::ZERO;

        for line in cart.items() {
            let product = self
                .stores
                .catalog
                .get_product(&line.product_id)
                .await?
                .filter(|product| product.is_active)
                .ok_or_else(|| EcommerceError::ProductUnavailable { product_id: line.product_id.clone() })?;

            let quantity = line.quantity.value();
            if !product.has_stock(quantity) {
                return Err(EcommerceError::InsufficientStock {
                    product_id: product.id,
                    requested: quantity,
                    available: product.stock,
                });
            }

            let total_price = line.line_total();
            subtotal += total_price;
            items.push(OrderItem {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                product_sku: product.sku.to_string(),
                product_image: product.primary_image().map(str::to_string),
                quantity,
                unit_price: line.price,
                total_price,
            });
        }

        let shipping_cost = self.shipping.cost_for(subtotal);

        let coupon = coupon_code.and_then(|raw| CouponCode::new(raw).ok());
        let discount = match &coupon {
            Some(code) => self.price_coupon(code, subtotal).await?,
            None => Decimal::ZERO,
        };

        Ok(ValidatedCheckout {
            cart_id: cart.id,
            lines: cart.items,
            items,
            pricing: PriceBreakdown { subtotal, shipping_cost, discount },
            coupon,
        })
    }

    async fn price_coupon(&self, code: &CouponCode, subtotal: Decimal) -> Result<Decimal> {
        let coupon = self
            .stores
            .coupons
            .find_coupon(code)
            .await?
            .ok_or_else(|| EcommerceError::InvalidCoupon { code: code.to_string() })?;

        let evaluation = coupon.evaluate(subtotal, Utc::now());
        match evaluation.reason {
            None => Ok(evaluation.discount),
            Some(reason) => Err(EcommerceError::from_coupon_rejection(code, reason, subtotal)),
        }
    }

    /// Empties the cart if it still holds exactly the validated lines. A
    /// cart that another checkout already took reads as empty.
    async fn claim_cart(&self, owner: &CartOwner, validated: &ValidatedCheckout) -> Result<()> {
        if self.stores.carts.take_items(&validated.cart_id, &validated.lines).await? {
            return Ok(());
        }
        warn!(cart_id = %validated.cart_id, "cart changed while checking out");
        let emptied = self.stores.carts.get_cart(owner).await?.map_or(true, |cart| cart.is_empty());
        if emptied {
            Err(EcommerceError::EmptyCart)
        } else {
            Err(EcommerceError::Conflict("cart changed during checkout, review it and retry".into()))
        }
    }

    async fn restore_cart(&self, validated: &ValidatedCheckout) {
        if let Err(error) = self.stores.carts.restore_items(&validated.cart_id, &validated.lines).await {
            error!(cart_id = %validated.cart_id, lines = validated.lines.len(), %error, "failed to restore cart lines");
        }
    }

    async fn reserve(&self, validated: &ValidatedCheckout) -> Result<()> {
        self.reserve_stock(&validated.items).await?;
        if let Some(code) = &validated.coupon {
            self.claim_coupon(code, &validated.items).await?;
        }
        Ok(())
    }

    /// Takes stock for every line, or for none of them.
    async fn reserve_stock(&self, items: &[OrderItem]) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            let reserved = self.stores.catalog.atomic_decrement_stock(&item.product_id, item.quantity).await;
            let taken = &items[..index];

            match reserved {
                Ok(true) => {}
                Ok(false) => {
                    self.release_stock(taken).await;
                    return Err(self.late_stock_failure(item).await);
                }
                Err(store_error) => {
                    self.release_stock(taken).await;
                    return Err(store_error.into());
                }
            }
        }
        Ok(())
    }

    /// Builds the error for a line whose reservation failed after it passed
    /// validation, using the stock level as it is now.
    async fn late_stock_failure(&self, item: &OrderItem) -> EcommerceError {
        match self.stores.catalog.get_product(&item.product_id).await {
            Ok(Some(product)) if product.is_active => {
                warn!(
                    product_id = %item.product_id,
                    requested = item.quantity,
                    available = product.stock,
                    "stock ran out while checking out"
                );
                EcommerceError::InsufficientStock {
                    product_id: item.product_id.clone(),
                    requested: item.quantity,
                    available: product.stock,
                }
            }
            Ok(_) => EcommerceError::ProductUnavailable { product_id: item.product_id.clone() },
            Err(store_error) => store_error.into(),
        }
    }

    async fn claim_coupon(&self, code: &CouponCode, items: &[OrderItem]) -> Result<()> {
        match self.stores.coupons.atomic_increment_usage(code).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.release_stock(items).await;
                warn!(code = %code, "coupon usage limit reached while checking out");
                Err(EcommerceError::CouponExhausted { code: code.to_string() })
            }
            Err(store_error) => {
                self.release_stock(items).await;
                Err(store_error.into())
            }
        }
    }

    /// Inserts the order, drawing a new order number on collision.
    async fn persist(&self, order: &mut Order) -> std::result::Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.stores.orders.insert_order(order).await {
                Err(StoreError::Duplicate(key)) if attempt < MAX_INSERT_ATTEMPTS => {
                    warn!(%key, attempt, "order number collision, retrying");
                    order.renumber();
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn release_stock(&self, items: &[OrderItem]) {
        for item in items {
            if let Err(error) = self.stores.catalog.restore_stock(&item.product_id, item.quantity).await {
                error!(product_id = %item.product_id, quantity = item.quantity, %error, "failed to restore stock");
            }
        }
    }

    async fn release_coupon(&self, code: &CouponCode) {
        if let Err(error) = self.stores.coupons.release_usage(code).await {
            error!(code = %code, %error, "failed to release coupon usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Coupon, OrderStatus, PaymentStatus};
    use crate::domain::events::OrderEvent;
    use crate::domain::aggregates::{Cart, Product};
    use crate::domain::value_objects::Quantity;
    use crate::store::{CartStore, CatalogStore, OrderFilter, OrderPage, OrderStore, StoreResult};
    use crate::test::TestContext;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testresult::TestResult;
    use tokio::sync::Barrier;

    fn dec(value: i64, scale: u32) -> Decimal { Decimal::new(value, scale) }

    #[tokio::test]
    async fn single_line_order_has_expected_totals() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("BRK-100", dec(1000, 2), 5).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 2).await?;

        let order = ctx.checkout.checkout(&owner, ctx.request(None)).await?;

        assert_eq!(order.subtotal(), dec(2000, 2));
        assert_eq!(order.shipping_cost(), dec(599, 2));
        assert_eq!(order.discount(), Decimal::ZERO);
        assert_eq!(order.total(), dec(2599, 2));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.user_id(), None);

        let reloaded = ctx.stores.catalog.get_product(&product.id).await?.ok_or("product missing")?;
        assert_eq!(reloaded.stock, 3);
        assert_eq!(reloaded.sold_count, 2);

        let cart = ctx.stores.carts.get_cart(&owner).await?.ok_or("cart should be kept")?;
        assert!(cart.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn order_items_snapshot_product_and_cart_price() -> TestResult {
        let ctx = TestContext::new();
        let mut product = ctx.product("OIL-5W30", dec(3490, 2), 10).await;
        let owner = CartOwner::User("u-42".into());
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        product.price = dec(3990, 2);
        ctx.stores.catalog.insert_product(&product).await?;

        let order = ctx.checkout.checkout(&owner, ctx.request(None)).await?;
        let item = order.items().first().ok_or("missing line")?;
        assert_eq!(item.unit_price, dec(3490, 2));
        assert_eq!(item.product_sku, "OIL-5W30");
        assert_eq!(item.product_image.as_deref(), Some("https://cdn.example.com/OIL-5W30.jpg"));
        assert_eq!(order.user_id(), Some("u-42"));

        product.name = "Renamed oil".into();
        product.price = dec(1, 0);
        ctx.stores.catalog.insert_product(&product).await?;

        let by_id = ctx.stores.orders.find_order(order.id()).await?.ok_or("order missing")?;
        let by_number = ctx.stores.orders.find_order(order.order_number()).await?.ok_or("order missing")?;
        assert_eq!(by_id, by_number);
        assert_eq!(by_id, order);
        assert_eq!(by_id.items()[0].product_name, "Part OIL-5W30");
        Ok(())
    }

    #[tokio::test]
    async fn empty_or_missing_cart_fails() -> TestResult {
        let ctx = TestContext::new();
        let owner = ctx.session();

        let missing = ctx.checkout.checkout(&owner, ctx.request(None)).await;
        assert!(matches!(missing, Err(EcommerceError::EmptyCart)), "got {missing:?}");

        ctx.carts.get_or_create_cart(&owner).await?;
        let empty = ctx.checkout.checkout(&owner, ctx.request(None)).await;
        assert!(matches!(empty, Err(EcommerceError::EmptyCart)), "got {empty:?}");

        let page = ctx.stores.orders.list_orders(&OrderFilter::default()).await?;
        assert_eq!(page.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_stock_changes_nothing() -> TestResult {
        let ctx = TestContext::new();
        let plenty = ctx.product("FLT-1", dec(1500, 2), 10).await;
        let scarce = ctx.product("FLT-2", dec(2500, 2), 3).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &plenty.id, 4).await?;
        ctx.carts.add_item(&owner, &scarce.id, 3).await?;

        let mut drained = ctx.stores.catalog.get_product(&scarce.id).await?.ok_or("product missing")?;
        drained.stock = 1;
        ctx.stores.catalog.insert_product(&drained).await?;

        let result = ctx.checkout.checkout(&owner, ctx.request(None)).await;
        match result {
            Err(EcommerceError::InsufficientStock { product_id, requested, available }) => {
                assert_eq!(product_id, scarce.id);
                assert_eq!((requested, available), (3, 1));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(ctx.stores.catalog.get_product(&plenty.id).await?.map(|p| p.stock), Some(10));
        assert_eq!(ctx.stores.catalog.get_product(&scarce.id).await?.map(|p| p.stock), Some(1));
        let cart = ctx.stores.carts.get_cart(&owner).await?.ok_or("cart missing")?;
        assert_eq!(cart.items().len(), 2);
        assert_eq!(ctx.stores.orders.list_orders(&OrderFilter::default()).await?.total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn deactivated_product_is_unavailable() -> TestResult {
        let ctx = TestContext::new();
        let mut product = ctx.product("LMP-7", dec(799, 2), 4).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        product.deactivate();
        ctx.stores.catalog.insert_product(&product).await?;

        let result = ctx.checkout.checkout(&owner, ctx.request(None)).await;
        assert!(
            matches!(&result, Err(EcommerceError::ProductUnavailable { product_id }) if *product_id == product.id),
            "got {result:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn percentage_coupon_is_applied_and_counted() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("TYR-16", dec(5000, 2), 8).await;
        ctx.coupon(Coupon::percentage(CouponCode::new("SPRING10")?, dec(10, 0)).with_max_uses(5)).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 2).await?;

        let order = ctx.checkout.checkout(&owner, ctx.request(Some("spring10"))).await?;

        assert_eq!(order.subtotal(), dec(10000, 2));
        assert_eq!(order.shipping_cost(), dec(599, 2));
        assert_eq!(order.discount(), dec(1000, 2));
        assert_eq!(order.discount_code(), Some("SPRING10"));
        assert_eq!(order.total(), order.subtotal() + order.shipping_cost() - order.discount());

        let coupon = ctx.stores.coupons.find_coupon(&CouponCode::new("SPRING10")?).await?.ok_or("coupon missing")?;
        assert_eq!(coupon.used_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_coupon_fails_without_side_effects() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("WPR-1", dec(1200, 2), 2).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        let result = ctx.checkout.checkout(&owner, ctx.request(Some("nope"))).await;
        assert!(matches!(&result, Err(EcommerceError::InvalidCoupon { code }) if code == "NOPE"), "got {result:?}");
        assert_eq!(ctx.stores.catalog.get_product(&product.id).await?.map(|p| p.stock), Some(2));
        assert!(!ctx.stores.carts.get_cart(&owner).await?.ok_or("cart missing")?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn coupon_minimum_not_met() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("CAP-1", dec(1500, 2), 2).await;
        ctx.coupon(Coupon::fixed(CouponCode::new("TWENTY")?, dec(20, 0)).with_min_order_value(dec(50, 0))).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        let result = ctx.checkout.checkout(&owner, ctx.request(Some("TWENTY"))).await;
        assert!(
            matches!(&result, Err(EcommerceError::CouponMinimumNotMet { minimum, .. }) if *minimum == dec(50, 0)),
            "got {result:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_coupon_is_rejected() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("CAP-2", dec(1500, 2), 2).await;
        let mut coupon = Coupon::fixed(CouponCode::new("ONCE")?, dec(5, 0)).with_max_uses(1);
        coupon.used_count = 1;
        ctx.coupon(coupon).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        let result = ctx.checkout.checkout(&owner, ctx.request(Some("once"))).await;
        assert!(matches!(result, Err(EcommerceError::CouponExhausted { .. })), "got {result:?}");
        Ok(())
    }

    #[tokio::test]
    async fn free_shipping_from_threshold() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("BAT-60", dec(12000, 2), 1).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        let order = ctx.checkout.checkout(&owner, ctx.request(None)).await?;
        assert_eq!(order.shipping_cost(), Decimal::ZERO);
        assert_eq!(order.total(), dec(12000, 2));
        Ok(())
    }

    #[tokio::test]
    async fn created_event_is_published() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("HRN-2", dec(2500, 2), 1).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        let order = ctx.checkout.checkout(&owner, ctx.request(None)).await?;
        let events = ctx.events.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], OrderEvent::Created { order_number, .. } if order_number == order.order_number()));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_unit_goes_to_exactly_one_checkout() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("RAR-1", dec(9900, 2), 1).await;
        let first = ctx.session();
        let second = ctx.session();
        ctx.carts.add_item(&first, &product.id, 1).await?;
        ctx.carts.add_item(&second, &product.id, 1).await?;

        let a = tokio::spawn({
            let engine = ctx.checkout.clone();
            let request = ctx.request(None);
            async move { engine.checkout(&first, request).await }
        });
        let b = tokio::spawn({
            let engine = ctx.checkout.clone();
            let request = ctx.request(None);
            async move { engine.checkout(&second, request).await }
        });
        let results = [a.await?, b.await?];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let stock_failures = results
            .iter()
            .filter(|r| matches!(r, Err(EcommerceError::InsufficientStock { .. })))
            .count();
        assert_eq!((successes, stock_failures), (1, 1), "results: {results:?}");

        let reloaded = ctx.stores.catalog.get_product(&product.id).await?.ok_or("product missing")?;
        assert_eq!((reloaded.stock, reloaded.sold_count), (0, 1));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capped_coupon_is_never_overused() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("KIT-9", dec(4000, 2), 50).await;
        ctx.coupon(Coupon::fixed(CouponCode::new("FIRST3")?, dec(5, 0)).with_max_uses(3)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let owner = ctx.session();
            ctx.carts.add_item(&owner, &product.id, 1).await?;
            let engine = ctx.checkout.clone();
            let request = ctx.request(Some("first3"));
            handles.push(tokio::spawn(async move { engine.checkout(&owner, request).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await? {
                Ok(_) => successes += 1,
                Err(EcommerceError::CouponExhausted { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }
        assert_eq!(successes, 3);

        let coupon = ctx.stores.coupons.find_coupon(&CouponCode::new("FIRST3")?).await?.ok_or("coupon missing")?;
        assert_eq!(coupon.used_count, 3);
        let reloaded = ctx.stores.catalog.get_product(&product.id).await?.ok_or("product missing")?;
        assert_eq!(reloaded.stock, 47);
        Ok(())
    }

    /// Order store that refuses every insert.
    struct BrokenOrders;

    #[async_trait]
    impl OrderStore for BrokenOrders {
        async fn insert_order(&self, _order: &Order) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn find_order(&self, _id_or_number: &str) -> StoreResult<Option<Order>> { Ok(None) }
        async fn list_orders_for_user(&self, _user_id: &str, _limit: u32) -> StoreResult<Vec<Order>> { Ok(vec![]) }
        async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<OrderPage> {
            Ok(OrderPage::new(vec![], 0, filter))
        }
        async fn update_status(
            &self,
            _id: &str,
            _expected: OrderStatus,
            _next: OrderStatus,
            _tracking_number: Option<&str>,
        ) -> StoreResult<bool> {
            Ok(false)
        }
        async fn update_payment_status(&self, _id: &str, _expected: PaymentStatus, _next: PaymentStatus) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failed_insert_releases_reservations() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("SPK-4", dec(900, 2), 6).await;
        ctx.coupon(Coupon::fixed(CouponCode::new("FIVE")?, dec(5, 0)).with_max_uses(1)).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 4).await?;

        let mut stores = ctx.stores.clone();
        stores.orders = Arc::new(BrokenOrders);
        let engine = CheckoutEngine::new(stores, ShippingPolicy::default(), ctx.payments.clone(), ctx.events.clone());

        let result = engine.checkout(&owner, ctx.request(Some("five"))).await;
        match result {
            Err(error) => assert!(!error.is_business(), "expected a storage error, got {error:?}"),
            Ok(order) => panic!("order {} should not exist", order.order_number()),
        }

        assert_eq!(ctx.stores.catalog.get_product(&product.id).await?.map(|p| p.stock), Some(6));
        let coupon = ctx.stores.coupons.find_coupon(&CouponCode::new("FIVE")?).await?.ok_or("coupon missing")?;
        assert_eq!(coupon.used_count, 0);
        assert_eq!(ctx.stores.carts.get_cart(&owner).await?.map(|c| c.items().len()), Some(1));
        assert!(ctx.events.events().is_empty());
        Ok(())
    }

    enum ReadHook {
        /// The first two reads wait for each other.
        Lockstep(Barrier),
        /// The first read is followed by another add to the same cart.
        AddLine(CartItem),
    }

    /// Cart store that interleaves a concurrent caller with the checkout's
    /// read of the cart.
    struct HookedCarts {
        inner: Arc<dyn CartStore>,
        hook: ReadHook,
        reads: AtomicUsize,
    }

    impl HookedCarts {
        fn new(inner: Arc<dyn CartStore>, hook: ReadHook) -> Self { Self { inner, hook, reads: AtomicUsize::new(0) } }
    }

    #[async_trait]
    impl CartStore for HookedCarts {
        async fn get_cart(&self, owner: &CartOwner) -> StoreResult<Option<Cart>> {
            let cart = self.inner.get_cart(owner).await?;
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            match (&self.hook, &cart) {
                (ReadHook::Lockstep(barrier), _) if read < 2 => {
                    barrier.wait().await;
                }
                (ReadHook::AddLine(item), Some(cart)) if read == 0 => {
                    self.inner.add_line(&cart.id, item).await?;
                }
                _ => {}
            }
            Ok(cart)
        }
        async fn create_cart(&self, cart: &Cart) -> StoreResult<Cart> { self.inner.create_cart(cart).await }
        async fn add_line(&self, cart_id: &str, item: &CartItem) -> StoreResult<bool> { self.inner.add_line(cart_id, item).await }
        async fn set_line_quantity(&self, cart_id: &str, product_id: &str, quantity: Quantity) -> StoreResult<bool> {
            self.inner.set_line_quantity(cart_id, product_id, quantity).await
        }
        async fn remove_line(&self, cart_id: &str, product_id: &str) -> StoreResult<bool> {
            self.inner.remove_line(cart_id, product_id).await
        }
        async fn clear_cart(&self, cart_id: &str) -> StoreResult<()> { self.inner.clear_cart(cart_id).await }
        async fn take_items(&self, cart_id: &str, expected: &[CartItem]) -> StoreResult<bool> {
            self.inner.take_items(cart_id, expected).await
        }
        async fn restore_items(&self, cart_id: &str, items: &[CartItem]) -> StoreResult<()> {
            self.inner.restore_items(cart_id, items).await
        }
    }

    fn engine_with(ctx: &TestContext, stores: Stores) -> CheckoutEngine {
        CheckoutEngine::new(stores, ShippingPolicy::default(), ctx.payments.clone(), ctx.events.clone())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resubmitted_cart_yields_one_order() -> TestResult {
        let ctx = TestContext::new();
        let product = ctx.product("ALT-3", dec(15000, 2), 10).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &product.id, 1).await?;

        let mut stores = ctx.stores.clone();
        stores.carts = Arc::new(HookedCarts::new(ctx.stores.carts.clone(), ReadHook::Lockstep(Barrier::new(2))));
        let engine = engine_with(&ctx, stores);

        let a = tokio::spawn({
            let (engine, owner, request) = (engine.clone(), owner.clone(), ctx.request(None));
            async move { engine.checkout(&owner, request).await }
        });
        let b = tokio::spawn({
            let (engine, owner, request) = (engine.clone(), owner.clone(), ctx.request(None));
            async move { engine.checkout(&owner, request).await }
        });
        let results = [a.await?, b.await?];

        let placed = results.iter().filter(|r| r.is_ok()).count();
        let emptied = results.iter().filter(|r| matches!(r, Err(EcommerceError::EmptyCart))).count();
        assert_eq!((placed, emptied), (1, 1), "results: {results:?}");

        assert_eq!(ctx.stores.orders.list_orders(&OrderFilter::default()).await?.total, 1);
        let reloaded = ctx.stores.catalog.get_product(&product.id).await?.ok_or("product missing")?;
        assert_eq!((reloaded.stock, reloaded.sold_count), (9, 1));
        assert!(ctx.stores.carts.get_cart(&owner).await?.ok_or("cart missing")?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn line_added_during_checkout_is_kept() -> TestResult {
        let ctx = TestContext::new();
        let wipers = ctx.product("WIP-1", dec(1800, 2), 5).await;
        let bulbs = ctx.product("BLB-2", dec(650, 2), 5).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &wipers.id, 2).await?;

        let late = CartItem::new(bulbs.id.as_str(), Quantity::new(1)?, bulbs.price);
        let mut stores = ctx.stores.clone();
        stores.carts = Arc::new(HookedCarts::new(ctx.stores.carts.clone(), ReadHook::AddLine(late)));

        let result = engine_with(&ctx, stores).checkout(&owner, ctx.request(None)).await;
        assert!(matches!(result, Err(EcommerceError::Conflict(_))), "got {result:?}");

        let cart = ctx.stores.carts.get_cart(&owner).await?.ok_or("cart missing")?;
        assert_eq!(cart.line(&wipers.id).map(|l| l.quantity.value()), Some(2));
        assert_eq!(cart.line(&bulbs.id).map(|l| l.quantity.value()), Some(1));
        assert_eq!(ctx.stores.catalog.get_product(&wipers.id).await?.map(|p| p.stock), Some(5));
        assert_eq!(ctx.stores.orders.list_orders(&OrderFilter::default()).await?.total, 0);

        let order = ctx.checkout.checkout(&owner, ctx.request(None)).await?;
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.subtotal(), dec(4250, 2));
        Ok(())
    }

    /// Catalog that sells off one product's stock right before the checkout
    /// reserves it.
    struct DrainingCatalog {
        inner: Arc<dyn CatalogStore>,
        product_id: String,
        left: u32,
    }

    #[async_trait]
    impl CatalogStore for DrainingCatalog {
        async fn get_product(&self, id: &str) -> StoreResult<Option<Product>> { self.inner.get_product(id).await }
        async fn atomic_decrement_stock(&self, id: &str, quantity: u32) -> StoreResult<bool> {
            if id == self.product_id {
                if let Some(mut product) = self.inner.get_product(id).await? {
                    product.stock = self.left;
                    self.inner.insert_product(&product).await?;
                }
            }
            self.inner.atomic_decrement_stock(id, quantity).await
        }
        async fn restore_stock(&self, id: &str, quantity: u32) -> StoreResult<()> { self.inner.restore_stock(id, quantity).await }
        async fn increment_sold_count(&self, id: &str, quantity: u32) -> StoreResult<()> {
            self.inner.increment_sold_count(id, quantity).await
        }
        async fn insert_product(&self, product: &Product) -> StoreResult<()> { self.inner.insert_product(product).await }
    }

    #[tokio::test]
    async fn late_stock_failure_returns_earlier_lines() -> TestResult {
        let ctx = TestContext::new();
        let plenty = ctx.product("RTR-1", dec(4500, 2), 10).await;
        let scarce = ctx.product("RTR-2", dec(5200, 2), 5).await;
        ctx.coupon(Coupon::fixed(CouponCode::new("TEN")?, dec(10, 0)).with_max_uses(2)).await;
        let owner = ctx.session();
        ctx.carts.add_item(&owner, &plenty.id, 4).await?;
        ctx.carts.add_item(&owner, &scarce.id, 3).await?;

        let mut stores = ctx.stores.clone();
        stores.catalog = Arc::new(DrainingCatalog { inner: ctx.stores.catalog.clone(), product_id: scarce.id.clone(), left: 1 });

        let result = engine_with(&ctx, stores).checkout(&owner, ctx.request(Some("ten"))).await;
        match result {
            Err(EcommerceError::InsufficientStock { product_id, requested, available }) => {
                assert_eq!(product_id, scarce.id);
                assert_eq!((requested, available), (3, 1));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(ctx.stores.catalog.get_product(&plenty.id).await?.map(|p| p.stock), Some(10));
        assert_eq!(ctx.stores.catalog.get_product(&scarce.id).await?.map(|p| p.stock), Some(1));
        let coupon = ctx.stores.coupons.find_coupon(&CouponCode::new("TEN")?).await?.ok_or("coupon missing")?;
        assert_eq!(coupon.used_count, 0);
        let cart = ctx.stores.carts.get_cart(&owner).await?.ok_or("cart missing")?;
        assert_eq!(cart.line(&plenty.id).map(|l| l.quantity.value()), Some(4));
        assert_eq!(cart.line(&scarce.id).map(|l| l.quantity.value()), Some(3));
        assert_eq!(ctx.stores.orders.list_orders(&OrderFilter::default()).await?.total, 0);
        assert!(ctx.events.events().is_empty());
        Ok(())
    }
}

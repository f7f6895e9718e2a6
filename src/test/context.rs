//! Test context wiring every service to one in-memory store.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        aggregates::{order::tests::shipping_info, CartOwner, Coupon, Product},
        pricing::ShippingPolicy,
        value_objects::Sku,
    },
    services::{
        cart::CartService,
        checkout::{CheckoutEngine, CheckoutRequest},
        events::RecordingPublisher,
        orders::OrderService,
        payment::{MockPaymentGateway, PaymentGateway},
    },
    store::Stores,
};

pub(crate) struct TestContext {
    pub stores: Stores,
    pub events: Arc<RecordingPublisher>,
    pub payments: Arc<dyn PaymentGateway>,
    pub checkout: CheckoutEngine,
    pub carts: CartService,
    pub orders: OrderService,
}

impl TestContext {
    pub fn new() -> Self {
        let stores = Stores::in_memory();
        let events = Arc::new(RecordingPublisher::default());
        let payments: Arc<dyn PaymentGateway> = Arc::new(MockPaymentGateway::new(["card"]));
        let shipping = ShippingPolicy::default();

        Self {
            checkout: CheckoutEngine::new(stores.clone(), shipping, payments.clone(), events.clone()),
            carts: CartService::new(stores.clone(), shipping),
            orders: OrderService::new(stores.orders.clone(), events.clone()),
            stores,
            events,
            payments,
        }
    }

    /// Seeds an active product named after its SKU.
    pub async fn product(&self, sku: &str, price: Decimal, stock: u32) -> Product {
        let product = Product::create(Sku::new(sku).expect("valid sku"), format!("Part {sku}"), price, stock)
            .expect("valid product")
            .with_image(format!("https://cdn.example.com/{sku}.jpg"));
        self.stores.catalog.insert_product(&product).await.expect("Failed to seed product");
        product
    }

    pub async fn coupon(&self, coupon: Coupon) {
        self.stores.coupons.insert_coupon(&coupon).await.expect("Failed to seed coupon");
    }

    /// A fresh anonymous cart owner.
    pub fn session(&self) -> CartOwner { CartOwner::Session(Uuid::new_v4().to_string()) }

    pub fn request(&self, coupon_code: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            shipping_info: shipping_info(),
            billing_same_as_shipping: true,
            billing_address: None,
            payment_method: "invoice".into(),
            coupon_code: coupon_code.map(str::to_string),
            notes: None,
        }
    }
}

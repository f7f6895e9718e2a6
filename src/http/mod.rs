//! HTTP surface: routes, shared state and request extractors.

pub mod auth;
mod cart;
pub mod error;
mod json;
mod orders;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::TokenVerifier;
use crate::domain::pricing::ShippingPolicy;
use crate::services::{CartService, CheckoutEngine, EventPublisher, OrderService, PaymentGateway};
use crate::store::Stores;

pub const SERVICE_NAME: &str = "carvatoo-checkout";

#[derive(Clone)]
pub struct AppState {
    pub checkout: CheckoutEngine,
    pub carts: CartService,
    pub orders: OrderService,
    pub tokens: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        shipping: ShippingPolicy,
        payments: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventPublisher>,
        tokens: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            checkout: CheckoutEngine::new(stores.clone(), shipping, payments, events.clone()),
            carts: CartService::new(stores.clone(), shipping),
            orders: OrderService::new(stores.orders, events),
            tokens,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/:product_id", put(cart::update_item).delete(cart::remove_item))
        .route("/cart/coupon", post(cart::apply_coupon))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", put(orders::update_status))
        .route("/orders/:id/payment", put(orders::update_payment_status))
        .route("/me/orders", get(orders::my_orders));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}

async fn health() -> Json<Value> { Json(json!({ "status": "healthy", "service": SERVICE_NAME })) }

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use super::auth::{cart_owner, MaybePrincipal, SessionId};
use super::json::JsonBody;
use super::AppState;
use crate::domain::aggregates::{Address, Order, ShippingInfo};
use crate::error::{EcommerceError, Result};
use crate::services::{CheckoutRequest, OrderQuery};
use crate::store::OrderPage;

fn yes() -> bool { true }

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate]
    pub shipping_info: ShippingInfo,
    #[serde(default = "yes")]
    pub billing_same_as_shipping: bool,
    pub billing_address: Option<Address>,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
    pub coupon_code: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl CreateOrderRequest {
    fn into_checkout(self) -> Result<CheckoutRequest> {
        self.validate()?;
        let billing_address = match (self.billing_same_as_shipping, self.billing_address) {
            (true, _) => None,
            (false, Some(address)) => {
                address.validate()?;
                Some(address)
            }
            (false, None) => {
                return Err(EcommerceError::Validation("billing_address is required when it differs from shipping".into()))
            }
        };
        Ok(CheckoutRequest {
            shipping_info: self.shipping_info,
            billing_same_as_shipping: self.billing_same_as_shipping,
            billing_address,
            payment_method: self.payment_method,
            coupon_code: self.coupon_code,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentUpdate {
    pub payment_status: String,
}

pub async fn create_order(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    session: SessionId,
    JsonBody(r): JsonBody<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let request = r.into_checkout()?;
    let owner = cart_owner(&principal, &session).ok_or(EcommerceError::EmptyCart)?;
    let order = s.checkout.checkout(&owner, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(State(s): State<AppState>, principal: MaybePrincipal, Path(id): Path<String>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get_order(principal.principal(), &id).await?))
}

pub async fn my_orders(State(s): State<AppState>, principal: MaybePrincipal) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.my_orders(principal.principal()).await?))
}

pub async fn list_orders(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    Query(query): Query<OrderQuery>,
) -> Result<Json<OrderPage>> {
    Ok(Json(s.orders.list_orders(principal.principal(), query).await?))
}

pub async fn update_status(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    Path(id): Path<String>,
    JsonBody(r): JsonBody<StatusUpdate>,
) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_status(principal.principal(), &id, &r.status, r.tracking_number).await?))
}

pub async fn update_payment_status(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    Path(id): Path<String>,
    JsonBody(r): JsonBody<PaymentUpdate>,
) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_payment_status(principal.principal(), &id, &r.payment_status).await?))
}

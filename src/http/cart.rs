use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::auth::{cart_owner, MaybePrincipal, SessionId};
use super::json::JsonBody;
use super::AppState;
use crate::domain::aggregates::CartOwner;
use crate::error::{EcommerceError, Result};
use crate::services::{CartView, CouponPreview};

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[validate(length(min = 1, max = 100))]
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CouponRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
}

/// The session id is echoed back so a guest client can keep using the cart.
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub session_id: Option<String>,
    pub cart: CartView,
}

pub async fn get_cart(State(s): State<AppState>, principal: MaybePrincipal, session: SessionId) -> Result<Json<CartView>> {
    match cart_owner(&principal, &session) {
        Some(owner) => Ok(Json(s.carts.view(&owner).await?)),
        None => Ok(Json(CartView::empty())),
    }
}

/// Guests without a session id get a new one.
pub async fn add_item(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    session: SessionId,
    JsonBody(r): JsonBody<AddItemRequest>,
) -> Result<Json<CartResponse>> {
    r.validate()?;
    let owner = cart_owner(&principal, &session).unwrap_or_else(|| CartOwner::Session(Uuid::new_v4().to_string()));

    s.carts.add_item(&owner, r.product_id.trim(), r.quantity).await?;
    respond(&s, owner).await
}

pub async fn update_item(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    session: SessionId,
    Path(product_id): Path<String>,
    JsonBody(r): JsonBody<UpdateItemRequest>,
) -> Result<Json<CartResponse>> {
    let owner = require_owner(&principal, &session)?;
    s.carts.update_item_qty(&owner, &product_id, r.quantity).await?;
    respond(&s, owner).await
}

pub async fn remove_item(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    session: SessionId,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>> {
    let owner = require_owner(&principal, &session)?;
    s.carts.remove_item(&owner, &product_id).await?;
    respond(&s, owner).await
}

pub async fn clear_cart(State(s): State<AppState>, principal: MaybePrincipal, session: SessionId) -> Result<StatusCode> {
    if let Some(owner) = cart_owner(&principal, &session) {
        s.carts.clear(&owner).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn apply_coupon(
    State(s): State<AppState>,
    principal: MaybePrincipal,
    session: SessionId,
    JsonBody(r): JsonBody<CouponRequest>,
) -> Result<Json<CouponPreview>> {
    r.validate()?;
    let owner = cart_owner(&principal, &session).ok_or(EcommerceError::EmptyCart)?;
    Ok(Json(s.carts.apply_coupon_preview(&owner, &r.code).await?))
}

fn require_owner(principal: &MaybePrincipal, session: &SessionId) -> Result<CartOwner> {
    cart_owner(principal, session)
        .ok_or_else(|| EcommerceError::Validation("an X-Session-ID header or a bearer token is required".into()))
}

async fn respond(s: &AppState, owner: CartOwner) -> Result<Json<CartResponse>> {
    let cart = s.carts.view(&owner).await?;
    let session_id = match owner {
        CartOwner::Session(id) => Some(id),
        CartOwner::User(_) => None,
    };
    Ok(Json(CartResponse { session_id, cart }))
}

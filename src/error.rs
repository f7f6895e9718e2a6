//! Error taxonomy shared by the cart, checkout and order services.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::aggregates::{CouponRejection, OrderError};
use crate::domain::value_objects::CouponCode;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("product {product_id} is no longer available")]
    ProductUnavailable { product_id: String },

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: String, requested: u32, available: u32 },

    #[error("coupon {code} is not valid")]
    InvalidCoupon { code: String },

    #[error("coupon {code} requires a minimum order value of {minimum}, subtotal is {subtotal}")]
    CouponMinimumNotMet { code: String, minimum: Decimal, subtotal: Decimal },

    #[error("coupon {code} has reached its usage limit")]
    CouponExhausted { code: String },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("authentication required")]
    Unauthorized,

    #[error("access denied")]
    Forbidden,

    #[error("order {0} was modified concurrently")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EcommerceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Maps a coupon rule violation to the error reported at checkout.
    pub(crate) fn from_coupon_rejection(code: &CouponCode, reason: CouponRejection, subtotal: Decimal) -> Self {
        let code = code.to_string();
        match reason {
            CouponRejection::Inactive | CouponRejection::NotYetValid | CouponRejection::Expired => {
                Self::InvalidCoupon { code }
            }
            CouponRejection::Exhausted => Self::CouponExhausted { code },
            CouponRejection::MinimumNotMet { minimum } => Self::CouponMinimumNotMet { code, minimum, subtotal },
        }
    }

    /// `true` for errors the caller can fix by changing the request, `false`
    /// for storage failures that are worth retrying later.
    pub fn is_business(&self) -> bool { !matches!(self, Self::Store(_)) }

    /// Short machine-readable name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyCart => "empty_cart",
            Self::ProductUnavailable { .. } => "product_unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidCoupon { .. } => "invalid_coupon",
            Self::CouponMinimumNotMet { .. } => "coupon_minimum_not_met",
            Self::CouponExhausted { .. } => "coupon_exhausted",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "storage",
        }
    }
}

impl From<OrderError> for EcommerceError {
    fn from(error: OrderError) -> Self {
        match error {
            OrderError::InvalidStatus(status) => Self::InvalidStatus(status),
            OrderError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
        }
    }
}

impl From<validator::ValidationErrors> for EcommerceError {
    fn from(errors: validator::ValidationErrors) -> Self { Self::Validation(errors.to_string()) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;

//! Maps service errors onto HTTP responses.
//!
//! Bodies are `{"error": kind, "message": text}` plus a `context` object for
//! errors that carry structured detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::EcommerceError;
use crate::store::StoreError;

impl EcommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::ProductUnavailable { .. }
            | Self::InvalidCoupon { .. }
            | Self::CouponMinimumNotMet { .. }
            | Self::CouponExhausted { .. }
            | Self::InvalidStatus(_)
            | Self::InvalidQuantity(_)
            | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } | Self::InvalidTransition { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn context(&self) -> Option<Value> {
        match self {
            Self::ProductUnavailable { product_id } => Some(json!({ "product_id": product_id })),
            Self::InsufficientStock { product_id, requested, available } => {
                Some(json!({ "product_id": product_id, "requested": requested, "available": available }))
            }
            Self::InvalidCoupon { code } | Self::CouponExhausted { code } => Some(json!({ "code": code })),
            Self::CouponMinimumNotMet { code, minimum, subtotal } => {
                Some(json!({ "code": code, "minimum": minimum, "subtotal": subtotal }))
            }
            Self::InvalidTransition { from, to } => Some(json!({ "from": from, "to": to })),
            _ => None,
        }
    }
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Storage details stay in the logs.
        let message = if self.is_business() {
            self.to_string()
        } else {
            tracing::error!(error = ?self, "request failed");
            "internal storage error".to_string()
        };

        let mut body = json!({ "error": self.kind(), "message": message });
        if let (Some(context), Some(object)) = (self.context(), body.as_object_mut()) {
            object.insert("context".into(), context);
        }
        (status, Json(body)).into_response()
    }
}

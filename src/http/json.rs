//! JSON body extractor whose rejections use the service error body.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;

use crate::error::EcommerceError;

/// `axum::Json`, but a missing, malformed or mistyped body is reported as a
/// `validation` error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(EcommerceError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for EcommerceError {
    fn from(rejection: JsonRejection) -> Self { Self::Validation(rejection.body_text()) }
}

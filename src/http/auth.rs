//! Request extractors for the caller's identity and guest session.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::convert::Infallible;

use super::AppState;
use crate::auth::Principal;
use crate::domain::aggregates::CartOwner;
use crate::error::EcommerceError;

pub const SESSION_HEADER: &str = "x-session-id";

/// The authenticated caller, if any. A bearer token that does not verify is
/// rejected rather than treated as anonymous.
#[derive(Clone, Debug)]
pub struct MaybePrincipal(pub Option<Principal>);

impl MaybePrincipal {
    pub fn principal(&self) -> Option<&Principal> { self.0.as_ref() }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybePrincipal {
    type Rejection = EcommerceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Self(None));
        };
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(EcommerceError::Unauthorized)?;

        state.tokens.verify(token).map(|principal| Self(Some(principal))).ok_or(EcommerceError::Unauthorized)
    }
}

/// Value of the `X-Session-ID` header.
#[derive(Clone, Debug)]
pub struct SessionId(pub Option<String>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(Self(session))
    }
}

/// A signed-in caller owns a user cart; otherwise the session header decides.
pub fn cart_owner(principal: &MaybePrincipal, session: &SessionId) -> Option<CartOwner> {
    match (&principal.0, &session.0) {
        (Some(principal), _) => Some(CartOwner::User(principal.user_id.clone())),
        (None, Some(session)) => Some(CartOwner::Session(session.clone())),
        (None, None) => None,
    }
}

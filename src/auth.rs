//! Caller identity. Tokens are issued elsewhere; this module only resolves a
//! bearer token to a principal.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{EcommerceError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn customer(user_id: impl Into<String>) -> Self { Self { user_id: user_id.into(), role: Role::Customer } }
    pub fn admin(user_id: impl Into<String>) -> Self { Self { user_id: user_id.into(), role: Role::Admin } }

    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

/// Fails with `Unauthorized` without a principal and `Forbidden` for non-admins.
pub fn require_admin(principal: Option<&Principal>) -> Result<&Principal> {
    match principal {
        None => Err(EcommerceError::Unauthorized),
        Some(p) if p.is_admin() => Ok(p),
        Some(_) => Err(EcommerceError::Forbidden),
    }
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Principal>;
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: impl IntoIterator<Item = (String, Principal)>) -> Self {
        Self { tokens: tokens.into_iter().collect() }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<Principal> { self.tokens.get(token).cloned() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_admin() {
        assert!(matches!(require_admin(None), Err(EcommerceError::Unauthorized)));
        assert!(matches!(require_admin(Some(&Principal::customer("u-1"))), Err(EcommerceError::Forbidden)));
        assert!(require_admin(Some(&Principal::admin("a-1"))).is_ok());
    }

    #[test]
    fn test_static_tokens() {
        let verifier = StaticTokenVerifier::new([("secret".to_string(), Principal::admin("a-1"))]);
        assert_eq!(verifier.verify("secret"), Some(Principal::admin("a-1")));
        assert_eq!(verifier.verify("guess"), None);
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
    }
}

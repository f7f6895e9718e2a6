//! Runtime configuration read from the environment.
//!
//! A `.env` file is loaded first when present. Every setting has a default
//! except the optional backends: without `DATABASE_URL` the service keeps
//! its data in memory, and without `NATS_URL` events are dropped.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::auth::{Principal, Role};
use crate::domain::pricing::ShippingPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub shipping: ShippingPolicy,
    /// Payment methods whose orders start out paid.
    pub instant_payment_methods: Vec<String>,
    pub api_tokens: Vec<(String, Principal)>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ShippingPolicy::default();

        Ok(Self {
            port: parse_or(var("PORT"), "PORT", 8083)?,
            database_url: var("DATABASE_URL"),
            database_max_connections: parse_or(var("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: var("NATS_URL"),
            shipping: ShippingPolicy {
                free_threshold: money_or(var("FREE_SHIPPING_THRESHOLD"), "FREE_SHIPPING_THRESHOLD", defaults.free_threshold)?,
                flat_fee: money_or(var("SHIPPING_FLAT_FEE"), "SHIPPING_FLAT_FEE", defaults.flat_fee)?,
            },
            instant_payment_methods: var("INSTANT_PAYMENT_METHODS")
                .map(|v| split_list(&v).map(str::to_string).collect())
                .unwrap_or_default(),
            api_tokens: var("API_TOKENS").map(|v| parse_tokens(&v)).transpose()?.unwrap_or_default(),
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn money_or(value: Option<String>, key: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    let amount: Decimal = parse_or(value.clone(), key, default)?;
    if amount.is_sign_negative() {
        return Err(ConfigError::Invalid { key, value: value.unwrap_or_default() });
    }
    Ok(amount)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parses `token=user_id[:role]` entries separated by commas.
fn parse_tokens(value: &str) -> Result<Vec<(String, Principal)>, ConfigError> {
    let invalid = |entry: &str| ConfigError::Invalid { key: "API_TOKENS", value: entry.to_string() };

    split_list(value)
        .map(|entry| {
            let (token, identity) = entry.split_once('=').ok_or_else(|| invalid(entry))?;
            let (user_id, role) = match identity.split_once(':') {
                Some((user_id, role)) => (user_id, role.parse::<Role>().map_err(|_| invalid(entry))?),
                None => (identity, Role::Customer),
            };
            if token.trim().is_empty() || user_id.trim().is_empty() {
                return Err(invalid(entry));
            }
            Ok((token.trim().to_string(), Principal { user_id: user_id.trim().to_string(), role }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.shipping, ShippingPolicy::default());
        assert!(config.instant_payment_methods.is_empty());
        assert!(config.api_tokens.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/checkout"),
            ("FREE_SHIPPING_THRESHOLD", "99.90"),
            ("SHIPPING_FLAT_FEE", "4.50"),
            ("INSTANT_PAYMENT_METHODS", "card, paypal,"),
            ("API_TOKENS", "abc=u-1, root=admin-1:admin"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/checkout"));
        assert_eq!(config.shipping.free_threshold, Decimal::new(9990, 2));
        assert_eq!(config.shipping.flat_fee, Decimal::new(450, 2));
        assert_eq!(config.instant_payment_methods, vec!["card", "paypal"]);
        assert_eq!(config.api_tokens[0], ("abc".to_string(), Principal::customer("u-1")));
        assert_eq!(config.api_tokens[1], ("root".to_string(), Principal::admin("admin-1")));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("PORT", "  "), ("NATS_URL", "")]).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.nats_url, None);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(load(&[("PORT", "http")]).err(), Some(ConfigError::Invalid { key: "PORT", value: "http".into() }));
        assert!(matches!(load(&[("SHIPPING_FLAT_FEE", "-1")]), Err(ConfigError::Invalid { key: "SHIPPING_FLAT_FEE", .. })));
        assert!(matches!(load(&[("API_TOKENS", "no-separator")]), Err(ConfigError::Invalid { key: "API_TOKENS", .. })));
        assert!(matches!(load(&[("API_TOKENS", "t=u:root")]), Err(ConfigError::Invalid { key: "API_TOKENS", .. })));
    }
}

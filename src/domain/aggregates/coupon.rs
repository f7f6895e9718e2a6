//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::value_objects::{round_money, CouponCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponType {
    Percentage,
    Fixed,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Percentage => "percentage", Self::Fixed => "fixed" }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    pub code: CouponCode,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: Decimal,
    pub min_order_value: Decimal,
    pub max_uses: Option<u32>,
    pub used_count: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Why a coupon cannot be applied to a given subtotal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CouponRejection {
    Inactive,
    NotYetValid,
    Expired,
    Exhausted,
    MinimumNotMet { minimum: Decimal },
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "coupon is inactive"),
            Self::NotYetValid => write!(f, "coupon is not valid yet"),
            Self::Expired => write!(f, "coupon has expired"),
            Self::Exhausted => write!(f, "coupon usage limit reached"),
            Self::MinimumNotMet { minimum } => write!(f, "minimum order value of {minimum} not reached"),
        }
    }
}

/// Outcome of checking a coupon against a subtotal at a point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouponEvaluation {
    pub valid: bool,
    pub discount: Decimal,
    pub reason: Option<CouponRejection>,
}

impl CouponEvaluation {
    fn rejected(reason: CouponRejection) -> Self {
        Self { valid: false, discount: Decimal::ZERO, reason: Some(reason) }
    }
}

impl Coupon {
    pub fn new(code: CouponCode, kind: CouponType, value: Decimal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(), code, kind, value,
            min_order_value: Decimal::ZERO, max_uses: None, used_count: 0,
            valid_from: Utc::now(), valid_until: None, is_active: true,
        }
    }

    pub fn percentage(code: CouponCode, percent: Decimal) -> Self { Self::new(code, CouponType::Percentage, percent) }
    pub fn fixed(code: CouponCode, amount: Decimal) -> Self { Self::new(code, CouponType::Fixed, amount) }

    pub fn with_min_order_value(mut self, minimum: Decimal) -> Self { self.min_order_value = minimum; self }
    pub fn with_max_uses(mut self, max_uses: u32) -> Self { self.max_uses = Some(max_uses); self }
    pub fn with_validity(mut self, from: DateTime<Utc>, until: Option<DateTime<Utc>>) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn is_exhausted(&self) -> bool { self.max_uses.is_some_and(|max| self.used_count >= max) }

    /// Active, inside its validity window and below its usage cap.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool { self.availability(now).is_none() }

    /// Discount for `subtotal`, rounded to cents and never larger than the subtotal.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.kind {
            CouponType::Percentage => subtotal * self.value / Decimal::ONE_HUNDRED,
            CouponType::Fixed => self.value,
        };
        round_money(raw).clamp(Decimal::ZERO, subtotal.max(Decimal::ZERO))
    }

    pub fn evaluate(&self, subtotal: Decimal, now: DateTime<Utc>) -> CouponEvaluation {
        if let Some(reason) = self.availability(now) {
            return CouponEvaluation::rejected(reason);
        }
        if subtotal < self.min_order_value {
            return CouponEvaluation::rejected(CouponRejection::MinimumNotMet { minimum: self.min_order_value });
        }
        CouponEvaluation { valid: true, discount: self.discount_for(subtotal), reason: None }
    }

    fn availability(&self, now: DateTime<Utc>) -> Option<CouponRejection> {
        if !self.is_active { return Some(CouponRejection::Inactive); }
        if now < self.valid_from { return Some(CouponRejection::NotYetValid); }
        if self.valid_until.is_some_and(|until| now > until) { return Some(CouponRejection::Expired); }
        if self.is_exhausted() { return Some(CouponRejection::Exhausted); }
        None
    }
}

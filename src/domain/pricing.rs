//! Order pricing: shipping policy and the price breakdown of a checkout.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Flat-rate shipping: free from `free_threshold` upwards, `flat_fee` below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    pub free_threshold: Decimal,
    pub flat_fee: Decimal,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self { free_threshold: Decimal::new(12000, 2), flat_fee: Decimal::new(599, 2) }
    }
}

impl ShippingPolicy {
    pub fn cost_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal >= self.free_threshold { Decimal::ZERO } else { self.flat_fee }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
}

impl PriceBreakdown {
    /// `subtotal + shipping_cost - discount`, floored at zero.
    pub fn total(&self) -> Decimal {
        (self.subtotal + self.shipping_cost - self.discount).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_step() {
        let policy = ShippingPolicy::default();
        assert_eq!(policy.cost_for(Decimal::new(12000, 2)), Decimal::ZERO);
        assert_eq!(policy.cost_for(Decimal::new(25000, 2)), Decimal::ZERO);
        assert_eq!(policy.cost_for(Decimal::new(11999, 2)), Decimal::new(599, 2));
        assert_eq!(policy.cost_for(Decimal::ZERO), Decimal::new(599, 2));
    }

    #[test]
    fn test_total() {
        let pricing = PriceBreakdown { subtotal: Decimal::new(2000, 2), shipping_cost: Decimal::new(599, 2), discount: Decimal::ZERO };
        assert_eq!(pricing.total(), Decimal::new(2599, 2));
        let oversized = PriceBreakdown { subtotal: Decimal::ONE, shipping_cost: Decimal::ZERO, discount: Decimal::TEN };
        assert_eq!(oversized.total(), Decimal::ZERO);
    }
}

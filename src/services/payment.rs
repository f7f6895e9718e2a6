//! Payment boundary. Payments are not processed here; the gateway only
//! decides the payment status a new order starts with.

use std::collections::HashSet;

use crate::domain::aggregates::PaymentStatus;

pub trait PaymentGateway: Send + Sync {
    fn initial_status(&self, payment_method: &str) -> PaymentStatus;
}

/// Marks the configured methods as paid immediately and everything else as pending.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentGateway {
    instant_methods: HashSet<String>,
}

impl MockPaymentGateway {
    pub fn new<I, S>(instant_methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { instant_methods: instant_methods.into_iter().map(|m| m.as_ref().trim().to_lowercase()).collect() }
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn initial_status(&self, payment_method: &str) -> PaymentStatus {
        if self.instant_methods.contains(&payment_method.trim().to_lowercase()) {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        }
    }
}

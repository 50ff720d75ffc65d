//! Mapping between local (plan, billing cycle) pairs and Stripe price ids.

use std::collections::HashMap;

use crate::domain::billing::{BillingCycle, Plan};

/// Bidirectional plan/cycle <-> price id lookup.
///
/// The free plan never has a price.
#[derive(Debug, Clone, Default)]
pub struct StripePriceMap {
    prices: HashMap<(Plan, BillingCycle), String>,
}

impl StripePriceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price ids of the form `price_{plan}_{cycle}`, as used by the test fake.
    pub fn conventional() -> Self {
        let mut map = Self::new();
        for plan in Plan::ALL.into_iter().filter(Plan::is_paid) {
            for cycle in [BillingCycle::Monthly, BillingCycle::Yearly] {
                map = map.with_price(plan, cycle, format!("price_{}_{}", plan.as_str(), cycle.as_str()));
            }
        }
        map
    }

    /// Registers a price id. Empty ids and the free plan are skipped.
    pub fn with_price(mut self, plan: Plan, cycle: BillingCycle, price_id: impl Into<String>) -> Self {
        let price_id = price_id.into();
        if plan.is_paid() && !price_id.is_empty() {
            self.prices.insert((plan, cycle), price_id);
        }
        self
    }

    pub fn price_for(&self, plan: Plan, cycle: BillingCycle) -> Option<&str> {
        self.prices.get(&(plan, cycle)).map(String::as_str)
    }

    /// Reverse lookup used when decoding subscription objects.
    pub fn plan_for(&self, price_id: &str) -> Option<(Plan, BillingCycle)> {
        self.prices
            .iter()
            .find(|(_, id)| id.as_str() == price_id)
            .map(|(key, _)| *key)
    }
}

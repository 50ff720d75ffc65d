//! Payment configuration (Stripe)

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::adapters::stripe::{StripeConfig, StripePriceMap};
use crate::domain::billing::{BillingCycle, Plan};

use super::error::ValidationError;

/// Payment configuration (Stripe)
///
/// Every paid (plan, cycle) pair needs its own price id.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe secret API key
    pub stripe_api_key: SecretString,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: SecretString,

    /// Override for the Stripe API host (stripe-mock, recording proxies)
    pub api_base_url: Option<String>,

    pub basic_monthly_price_id: Option<String>,
    pub basic_yearly_price_id: Option<String>,
    pub pro_monthly_price_id: Option<String>,
    pub pro_yearly_price_id: Option<String>,
    pub enterprise_monthly_price_id: Option<String>,
    pub enterprise_yearly_price_id: Option<String>,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.expose_secret().starts_with("sk_test_")
    }

    fn price_ids(&self) -> [(&'static str, Plan, BillingCycle, Option<&str>); 6] {
        [
            ("PAYMENT__BASIC_MONTHLY_PRICE_ID", Plan::Basic, BillingCycle::Monthly, self.basic_monthly_price_id.as_deref()),
            ("PAYMENT__BASIC_YEARLY_PRICE_ID", Plan::Basic, BillingCycle::Yearly, self.basic_yearly_price_id.as_deref()),
            ("PAYMENT__PRO_MONTHLY_PRICE_ID", Plan::Pro, BillingCycle::Monthly, self.pro_monthly_price_id.as_deref()),
            ("PAYMENT__PRO_YEARLY_PRICE_ID", Plan::Pro, BillingCycle::Yearly, self.pro_yearly_price_id.as_deref()),
            ("PAYMENT__ENTERPRISE_MONTHLY_PRICE_ID", Plan::Enterprise, BillingCycle::Monthly, self.enterprise_monthly_price_id.as_deref()),
            ("PAYMENT__ENTERPRISE_YEARLY_PRICE_ID", Plan::Enterprise, BillingCycle::Yearly, self.enterprise_yearly_price_id.as_deref()),
        ]
    }

    /// Price lookup built from the configured ids.
    pub fn price_map(&self) -> StripePriceMap {
        self.price_ids()
            .into_iter()
            .fold(StripePriceMap::new(), |map, (_, plan, cycle, id)| match id {
                Some(id) => map.with_price(plan, cycle, id.trim()),
                None => map,
            })
    }

    /// Adapter configuration for the Stripe client.
    pub fn stripe_config(&self, signature_tolerance_secs: i64) -> StripeConfig {
        let config = StripeConfig::new(self.stripe_api_key.clone(), self.price_map())
            .with_signature_tolerance_secs(signature_tolerance_secs);
        match &self.api_base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        }
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let api_key = self.stripe_api_key.expose_secret();
        let webhook_secret = self.stripe_webhook_secret.expose_secret();
        if api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"));
        }
        if webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_WEBHOOK_SECRET"));
        }

        // Verify key prefixes for safety
        if !api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        if let Some(url) = &self.api_base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::InvalidApiBaseUrl);
            }
        }

        let mut seen: Vec<&str> = Vec::new();
        for (name, _, _, id) in self.price_ids() {
            let id = id.map(str::trim).filter(|id| !id.is_empty());
            let id = id.ok_or(ValidationError::MissingRequired(name))?;
            if seen.contains(&id) {
                return Err(ValidationError::DuplicatePriceId(id.to_string()));
            }
            seen.push(id);
        }

        Ok(())
    }
}

//! Tenant Billing - subscription reconciliation for multi-tenant services
//!
//! Keeps one versioned subscription record per tenant in agreement with an
//! external payment provider. Tenant commands call the provider first and
//! commit a single conditional write; provider webhooks are verified,
//! deduplicated and applied through the same write path.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

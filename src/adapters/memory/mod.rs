//! In-memory store adapters.
//!
//! Used by tests and by the binary when no database is configured. State
//! lives in `tokio::sync::RwLock`ed maps and is lost on restart, which the
//! dedup semantics tolerate (a restart simply forgets pending claims).

mod subscription_store;
mod webhook_event_repository;

pub use subscription_store::InMemorySubscriptionStore;
pub use webhook_event_repository::InMemoryWebhookEventRepository;

//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (tenant keys, timestamps, errors)
//! - `billing` - Plans, subscription records, lifecycle and provider events

pub mod billing;
pub mod foundation;

//! Core types and utilities for the guild entitlement engine.
//!
//! This crate provides the foundational types shared by the store and the service:
//!
//! - **Identifiers**: `GuildId`, `UserId`, `FeatureId`, `TransactionId`
//! - **Catalog**: `FeatureCatalog`, `FeatureDefinition`, `BillingPeriod`
//! - **Subscriptions**: `Subscription`, `SubscriptionPhase`, `SubscriptionStatus`
//! - **Audit**: `TransactionRecord`, `TransactionKind`
//! - **Time**: `Clock`, `SystemClock`, `ManualClock`
//!
//! # Credits
//!
//! Credits are an internal unit held as `rust_decimal::Decimal`. There is no
//! currency conversion; a feature costs a fixed number of credits per period.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod ids;
pub mod subscription;
pub mod transaction;

pub use account::CreditAccount;
pub use catalog::{BillingPeriod, CatalogError, FeatureCatalog, FeatureDefinition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EntitlementError, Result};
pub use ids::{FeatureId, GuildId, IdError, TransactionId, UserId};
pub use subscription::{
    DisableReason, Subscription, SubscriptionKey, SubscriptionPhase, SubscriptionStatus,
};
pub use transaction::{TransactionKind, TransactionRecord};

/// Re-exported so downstream crates agree on one decimal type.
pub use rust_decimal::Decimal;

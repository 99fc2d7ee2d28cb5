//! Guild entitlement engine service.
//!
//! This crate runs the entitlement lifecycle:
//!
//! - [`SubscriptionManager`]: activate, cancel and query features (user-triggered)
//! - [`RenewalSweeper`]: periodic renewals, grace periods and disablement (time-triggered)
//! - [`TransactionRecorder`]: best-effort audit trail
//! - [`WarningNotifier`]: deduplicated low-balance and grace warnings
//! - [`HookRegistry`]: per-feature side effects such as command visibility
//!
//! It also exposes both over an internal HTTP API used by the bot process.
//!
//! # Authentication
//!
//! 1. **Service API key** (`X-API-Key`) - For the bot process
//! 2. **Admin API key** (`X-Admin-Key`) - For credit grants and manual sweeps

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for the Axum signature

pub mod auth;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod locks;
pub mod manager;
pub mod notify;
pub mod recorder;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use config::EngineConfig;
pub use context::{Collaborators, EngineContext, EngineContextBuilder};
pub use dedup::{WarningCache, WarningKind};
pub use error::ApiError;
pub use hooks::{CommandSync, CommandVisibilityHook, HookRegistry, SideEffectHook};
pub use manager::{ActivationReceipt, CancellationReceipt, SubscriptionManager};
pub use notify::{NotificationDispatcher, TracingDispatcher, WarningNotifier};
pub use recorder::TransactionRecorder;
pub use routes::create_router;
pub use state::AppState;
pub use sweeper::{RenewalSweeper, SweepError, SweepReport};

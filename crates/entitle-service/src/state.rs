//! Application state.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::manager::SubscriptionManager;
use crate::sweeper::RenewalSweeper;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Engine collaborators.
    pub ctx: Arc<EngineContext>,

    /// User-triggered operations.
    pub manager: SubscriptionManager,

    /// Renewal loop (for manual sweeps).
    pub sweeper: Arc<RenewalSweeper>,
}

impl AppState {
    /// Create application state over an engine context.
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let manager = SubscriptionManager::new(Arc::clone(&ctx));
        let sweeper = Arc::new(RenewalSweeper::new(Arc::clone(&ctx)));
        Self {
            ctx,
            manager,
            sweeper,
        }
    }

    /// Service configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }
}

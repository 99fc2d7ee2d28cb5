//! Feature-specific side effects of activation and disablement.
//!
//! Hooks run after the subscription write is committed. A failing hook is logged and
//! never rolls back the subscription or the debit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use entitle_core::{FeatureDefinition, FeatureId, GuildId};

/// Failure reported by a hook.
#[derive(Debug, thiserror::Error)]
#[error("side effect failed: {0}")]
pub struct HookError(pub String);

/// Per-feature activation/disablement callback.
#[async_trait]
pub trait SideEffectHook: Send + Sync {
    /// Called after the feature was activated for `guild_id`.
    async fn on_activate(&self, guild_id: GuildId) -> Result<(), HookError>;

    /// Called after the feature was disabled for `guild_id`.
    async fn on_disable(&self, guild_id: GuildId) -> Result<(), HookError>;
}

/// Hooks by feature. Features without a hook are the common case.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<FeatureId, Arc<dyn SideEffectHook>>,
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `feature_id`, replacing any previous one.
    pub fn register(&mut self, feature_id: FeatureId, hook: Arc<dyn SideEffectHook>) {
        self.hooks.insert(feature_id, hook);
    }

    /// Builder form of [`HookRegistry::register`].
    #[must_use]
    pub fn with(mut self, feature_id: FeatureId, hook: Arc<dyn SideEffectHook>) -> Self {
        self.register(feature_id, hook);
        self
    }

    /// Whether `feature_id` has a hook.
    #[must_use]
    pub fn has_hook(&self, feature_id: &FeatureId) -> bool {
        self.hooks.contains_key(feature_id)
    }

    /// Run the activation hook of `feature_id`, if any.
    pub async fn activated(&self, guild_id: GuildId, feature_id: &FeatureId) {
        let Some(hook) = self.hooks.get(feature_id) else {
            return;
        };
        if let Err(e) = hook.on_activate(guild_id).await {
            tracing::warn!(
                guild_id = %guild_id,
                feature_id = %feature_id,
                error = %e,
                "Activation side effect failed"
            );
        }
    }

    /// Run the disablement hook of `feature_id`, if any.
    pub async fn disabled(&self, guild_id: GuildId, feature_id: &FeatureId) {
        let Some(hook) = self.hooks.get(feature_id) else {
            return;
        };
        if let Err(e) = hook.on_disable(guild_id).await {
            tracing::warn!(
                guild_id = %guild_id,
                feature_id = %feature_id,
                error = %e,
                "Disable side effect failed"
            );
        }
    }
}

/// Pushes per-guild command visibility overrides to the chat platform.
#[async_trait]
pub trait CommandSync: Send + Sync {
    /// Replace the premium command overrides of `guild_id` with `commands`.
    ///
    /// An empty set hides every gated command.
    async fn sync_commands(&self, guild_id: GuildId, commands: &[String]) -> Result<(), HookError>;
}

/// Command sync that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCommandSync;

#[async_trait]
impl CommandSync for TracingCommandSync {
    async fn sync_commands(&self, guild_id: GuildId, commands: &[String]) -> Result<(), HookError> {
        tracing::info!(guild_id = %guild_id, commands = ?commands, "Command overrides synced");
        Ok(())
    }
}

/// Shows a feature's gated commands while it is active and hides them once disabled.
pub struct CommandVisibilityHook {
    commands: Vec<String>,
    sync: Arc<dyn CommandSync>,
}

impl CommandVisibilityHook {
    /// Hook for the gated commands of `feature`.
    #[must_use]
    pub fn new(feature: &FeatureDefinition, sync: Arc<dyn CommandSync>) -> Self {
        Self {
            commands: feature.gated_commands.clone(),
            sync,
        }
    }
}

#[async_trait]
impl SideEffectHook for CommandVisibilityHook {
    async fn on_activate(&self, guild_id: GuildId) -> Result<(), HookError> {
        self.sync.sync_commands(guild_id, &self.commands).await
    }

    async fn on_disable(&self, guild_id: GuildId) -> Result<(), HookError> {
        self.sync.sync_commands(guild_id, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitle_core::FeatureCatalog;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSync {
        calls: Mutex<Vec<(GuildId, Vec<String>)>>,
    }

    #[async_trait]
    impl CommandSync for RecordingSync {
        async fn sync_commands(
            &self,
            guild_id: GuildId,
            commands: &[String],
        ) -> Result<(), HookError> {
            self.calls.lock().unwrap().push((guild_id, commands.to_vec()));
            Ok(())
        }
    }

    struct BrokenHook;

    #[async_trait]
    impl SideEffectHook for BrokenHook {
        async fn on_activate(&self, _: GuildId) -> Result<(), HookError> {
            Err(HookError("platform unreachable".into()))
        }

        async fn on_disable(&self, _: GuildId) -> Result<(), HookError> {
            Err(HookError("platform unreachable".into()))
        }
    }

    #[tokio::test]
    async fn visibility_hook_clears_overrides_on_disable() {
        let catalog = FeatureCatalog::default();
        let pro = FeatureId::new("pro").unwrap();
        let sync = Arc::new(RecordingSync::default());
        let hook = CommandVisibilityHook::new(catalog.by_id(&pro).unwrap(), sync.clone());
        let registry = HookRegistry::new().with(pro.clone(), Arc::new(hook));

        registry.activated(GuildId::new(1), &pro).await;
        registry.disabled(GuildId::new(1), &pro).await;

        let calls = sync.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].1.is_empty());
        assert!(calls[1].1.is_empty());
    }

    #[tokio::test]
    async fn missing_and_failing_hooks_are_tolerated() {
        let analytics = FeatureId::new("analytics").unwrap();
        let registry = HookRegistry::new().with(analytics.clone(), Arc::new(BrokenHook));

        registry.activated(GuildId::new(1), &analytics).await;
        registry
            .disabled(GuildId::new(1), &FeatureId::new("pro").unwrap())
            .await;
        assert!(!registry.has_hook(&FeatureId::new("pro").unwrap()));
    }
}

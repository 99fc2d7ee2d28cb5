//! Warning deduplication.
//!
//! A warning is claimed before it is sent. A claim holds for the configured TTL or until
//! the subscription changes state (activation, renewal, disablement), whichever comes
//! first. Expiry is measured against the injected clock so restarts and tests behave
//! predictably.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use entitle_core::{Clock, FeatureId, GuildId, UserId};

/// Kind of deduplicated warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// Balance will not cover the upcoming renewal.
    LowBalance,
    /// Renewal failed and the subscription is in its grace period.
    GracePeriod,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowBalance => write!(f, "low_balance"),
            Self::GracePeriod => write!(f, "grace_period"),
        }
    }
}

/// Dedup key of a warning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WarningKey {
    /// Guild the warning is about.
    pub guild_id: GuildId,
    /// Feature the warning is about.
    pub feature_id: FeatureId,
    /// Recipient.
    pub user_id: UserId,
    /// Warning kind.
    pub kind: WarningKind,
}

impl WarningKey {
    /// Build a key.
    #[must_use]
    pub fn new(guild_id: GuildId, feature_id: FeatureId, user_id: UserId, kind: WarningKind) -> Self {
        Self {
            guild_id,
            feature_id,
            user_id,
            kind,
        }
    }
}

/// TTL cache of sent warnings.
pub struct WarningCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<WarningKey, DateTime<Utc>>>,
}

impl WarningCache {
    /// Create a cache whose claims last `ttl`.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<WarningKey, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key`. Returns `false` if it is already claimed and not yet expired.
    pub fn try_claim(&self, key: WarningKey) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries();
        entries.retain(|_, expires_at| *expires_at > now);

        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, now + self.ttl);
        true
    }

    /// Drop every claim of a (guild, feature) pair, whatever the user or kind.
    pub fn clear(&self, guild_id: GuildId, feature_id: &FeatureId) {
        self.entries()
            .retain(|key, _| !(key.guild_id == guild_id && &key.feature_id == feature_id));
    }

    /// Number of unexpired claims.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries()
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    /// Whether there are no unexpired claims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for WarningCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarningCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries().len())
            .finish_non_exhaustive()
    }
}

//! Best-effort audit trail writer.

use std::sync::Arc;

use entitle_core::{GuildId, TransactionRecord};
use entitle_store::{StoreError, TransactionLog};

/// Appends transaction records without ever failing the caller.
///
/// The state change that produced a record is already committed when the record is
/// written, so an append failure is logged at error level and swallowed.
#[derive(Clone)]
pub struct TransactionRecorder {
    log: Arc<dyn TransactionLog>,
}

impl TransactionRecorder {
    /// Create a recorder writing to `log`.
    #[must_use]
    pub fn new(log: Arc<dyn TransactionLog>) -> Self {
        Self { log }
    }

    /// Append `record`. Returns whether the append succeeded.
    pub async fn record(&self, record: TransactionRecord) -> bool {
        match self.log.append(&record).await {
            Ok(()) => {
                tracing::debug!(
                    transaction_id = %record.id,
                    guild_id = %record.guild_id,
                    feature_id = %record.feature_id,
                    kind = ?record.kind,
                    amount = %record.amount,
                    "Transaction recorded"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    transaction_id = %record.id,
                    guild_id = %record.guild_id,
                    user_id = %record.user_id,
                    feature_id = %record.feature_id,
                    kind = ?record.kind,
                    amount = %record.amount,
                    error = %e,
                    "Failed to record transaction"
                );
                false
            }
        }
    }

    /// A guild's history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn history(
        &self,
        guild_id: GuildId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        self.log.list_by_guild(guild_id, limit, offset).await
    }
}

//! Error types for entitlement operations.

use rust_decimal::Decimal;

use crate::ids::{FeatureId, UserId};

/// Result type for entitlement operations.
pub type Result<T> = std::result::Result<T, EntitlementError>;

/// Errors returned by the public entitlement API.
///
/// These are values, not panics: callers render them to users via [`EntitlementError::message`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntitlementError {
    /// The feature id does not resolve in the catalog.
    #[error("unknown feature: {feature_id}")]
    UnknownFeature {
        /// The feature id that was not found.
        feature_id: FeatureId,
    },

    /// The payer cannot cover the feature cost.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// The caller is not the payer of the subscription.
    #[error("user {user_id} is not the payer of this subscription")]
    Unauthorized {
        /// The user that attempted the operation.
        user_id: UserId,
    },

    /// There is no active subscription to operate on.
    #[error("feature {feature_id} is not active")]
    NotActive {
        /// The feature that is not active.
        feature_id: FeatureId,
    },

    /// The guild is still entitled to the feature.
    #[error("feature {feature_id} is already active")]
    AlreadyActive {
        /// The feature that is already active.
        feature_id: FeatureId,
    },

    /// A collaborator (ledger, store) failed; details are logged, not exposed.
    #[error("entitlement service unavailable: {0}")]
    Unavailable(String),
}

impl EntitlementError {
    /// A user-facing message for this error.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::UnknownFeature { feature_id } => {
                format!("There is no feature called `{feature_id}`.")
            }
            Self::InsufficientCredits { balance, required } => format!(
                "You need {required} credits to activate this feature but only have {balance}."
            ),
            Self::Unauthorized { .. } => {
                "Only the user who activated this feature can cancel it.".to_string()
            }
            Self::NotActive { feature_id } => {
                format!("`{feature_id}` is not active in this server.")
            }
            Self::AlreadyActive { feature_id } => {
                format!("`{feature_id}` is already active in this server.")
            }
            Self::Unavailable(_) => {
                "Something went wrong while processing your request. Please try again later."
                    .to_string()
            }
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownFeature { .. } => "unknown_feature",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotActive { .. } => "not_active",
            Self::AlreadyActive { .. } => "already_active",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

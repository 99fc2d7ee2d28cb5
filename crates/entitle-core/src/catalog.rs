//! Feature catalog.
//!
//! The catalog is the static table of purchasable guild features and what they cost.
//! It is built once at start-up (built-in defaults or a JSON file) and never mutated.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::FeatureId;

// ============================================================================
// Constants
// ============================================================================

/// Feature id of the built-in premium bundle.
pub const PRO_FEATURE_ID: &str = "pro";

/// Longest billing period a definition may declare (ten years).
pub const MAX_PERIOD_DAYS: u32 = 3650;

/// A purchasable feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    /// Catalog key.
    pub id: FeatureId,

    /// Display name.
    pub name: String,

    /// Credits charged per period.
    pub cost: Decimal,

    /// Calendar unit of the billing period.
    pub period: BillingPeriod,

    /// Length of one billing period in days.
    pub period_days: u32,

    /// Human-readable list of what the feature unlocks.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Commands that only become visible in a guild while this feature is active.
    #[serde(default)]
    pub gated_commands: Vec<String>,
}

/// Calendar unit of a billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    /// Seven days.
    Weekly,
    /// Thirty days.
    Monthly,
    /// Ninety days.
    Quarterly,
    /// 365 days.
    Yearly,
}

impl BillingPeriod {
    /// Conventional day count for the unit.
    #[must_use]
    pub const fn default_days(self) -> u32 {
        match self {
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Quarterly => 90,
            Self::Yearly => 365,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

/// Errors raised while building a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file is not valid JSON for a feature list.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two definitions share an id.
    #[error("duplicate feature id: {0}")]
    DuplicateFeature(FeatureId),

    /// A definition has a negative cost or a period outside the allowed range.
    #[error("invalid definition for {feature_id}: {reason}")]
    InvalidDefinition {
        /// The offending feature.
        feature_id: FeatureId,
        /// What is wrong with it.
        reason: String,
    },
}

/// Immutable lookup table of feature definitions.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    features: HashMap<FeatureId, FeatureDefinition>,
}

impl FeatureCatalog {
    /// Build a catalog from definitions, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` on duplicate ids, negative costs, or periods outside
    /// `1..=MAX_PERIOD_DAYS` days.
    pub fn new(definitions: Vec<FeatureDefinition>) -> Result<Self, CatalogError> {
        let mut features = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            if definition.cost.is_sign_negative() {
                return Err(CatalogError::InvalidDefinition {
                    feature_id: definition.id,
                    reason: "cost must not be negative".into(),
                });
            }
            if definition.period_days == 0 {
                return Err(CatalogError::InvalidDefinition {
                    feature_id: definition.id,
                    reason: "period_days must be positive".into(),
                });
            }
            if definition.period_days > MAX_PERIOD_DAYS {
                return Err(CatalogError::InvalidDefinition {
                    feature_id: definition.id,
                    reason: format!("period_days must not exceed {MAX_PERIOD_DAYS}"),
                });
            }
            if features.contains_key(&definition.id) {
                return Err(CatalogError::DuplicateFeature(definition.id));
            }
            features.insert(definition.id.clone(), definition);
        }
        Ok(Self { features })
    }

    /// Parse a JSON array of feature definitions.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` for malformed JSON, or a validation error.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<FeatureDefinition> = serde_json::from_str(json)?;
        Self::new(definitions)
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the file cannot be read or is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Look up a feature by id.
    #[must_use]
    pub fn by_id(&self, feature_id: &FeatureId) -> Option<&FeatureDefinition> {
        self.features.get(feature_id)
    }

    /// Whether the id resolves.
    #[must_use]
    pub fn contains(&self, feature_id: &FeatureId) -> bool {
        self.features.contains_key(feature_id)
    }

    /// All definitions, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<&FeatureDefinition> {
        let mut all: Vec<_> = self.features.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        let definitions = vec![
            builtin(
                PRO_FEATURE_ID,
                "Pro",
                50,
                BillingPeriod::Monthly,
                &["Premium commands", "Higher rate limits", "Priority support"],
                &["autorole", "giveaway", "ticket", "backup"],
            ),
            builtin(
                "analytics",
                "Server Analytics",
                20,
                BillingPeriod::Monthly,
                &["Member growth charts", "Message activity heatmaps"],
                &["stats"],
            ),
            builtin(
                "custom_branding",
                "Custom Branding",
                100,
                BillingPeriod::Quarterly,
                &["Custom bot avatar and embed colours"],
                &[],
            ),
        ];

        // Built-in definitions are statically valid
        let features = definitions
            .into_iter()
            .map(|definition| (definition.id.clone(), definition))
            .collect();
        Self { features }
    }
}

fn builtin(
    id: &str,
    name: &str,
    cost: i64,
    period: BillingPeriod,
    includes: &[&str],
    gated_commands: &[&str],
) -> FeatureDefinition {
    FeatureDefinition {
        id: FeatureId::new_unchecked(id.to_string()),
        name: name.to_string(),
        cost: Decimal::from(cost),
        period,
        period_days: period.default_days(),
        includes: includes.iter().map(ToString::to_string).collect(),
        gated_commands: gated_commands.iter().map(ToString::to_string).collect(),
    }
}

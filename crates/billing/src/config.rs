//! Controller configuration.
//!
//! Supplied at `initialize`. The licensing key is deployment material: it is
//! handed to the transport untouched and never logged.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use billingflow_catalog::ItemType;
use billingflow_core::{DomainError, ProductId};

pub const ENV_PRODUCT_IDS: &str = "BILLING_PRODUCT_IDS";
pub const ENV_DEVELOPER_PAYLOAD: &str = "BILLING_DEVELOPER_PAYLOAD";
pub const ENV_LICENSE_KEY: &str = "BILLING_LICENSE_KEY";
pub const ENV_ITEM_TYPE: &str = "BILLING_ITEM_TYPE";

const DEFAULT_DEVELOPER_PAYLOAD: &str = "payload";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid product id in {ENV_PRODUCT_IDS}: {0}")]
    ProductId(#[from] DomainError),

    #[error("unknown item type {0:?} (expected \"inapp\" or \"subs\")")]
    ItemType(String),

    #[error("invalid billing config document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opaque store licensing key (e.g. the Play public key).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseKey(String);

impl LicenseKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key, for the transport only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0.is_empty() {
            f.write_str("LicenseKey(<unset>)")
        } else {
            f.write_str("LicenseKey(<redacted>)")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Catalog queried automatically once the connection is up.
    pub product_ids: BTreeSet<ProductId>,
    pub item_type: ItemType,
    /// Developer payload attached to every purchase request.
    pub developer_payload: String,
    pub license_key: LicenseKey,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            product_ids: BTreeSet::new(),
            item_type: ItemType::Consumable,
            developer_payload: DEFAULT_DEVELOPER_PAYLOAD.to_string(),
            license_key: LicenseKey::default(),
        }
    }
}

impl BillingConfig {
    pub fn new(product_ids: impl IntoIterator<Item = ProductId>) -> Self {
        Self {
            product_ids: product_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_license_key(mut self, key: LicenseKey) -> Self {
        self.license_key = key;
        self
    }

    pub fn with_developer_payload(mut self, payload: impl Into<String>) -> Self {
        self.developer_payload = payload.into();
        self
    }

    /// Load from the process environment (`BILLING_*` variables).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ids) = lookup(ENV_PRODUCT_IDS) {
            config.product_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ProductId::new)
                .collect::<Result<_, _>>()?;
        }

        if let Some(payload) = lookup(ENV_DEVELOPER_PAYLOAD) {
            config.developer_payload = payload;
        }

        if let Some(tag) = lookup(ENV_ITEM_TYPE) {
            config.item_type =
                ItemType::from_store_tag(tag.trim()).ok_or_else(|| ConfigError::ItemType(tag))?;
        }

        match lookup(ENV_LICENSE_KEY) {
            Some(key) => config.license_key = LicenseKey::new(key),
            None => {
                tracing::warn!("{ENV_LICENSE_KEY} not set; store connection may be refused");
            }
        }

        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = BillingConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.product_ids.is_empty());
        assert_eq!(config.developer_payload, "payload");
        assert_eq!(config.item_type, ItemType::Consumable);
        assert!(config.license_key.is_empty());
    }

    #[test]
    fn reads_product_ids_and_item_type() {
        let config = BillingConfig::from_lookup(lookup(&[
            (ENV_PRODUCT_IDS, "practicemode, premium,"),
            (ENV_ITEM_TYPE, "subs"),
            (ENV_LICENSE_KEY, "MIIB-secret"),
        ]))
        .unwrap();

        let ids: Vec<&str> = config.product_ids.iter().map(|p| p.as_str()).collect();
        assert_eq!(ids, vec!["practicemode", "premium"]);
        assert_eq!(config.item_type, ItemType::Subscription);
        assert_eq!(config.license_key.expose(), "MIIB-secret");
    }

    #[test]
    fn rejects_unknown_item_type() {
        let err = BillingConfig::from_lookup(lookup(&[(ENV_ITEM_TYPE, "bundle")])).unwrap_err();
        assert!(matches!(err, ConfigError::ItemType(t) if t == "bundle"));
    }

    #[test]
    fn license_key_is_redacted_in_debug_output() {
        let config = BillingConfig::default().with_license_key(LicenseKey::new("MIIB-secret"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("MIIB-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn json_document_fills_missing_fields_with_defaults() {
        let config =
            BillingConfig::from_json(r#"{ "product_ids": ["practicemode"] }"#).unwrap();
        assert_eq!(config.product_ids.len(), 1);
        assert_eq!(config.developer_payload, "payload");

        assert!(BillingConfig::from_json(r#"{ "product_ids": [""] }"#).is_err());
    }
}

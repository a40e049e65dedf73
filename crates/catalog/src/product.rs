use serde::{Deserialize, Serialize};

use billingflow_core::ProductId;

/// Kind of store item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// One-time (managed / consumable) in-app product.
    #[default]
    Consumable,
    Subscription,
}

impl ItemType {
    /// Store-side type tag ("inapp" / "subs").
    pub fn as_store_tag(&self) -> &'static str {
        match self {
            ItemType::Consumable => "inapp",
            ItemType::Subscription => "subs",
        }
    }

    pub fn from_store_tag(tag: &str) -> Option<Self> {
        match tag {
            "inapp" => Some(ItemType::Consumable),
            "subs" => Some(ItemType::Subscription),
            _ => None,
        }
    }
}

/// A purchasable product as described by the store.
///
/// Replaced wholesale on every inventory query; never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub title: String,
    pub description: String,
    /// Localized, already formatted price (e.g. "$1.99").
    pub price: String,
    /// ISO 4217 currency code (e.g. "USD").
    pub currency_code: String,
    pub item_type: ItemType,
}

//! StoreKit adapter.
//!
//! The host posts StoreKit outcomes as named notifications whose user info is
//! the JSON rendering of the posted dictionary: product dictionaries keyed by
//! product identifier, or a `transaction` / `error` entry.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use billingflow_catalog::{ItemType, PlatformPayload, Product, Purchase};
use billingflow_core::{OrderId, ProductId};

use super::{Normalize, Origin, Signal, malformed, malformed_purchase};
use crate::error::codes::{EMPTY_INVENTORY_CODE, MALFORMED_PAYLOAD_CODE};

const PLATFORM: &str = "storekit";

/// `SKErrorPaymentCancelled`.
pub const PAYMENT_CANCELLED: i32 = 2;

/// Code used when a failed transaction carries no error.
const UNKNOWN_ERROR: i32 = 0;

/// Seconds between the Unix epoch and the StoreKit reference date (2001-01-01T00:00:00Z).
const REFERENCE_DATE_UNIX_OFFSET: i64 = 978_307_200;
/// 0001-01-01T00:00:00Z relative to the reference date.
const MIN_REFERENCE_SECONDS: f64 = -63_113_904_000.0;
/// 9999-12-31T23:59:59Z relative to the reference date.
const MAX_REFERENCE_SECONDS: f64 = 252_423_993_599.0;

pub mod names {
    pub const QUERY_INVENTORY: &str = "InAppQueryInventoryNotification";
    pub const QUERY_INVENTORY_ERROR: &str = "InAppQueryInventoryErrorNotification";
    pub const PURCHASE_PRODUCT: &str = "InAppPurchaseProductNotification";
    pub const PURCHASE_PRODUCT_ERROR: &str = "InAppPurchaseProductErrorNotification";
    pub const RESTORE_PRODUCTS: &str = "InAppRestoreProductsNotification";
    pub const RESTORE_PRODUCTS_FINISHED: &str = "InAppRestoreProductsFinishedNotification";
    pub const RESTORE_PRODUCTS_ERROR: &str = "InAppRestoreProductsErrorNotification";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreKitNotification {
    pub name: String,
    pub user_info: Option<Value>,
}

impl StoreKitNotification {
    pub fn new(name: impl Into<String>, user_info: Option<Value>) -> Self {
        Self {
            name: name.into(),
            user_info,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkProduct {
    localized_title: String,
    localized_description: String,
    localized_price: String,
    currency_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkError {
    code: i32,
    localized_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkTransaction {
    transaction_identifier: Option<String>,
    product_identifier: Option<String>,
    transaction_date: Option<f64>,
    original_transaction: Option<Box<SkTransaction>>,
    error: Option<SkError>,
    transaction_receipt: Option<String>,
}

/// Convert a StoreKit timestamp (seconds since 2001-01-01) to UTC, clipping
/// to the range of representable calendar dates.
///
/// Returns `None` for NaN or infinite input.
pub fn reference_date_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let clipped = seconds.clamp(MIN_REFERENCE_SECONDS, MAX_REFERENCE_SECONDS);
    let whole = clipped.floor();
    let nanos = (((clipped - whole) * 1e9) as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64 + REFERENCE_DATE_UNIX_OFFSET, nanos)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreKitNormalizer;

impl StoreKitNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalize for StoreKitNormalizer {
    type Native = StoreKitNotification;

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn normalize(&self, origin: &Origin, native: StoreKitNotification) -> Vec<Signal> {
        let info = native.user_info.as_ref();

        let signal = match native.name.as_str() {
            names::QUERY_INVENTORY => inventory(info),
            names::QUERY_INVENTORY_ERROR => match entry::<SkError>(info, "error") {
                Ok(error) => Signal::InventoryFailed {
                    code: error.code,
                    message: error.localized_description,
                },
                Err(reason) => malformed(PLATFORM, &Origin::Inventory, reason),
            },
            names::PURCHASE_PRODUCT => match entry::<SkTransaction>(info, "transaction")
                .and_then(|tx| purchase(&tx, &tx, None))
            {
                Ok(purchase) => Signal::Purchased(purchase),
                Err(reason) => malformed_purchase(PLATFORM, origin, reason),
            },
            names::PURCHASE_PRODUCT_ERROR => match entry::<SkTransaction>(info, "transaction") {
                Ok(tx) => failed_transaction(tx, origin),
                Err(reason) => malformed_purchase(PLATFORM, origin, reason),
            },
            names::RESTORE_PRODUCTS => match entry::<SkTransaction>(info, "transaction")
                .and_then(|tx| restored(&tx))
            {
                Ok(purchase) => Signal::Restored(purchase),
                // One unreadable transaction must not fail the whole restore.
                Err(reason) => malformed(PLATFORM, &Origin::Unsolicited, reason),
            },
            names::RESTORE_PRODUCTS_FINISHED => Signal::RestoreFinished,
            names::RESTORE_PRODUCTS_ERROR => Signal::RestoreFailed {
                code: entry::<SkError>(info, "error")
                    .map(|e| e.code)
                    .unwrap_or(MALFORMED_PAYLOAD_CODE),
            },
            other => {
                tracing::warn!(platform = PLATFORM, name = other, "unknown notification");
                Signal::ProcessingError(format!("unknown notification {other}"))
            }
        };

        vec![signal]
    }
}

fn entry<T: DeserializeOwned>(info: Option<&Value>, key: &str) -> Result<T, String> {
    let info = info.ok_or_else(|| "notification has no user info".to_string())?;
    let value = info
        .get(key)
        .ok_or_else(|| format!("user info has no {key:?} entry"))?;
    serde_json::from_value(value.clone()).map_err(|e| format!("{key}: {e}"))
}

fn inventory(info: Option<&Value>) -> Signal {
    let Some(info) = info else {
        return Signal::InventoryFailed {
            code: EMPTY_INVENTORY_CODE,
            message: Some("inventory notification has no user info".to_string()),
        };
    };
    let Some(entries) = info.as_object() else {
        return malformed(PLATFORM, &Origin::Inventory, "user info is not a dictionary");
    };
    if entries.is_empty() {
        return Signal::InventoryFailed {
            code: EMPTY_INVENTORY_CODE,
            message: Some("store returned no products".to_string()),
        };
    }

    let products = entries
        .iter()
        .map(|(id, value)| {
            let product_id = ProductId::new(id.as_str()).map_err(|e| e.to_string())?;
            let sk: SkProduct =
                serde_json::from_value(value.clone()).map_err(|e| format!("{id}: {e}"))?;
            Ok(Product {
                product_id,
                title: sk.localized_title,
                description: sk.localized_description,
                price: sk.localized_price,
                currency_code: sk.currency_code,
                item_type: ItemType::Consumable,
            })
        })
        .collect::<Result<Vec<_>, String>>();

    match products {
        Ok(products) => Signal::InventoryLoaded(products),
        Err(reason) => malformed(PLATFORM, &Origin::Inventory, reason),
    }
}

/// Build a purchase from `source` (ids and date), taking the receipt from `receipt_from`.
fn purchase(
    source: &SkTransaction,
    receipt_from: &SkTransaction,
    fallback_product: Option<&ProductId>,
) -> Result<Purchase, String> {
    let order = source
        .transaction_identifier
        .as_deref()
        .ok_or_else(|| "transaction has no transactionIdentifier".to_string())?;
    let order_id = OrderId::new(order).map_err(|e| e.to_string())?;

    let product_id = match source.product_identifier.as_deref() {
        Some(p) => ProductId::new(p).map_err(|e| e.to_string())?,
        None => fallback_product
            .cloned()
            .ok_or_else(|| "transaction has no productIdentifier".to_string())?,
    };

    let seconds = source
        .transaction_date
        .ok_or_else(|| "transaction has no transactionDate".to_string())?;
    let purchased_at = reference_date_to_utc(seconds)
        .ok_or_else(|| format!("transactionDate is not a number: {seconds}"))?;

    let payload = PlatformPayload {
        data: receipt_from.transaction_receipt.clone(),
        signature: None,
    };
    Ok(Purchase::new(order_id, product_id, purchased_at, payload))
}

fn restored(tx: &SkTransaction) -> Result<Purchase, String> {
    match tx.original_transaction.as_deref() {
        Some(original) => {
            let product = tx
                .product_identifier
                .as_deref()
                .and_then(|p| ProductId::new(p).ok());
            purchase(original, tx, product.as_ref())
        }
        None => purchase(tx, tx, None),
    }
}

fn failed_transaction(tx: SkTransaction, origin: &Origin) -> Signal {
    let product_id = tx
        .product_identifier
        .as_deref()
        .and_then(|p| ProductId::new(p).ok())
        .or_else(|| match origin {
            Origin::Purchase(p) => Some(p.clone()),
            _ => None,
        });
    let order_id = tx
        .transaction_identifier
        .as_deref()
        .and_then(|id| OrderId::new(id).ok());
    let code = tx.error.map(|e| e.code).unwrap_or(UNKNOWN_ERROR);

    if code == PAYMENT_CANCELLED {
        Signal::Canceled {
            product_id,
            order_id,
        }
    } else {
        Signal::PurchaseFailed {
            code,
            product_id,
            order_id,
        }
    }
}

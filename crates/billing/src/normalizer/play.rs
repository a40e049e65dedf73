//! Google Play Billing adapter.
//!
//! Native payloads mirror the billing-service callbacks: SKU details from
//! `getSkuDetails`, purchase results carrying `INAPP_PURCHASE_DATA` JSON plus
//! its signature, and `getPurchases` bundles for restores.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use billingflow_catalog::{ItemType, PlatformPayload, Product, Purchase};
use billingflow_core::{OrderId, ProductId};

use super::{Normalize, Origin, Signal, malformed, malformed_purchase};
use crate::error::codes::{EMPTY_INVENTORY_CODE, MALFORMED_PAYLOAD_CODE, VALIDATION_FAILED_CODE};

const PLATFORM: &str = "play";

/// Billing service response codes.
pub mod response {
    pub const OK: i32 = 0;
    pub const USER_CANCELED: i32 = 1;
    pub const SERVICE_UNAVAILABLE: i32 = 2;
    pub const BILLING_UNAVAILABLE: i32 = 3;
    pub const ITEM_UNAVAILABLE: i32 = 4;
    pub const DEVELOPER_ERROR: i32 = 5;
    pub const ERROR: i32 = 6;
    pub const ITEM_ALREADY_OWNED: i32 = 7;
    pub const ITEM_NOT_OWNED: i32 = 8;
}

/// One entry of a `getSkuDetails` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuDetails {
    #[serde(rename = "productId")]
    pub product_id: String,
    /// "inapp" or "subs".
    #[serde(rename = "type")]
    pub item_type: String,
    pub price: String,
    pub price_currency_code: String,
    pub title: String,
    pub description: String,
}

/// Callbacks raised by the Play billing service connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayCallback {
    SkuDetailsLoaded(Vec<SkuDetails>),
    QueryInventoryError {
        response_code: i32,
    },
    ProductPurchased {
        response_code: i32,
        purchase_data: String,
        signature: String,
    },
    BuyProductError {
        response_code: i32,
        sku: String,
    },
    ProductPurchasedError {
        response_code: i32,
        sku: String,
    },
    UserCanceled {
        sku: Option<String>,
    },
    OwnedItems {
        purchase_data_list: Vec<String>,
        signature_list: Vec<String>,
    },
    InvalidOwnedItemsBundle,
    PurchaseFailedValidation {
        sku: String,
    },
    ProcessingError {
        message: String,
    },
    /// The service connection dropped.
    Disconnected,
}

/// `INAPP_PURCHASE_DATA` fields the controller needs; the rest stays in the
/// opaque payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseData {
    order_id: Option<String>,
    product_id: String,
    purchase_time: i64,
    purchase_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlayBillingNormalizer;

impl PlayBillingNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalize for PlayBillingNormalizer {
    type Native = PlayCallback;

    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn normalize(&self, origin: &Origin, native: PlayCallback) -> Vec<Signal> {
        match native {
            PlayCallback::SkuDetailsLoaded(details) => vec![inventory(details)],
            PlayCallback::QueryInventoryError { response_code } => vec![Signal::InventoryFailed {
                code: response_code,
                message: None,
            }],
            PlayCallback::ProductPurchased {
                response_code,
                purchase_data,
                signature,
            } => vec![purchased(origin, response_code, purchase_data, signature)],
            PlayCallback::BuyProductError { response_code, sku }
            | PlayCallback::ProductPurchasedError { response_code, sku } => {
                vec![failure(response_code, product_for(Some(&sku), origin))]
            }
            PlayCallback::UserCanceled { sku } => vec![Signal::Canceled {
                product_id: product_for(sku.as_deref(), origin),
                order_id: None,
            }],
            PlayCallback::OwnedItems {
                purchase_data_list,
                signature_list,
            } => owned_items(purchase_data_list, signature_list),
            PlayCallback::InvalidOwnedItemsBundle => vec![Signal::RestoreFailed {
                code: MALFORMED_PAYLOAD_CODE,
            }],
            PlayCallback::PurchaseFailedValidation { sku } => vec![Signal::PurchaseFailed {
                code: VALIDATION_FAILED_CODE,
                product_id: product_for(Some(&sku), origin),
                order_id: None,
            }],
            PlayCallback::ProcessingError { message } => vec![Signal::ProcessingError(message)],
            PlayCallback::Disconnected => {
                vec![Signal::ConnectionLost("billing service disconnected".to_string())]
            }
        }
    }
}

fn inventory(details: Vec<SkuDetails>) -> Signal {
    if details.is_empty() {
        return Signal::InventoryFailed {
            code: EMPTY_INVENTORY_CODE,
            message: Some("store returned no products".to_string()),
        };
    }

    match details.into_iter().map(product).collect::<Result<Vec<_>, _>>() {
        Ok(products) => Signal::InventoryLoaded(products),
        Err(reason) => malformed(PLATFORM, &Origin::Inventory, reason),
    }
}

fn product(details: SkuDetails) -> Result<Product, String> {
    let product_id = ProductId::new(details.product_id).map_err(|e| e.to_string())?;
    let item_type = ItemType::from_store_tag(&details.item_type)
        .ok_or_else(|| format!("unknown sku type {:?}", details.item_type))?;

    Ok(Product {
        product_id,
        title: details.title,
        description: details.description,
        price: details.price,
        currency_code: details.price_currency_code,
        item_type,
    })
}

fn purchased(origin: &Origin, response_code: i32, data: String, signature: String) -> Signal {
    match response_code {
        response::OK => match parse_purchase(data, signature) {
            Ok(purchase) => Signal::Purchased(purchase),
            Err(reason) => malformed_purchase(PLATFORM, origin, reason),
        },
        code => failure(code, product_for(None, origin)),
    }
}

fn failure(code: i32, product_id: Option<ProductId>) -> Signal {
    if code == response::USER_CANCELED {
        Signal::Canceled {
            product_id,
            order_id: None,
        }
    } else {
        Signal::PurchaseFailed {
            code,
            product_id,
            order_id: None,
        }
    }
}

fn owned_items(data_list: Vec<String>, signature_list: Vec<String>) -> Vec<Signal> {
    if data_list.len() != signature_list.len() {
        return vec![malformed(
            PLATFORM,
            &Origin::Restore,
            format!(
                "owned items bundle has {} purchases but {} signatures",
                data_list.len(),
                signature_list.len()
            ),
        )];
    }

    let mut signals: Vec<Signal> = data_list
        .into_iter()
        .zip(signature_list)
        .map(|(data, signature)| match parse_purchase(data, signature) {
            Ok(purchase) => Signal::Restored(purchase),
            // One unreadable entry must not hide the others.
            Err(reason) => malformed(PLATFORM, &Origin::Unsolicited, reason),
        })
        .collect();
    signals.push(Signal::RestoreFinished);
    signals
}

fn parse_purchase(data: String, signature: String) -> Result<Purchase, String> {
    let parsed: PurchaseData =
        serde_json::from_str(&data).map_err(|e| format!("purchase data: {e}"))?;

    // Test purchases carry no orderId; the token identifies them instead.
    let order = parsed
        .order_id
        .filter(|id| !id.is_empty())
        .or(parsed.purchase_token)
        .ok_or_else(|| "purchase data has neither orderId nor purchaseToken".to_string())?;

    let order_id = OrderId::new(order).map_err(|e| e.to_string())?;
    let product_id = ProductId::new(parsed.product_id).map_err(|e| e.to_string())?;
    let purchased_at = DateTime::from_timestamp_millis(parsed.purchase_time)
        .ok_or_else(|| format!("purchaseTime out of range: {}", parsed.purchase_time))?;

    Ok(Purchase::new(
        order_id,
        product_id,
        purchased_at,
        PlatformPayload::new(data, signature),
    ))
}

fn product_for(sku: Option<&str>, origin: &Origin) -> Option<ProductId> {
    sku.and_then(|s| ProductId::new(s).ok()).or_else(|| match origin {
        Origin::Purchase(product_id) => Some(product_id.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn practicemode() -> ProductId {
        ProductId::new("practicemode").unwrap()
    }

    fn purchase_json(order_id: &str) -> String {
        format!(
            r#"{{"orderId":"{order_id}","packageName":"com.example.app","productId":"practicemode","purchaseTime":1700000000000,"purchaseState":0,"developerPayload":"payload","purchaseToken":"tok-1"}}"#
        )
    }

    fn sku(id: &str, kind: &str) -> SkuDetails {
        SkuDetails {
            product_id: id.to_string(),
            item_type: kind.to_string(),
            price: "$1.99".to_string(),
            price_currency_code: "USD".to_string(),
            title: "Practice Mode".to_string(),
            description: "Unlimited practice".to_string(),
        }
    }

    fn normalize(origin: Origin, native: PlayCallback) -> Vec<Signal> {
        PlayBillingNormalizer::new().normalize(&origin, native)
    }

    #[test]
    fn sku_details_become_products() {
        let signals = normalize(
            Origin::Inventory,
            PlayCallback::SkuDetailsLoaded(vec![sku("practicemode", "inapp"), sku("pro", "subs")]),
        );

        let [Signal::InventoryLoaded(products)] = signals.as_slice() else {
            panic!("unexpected signals: {signals:?}");
        };
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].product_id, practicemode());
        assert_eq!(products[0].price, "$1.99");
        assert_eq!(products[1].item_type, ItemType::Subscription);
    }

    #[test]
    fn sku_details_parse_from_play_json() {
        let details: SkuDetails = serde_json::from_str(
            r#"{"productId":"practicemode","type":"inapp","price":"$1.99","price_amount_micros":1990000,"price_currency_code":"USD","title":"Practice Mode","description":"Unlimited practice"}"#,
        )
        .unwrap();
        assert_eq!(details, sku("practicemode", "inapp"));
    }

    #[test]
    fn empty_inventory_is_an_error() {
        let signals = normalize(Origin::Inventory, PlayCallback::SkuDetailsLoaded(vec![]));
        assert!(matches!(
            signals.as_slice(),
            [Signal::InventoryFailed { code: EMPTY_INVENTORY_CODE, .. }]
        ));
    }

    #[test]
    fn unknown_sku_type_is_malformed() {
        let signals = normalize(
            Origin::Inventory,
            PlayCallback::SkuDetailsLoaded(vec![sku("practicemode", "bundle")]),
        );
        assert!(matches!(
            signals.as_slice(),
            [Signal::InventoryFailed { code: MALFORMED_PAYLOAD_CODE, .. }]
        ));
    }

    #[test]
    fn purchased_callback_carries_order_and_payload() {
        let signals = normalize(
            Origin::Purchase(practicemode()),
            PlayCallback::ProductPurchased {
                response_code: response::OK,
                purchase_data: purchase_json("GPA.1234"),
                signature: "sig".to_string(),
            },
        );

        let [Signal::Purchased(purchase)] = signals.as_slice() else {
            panic!("unexpected signals: {signals:?}");
        };
        assert_eq!(purchase.order_id().as_str(), "GPA.1234");
        assert_eq!(purchase.product_id(), &practicemode());
        assert_eq!(purchase.purchased_at().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(purchase.payload().signature.as_deref(), Some("sig"));
    }

    #[test]
    fn purchase_token_stands_in_for_missing_order_id() {
        let data = r#"{"productId":"practicemode","purchaseTime":0,"purchaseToken":"tok-9"}"#;
        let signals = normalize(
            Origin::Unsolicited,
            PlayCallback::ProductPurchased {
                response_code: response::OK,
                purchase_data: data.to_string(),
                signature: String::new(),
            },
        );
        assert!(matches!(
            signals.as_slice(),
            [Signal::Purchased(p)] if p.order_id().as_str() == "tok-9"
        ));
    }

    #[test]
    fn unparseable_purchase_data_fails_the_pending_purchase() {
        let signals = normalize(
            Origin::Purchase(practicemode()),
            PlayCallback::ProductPurchased {
                response_code: response::OK,
                purchase_data: "{not json".to_string(),
                signature: "sig".to_string(),
            },
        );
        assert_eq!(
            signals,
            vec![Signal::PurchaseFailed {
                code: MALFORMED_PAYLOAD_CODE,
                product_id: Some(practicemode()),
                order_id: None,
            }]
        );
    }

    #[test]
    fn user_canceled_response_code_is_a_cancellation() {
        let signals = normalize(
            Origin::Purchase(practicemode()),
            PlayCallback::BuyProductError {
                response_code: response::USER_CANCELED,
                sku: "practicemode".to_string(),
            },
        );
        assert_eq!(
            signals,
            vec![Signal::Canceled {
                product_id: Some(practicemode()),
                order_id: None,
            }]
        );
    }

    #[test]
    fn other_response_codes_fail_the_purchase() {
        let signals = normalize(
            Origin::Unsolicited,
            PlayCallback::ProductPurchasedError {
                response_code: response::ITEM_ALREADY_OWNED,
                sku: "practicemode".to_string(),
            },
        );
        assert_eq!(
            signals,
            vec![Signal::PurchaseFailed {
                code: response::ITEM_ALREADY_OWNED,
                product_id: Some(practicemode()),
                order_id: None,
            }]
        );
    }

    #[test]
    fn owned_items_restore_each_purchase_then_finish() {
        let signals = normalize(
            Origin::Restore,
            PlayCallback::OwnedItems {
                purchase_data_list: vec![purchase_json("GPA.1"), "garbage".to_string(), purchase_json("GPA.2")],
                signature_list: vec!["a".into(), "b".into(), "c".into()],
            },
        );

        assert_eq!(signals.len(), 4);
        assert!(matches!(&signals[0], Signal::Restored(p) if p.order_id().as_str() == "GPA.1"));
        assert!(matches!(&signals[1], Signal::ProcessingError(_)));
        assert!(matches!(&signals[2], Signal::Restored(p) if p.order_id().as_str() == "GPA.2"));
        assert_eq!(signals[3], Signal::RestoreFinished);
    }

    #[test]
    fn mismatched_owned_items_bundle_fails_the_restore() {
        let signals = normalize(
            Origin::Restore,
            PlayCallback::OwnedItems {
                purchase_data_list: vec![purchase_json("GPA.1")],
                signature_list: vec![],
            },
        );
        assert_eq!(signals, vec![Signal::RestoreFailed { code: MALFORMED_PAYLOAD_CODE }]);
    }

    #[test]
    fn validation_failure_and_disconnect() {
        assert!(matches!(
            normalize(
                Origin::Unsolicited,
                PlayCallback::PurchaseFailedValidation { sku: "practicemode".into() }
            )
            .as_slice(),
            [Signal::PurchaseFailed { code: VALIDATION_FAILED_CODE, .. }]
        ));
        assert!(matches!(
            normalize(Origin::Unsolicited, PlayCallback::Disconnected).as_slice(),
            [Signal::ConnectionLost(_)]
        ));
    }
}

//! Translation of platform-native payloads into platform-neutral signals.
//!
//! Each adapter owns only the translation; dedup, ledger writes and event
//! publication happen in the controller. Normalizers never fail: anything
//! they cannot read becomes the error signal matching the request the payload
//! answers.

pub mod play;
pub mod storekit;

pub use play::{PlayBillingNormalizer, PlayCallback, SkuDetails};
pub use storekit::{StoreKitNormalizer, StoreKitNotification};

use billingflow_catalog::{Product, Purchase};
use billingflow_core::{OrderId, ProductId};

use crate::error::codes::MALFORMED_PAYLOAD_CODE;

/// Which request a native payload answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Inventory,
    Purchase(ProductId),
    Restore,
    /// Pushed by the platform without a matching request.
    Unsolicited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    InventoryLoaded(Vec<Product>),
    InventoryFailed {
        code: i32,
        message: Option<String>,
    },
    Purchased(Purchase),
    Restored(Purchase),
    PurchaseFailed {
        code: i32,
        product_id: Option<ProductId>,
        /// Failed transactions that carry an id still need finishing.
        order_id: Option<OrderId>,
    },
    Canceled {
        product_id: Option<ProductId>,
        order_id: Option<OrderId>,
    },
    RestoreFinished,
    RestoreFailed {
        code: i32,
    },
    ProcessingError(String),
    ConnectionLost(String),
}

pub trait Normalize: Send + 'static {
    type Native: Send + core::fmt::Debug + 'static;

    /// Short platform name used in logs.
    fn platform(&self) -> &'static str;

    fn normalize(&self, origin: &Origin, native: Self::Native) -> Vec<Signal>;
}

/// Error signal for a payload that could not be read.
pub(crate) fn malformed(platform: &'static str, origin: &Origin, reason: impl Into<String>) -> Signal {
    let reason = reason.into();
    tracing::warn!(platform, ?origin, reason = %reason, "malformed transport payload");

    match origin {
        Origin::Inventory => Signal::InventoryFailed {
            code: MALFORMED_PAYLOAD_CODE,
            message: Some(reason),
        },
        Origin::Purchase(product_id) => Signal::PurchaseFailed {
            code: MALFORMED_PAYLOAD_CODE,
            product_id: Some(product_id.clone()),
            order_id: None,
        },
        Origin::Restore => Signal::RestoreFailed {
            code: MALFORMED_PAYLOAD_CODE,
        },
        Origin::Unsolicited => Signal::ProcessingError(format!("malformed payload: {reason}")),
    }
}

/// Error signal for an unreadable purchase result.
///
/// A pushed purchase result answers whichever purchase is waiting, so it
/// fails that purchase instead of becoming a bare processing error.
pub(crate) fn malformed_purchase(
    platform: &'static str,
    origin: &Origin,
    reason: impl Into<String>,
) -> Signal {
    match origin {
        Origin::Unsolicited => {
            let reason = reason.into();
            tracing::warn!(platform, reason = %reason, "malformed pushed purchase result");
            Signal::PurchaseFailed {
                code: MALFORMED_PAYLOAD_CODE,
                product_id: None,
                order_id: None,
            }
        }
        _ => malformed(platform, origin, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_maps_to_the_origin_error() {
        let product = ProductId::new("practicemode").unwrap();

        assert!(matches!(
            malformed("test", &Origin::Inventory, "x"),
            Signal::InventoryFailed { code: MALFORMED_PAYLOAD_CODE, .. }
        ));
        assert_eq!(
            malformed("test", &Origin::Purchase(product.clone()), "x"),
            Signal::PurchaseFailed {
                code: MALFORMED_PAYLOAD_CODE,
                product_id: Some(product),
                order_id: None,
            }
        );
        assert_eq!(
            malformed("test", &Origin::Restore, "x"),
            Signal::RestoreFailed { code: MALFORMED_PAYLOAD_CODE }
        );
        assert!(matches!(
            malformed("test", &Origin::Unsolicited, "x"),
            Signal::ProcessingError(_)
        ));
    }

    #[test]
    fn malformed_pushed_purchase_fails_the_waiting_purchase() {
        assert_eq!(
            malformed_purchase("test", &Origin::Unsolicited, "x"),
            Signal::PurchaseFailed {
                code: MALFORMED_PAYLOAD_CODE,
                product_id: None,
                order_id: None,
            }
        );
        assert!(matches!(
            malformed_purchase("test", &Origin::Restore, "x"),
            Signal::RestoreFailed { .. }
        ));
    }
}

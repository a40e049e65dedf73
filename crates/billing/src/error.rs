//! Error types for the billing controller and its transport boundary.

use thiserror::Error;

use billingflow_catalog::LedgerError;
use billingflow_core::ProductId;

/// Platform-independent error codes minted by this crate.
///
/// Platform response codes are passed through unchanged; these are negative
/// so they never collide with them.
pub mod codes {
    /// A transport payload was missing required data or could not be parsed.
    pub const MALFORMED_PAYLOAD_CODE: i32 = -1000;
    /// An inventory query returned no products.
    pub const EMPTY_INVENTORY_CODE: i32 = -1001;
    /// The platform rejected the purchase data during local validation.
    pub const VALIDATION_FAILED_CODE: i32 = -1002;
    /// The transport failed before the platform produced a response code.
    pub const TRANSPORT_UNAVAILABLE_CODE: i32 = -1003;
}

/// Failure reported by a [`BillingTransport`](crate::transport::BillingTransport) call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    /// Raw platform response code.
    pub code: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors returned to application code by [`BillingClient`](crate::controller::BillingClient).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("billing connection failed: {0}")]
    ConnectionFailed(String),

    #[error("billing service is not connected")]
    NotConnected,

    #[error("a purchase of {0} is already in flight")]
    PurchaseAlreadyInFlight(ProductId),

    #[error("inventory query failed with code {code}")]
    InventoryQueryFailed { code: i32, message: Option<String> },

    #[error("purchase failed with code {code}")]
    PurchaseFailed {
        code: i32,
        product_id: Option<ProductId>,
    },

    #[error("restore failed with code {code}")]
    RestoreFailed { code: i32 },

    #[error("malformed transport payload: {0}")]
    MalformedTransportPayload(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The controller shut down or stopped before answering.
    #[error("billing controller closed")]
    Closed,
}

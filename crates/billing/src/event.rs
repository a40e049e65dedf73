//! Domain events published to application subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use billingflow_catalog::{Product, Purchase};
use billingflow_core::ProductId;
use billingflow_events::Event;

/// Event: InventoryLoaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLoaded {
    pub products: Vec<Product>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InventoryError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryError {
    pub code: i32,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseCompleted.
///
/// Published once per order id, after the purchase was written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCompleted {
    pub purchase: Purchase,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseError {
    pub code: i32,
    pub product_id: Option<ProductId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RestoreCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreCompleted {
    /// Purchases newly written to the ledger by this restore.
    pub count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RestoreError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreError {
    pub code: i32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UserCanceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCanceled {
    pub product_id: Option<ProductId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProcessingError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConnectionFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFailed {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEvent {
    InventoryLoaded(InventoryLoaded),
    InventoryError(InventoryError),
    PurchaseCompleted(PurchaseCompleted),
    PurchaseError(PurchaseError),
    RestoreCompleted(RestoreCompleted),
    RestoreError(RestoreError),
    UserCanceled(UserCanceled),
    ProcessingError(ProcessingError),
    ConnectionFailed(ConnectionFailed),
}

impl Event for BillingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BillingEvent::InventoryLoaded(_) => "billing.inventory.loaded",
            BillingEvent::InventoryError(_) => "billing.inventory.error",
            BillingEvent::PurchaseCompleted(_) => "billing.purchase.completed",
            BillingEvent::PurchaseError(_) => "billing.purchase.error",
            BillingEvent::RestoreCompleted(_) => "billing.restore.completed",
            BillingEvent::RestoreError(_) => "billing.restore.error",
            BillingEvent::UserCanceled(_) => "billing.purchase.user_canceled",
            BillingEvent::ProcessingError(_) => "billing.processing_error",
            BillingEvent::ConnectionFailed(_) => "billing.connection.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BillingEvent::InventoryLoaded(e) => e.occurred_at,
            BillingEvent::InventoryError(e) => e.occurred_at,
            BillingEvent::PurchaseCompleted(e) => e.occurred_at,
            BillingEvent::PurchaseError(e) => e.occurred_at,
            BillingEvent::RestoreCompleted(e) => e.occurred_at,
            BillingEvent::RestoreError(e) => e.occurred_at,
            BillingEvent::UserCanceled(e) => e.occurred_at,
            BillingEvent::ProcessingError(e) => e.occurred_at,
            BillingEvent::ConnectionFailed(e) => e.occurred_at,
        }
    }
}

impl BillingEvent {
    pub fn inventory_loaded(products: Vec<Product>) -> Self {
        Self::InventoryLoaded(InventoryLoaded {
            products,
            occurred_at: Utc::now(),
        })
    }

    pub fn inventory_error(code: i32, message: Option<String>) -> Self {
        Self::InventoryError(InventoryError {
            code,
            message,
            occurred_at: Utc::now(),
        })
    }

    pub fn purchase_completed(purchase: Purchase) -> Self {
        Self::PurchaseCompleted(PurchaseCompleted {
            purchase,
            occurred_at: Utc::now(),
        })
    }

    pub fn purchase_error(code: i32, product_id: Option<ProductId>) -> Self {
        Self::PurchaseError(PurchaseError {
            code,
            product_id,
            occurred_at: Utc::now(),
        })
    }

    pub fn restore_completed(count: usize) -> Self {
        Self::RestoreCompleted(RestoreCompleted {
            count,
            occurred_at: Utc::now(),
        })
    }

    pub fn restore_error(code: i32) -> Self {
        Self::RestoreError(RestoreError {
            code,
            occurred_at: Utc::now(),
        })
    }

    pub fn user_canceled(product_id: Option<ProductId>) -> Self {
        Self::UserCanceled(UserCanceled {
            product_id,
            occurred_at: Utc::now(),
        })
    }

    pub fn processing_error(message: impl Into<String>) -> Self {
        Self::ProcessingError(ProcessingError {
            message: message.into(),
            occurred_at: Utc::now(),
        })
    }

    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed(ConnectionFailed {
            reason: reason.into(),
            occurred_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_are_namespaced() {
        let events = [
            BillingEvent::inventory_loaded(vec![]),
            BillingEvent::purchase_error(6, None),
            BillingEvent::restore_completed(0),
            BillingEvent::user_canceled(None),
            BillingEvent::connection_failed("no network"),
        ];
        for e in &events {
            assert!(e.event_type().starts_with("billing."));
            assert_eq!(e.version(), 1);
        }
    }

    #[test]
    fn events_serialize_as_tagged_json() {
        let event = BillingEvent::restore_completed(2);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["RestoreCompleted"]["count"], 2);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use billingflow_core::{Entity, OrderId, ProductId};

/// Opaque platform data attached to a purchase (receipt / signed purchase data).
///
/// Carried through untouched; nothing in this workspace interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformPayload {
    pub data: Option<String>,
    pub signature: Option<String>,
}

impl PlatformPayload {
    pub fn new(data: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            signature: Some(signature.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A confirmed store transaction.
///
/// Created exactly once per order id and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    order_id: OrderId,
    product_id: ProductId,
    purchased_at: DateTime<Utc>,
    payload: PlatformPayload,
}

impl Purchase {
    pub fn new(
        order_id: OrderId,
        product_id: ProductId,
        purchased_at: DateTime<Utc>,
        payload: PlatformPayload,
    ) -> Self {
        Self {
            order_id,
            product_id,
            purchased_at,
            payload,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn purchased_at(&self) -> DateTime<Utc> {
        self.purchased_at
    }

    pub fn payload(&self) -> &PlatformPayload {
        &self.payload
    }
}

impl Entity for Purchase {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.order_id
    }
}

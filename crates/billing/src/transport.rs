//! Contract for the platform billing SDK.
//!
//! A transport wraps one store (Play Billing, StoreKit, or a test double).
//! Requests are answered by the returned futures; transaction updates the
//! platform reports on its own (purchases finishing later, purchases made on
//! another device, connection loss) are pushed through the
//! [`CallbackSink`] handed over at `connect`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use billingflow_catalog::ItemType;
use billingflow_core::{OrderId, ProductId};

use crate::config::BillingConfig;
use crate::error::TransportError;

/// Host activity result forwarded to the transport (Play Billing returns the
/// purchase dialog's outcome through the hosting activity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityResult {
    pub request_code: i32,
    pub result_code: i32,
    pub data: Option<serde_json::Value>,
}

/// Push channel from the transport into the controller.
///
/// Bound to one connection generation; payloads pushed after that connection
/// was released are dropped by the controller.
pub struct CallbackSink<N> {
    generation: u64,
    deliver: Arc<dyn Fn(N) -> bool + Send + Sync>,
}

impl<N> CallbackSink<N> {
    pub(crate) fn new(generation: u64, deliver: impl Fn(N) -> bool + Send + Sync + 'static) -> Self {
        Self {
            generation,
            deliver: Arc::new(deliver),
        }
    }

    /// Deliver a native payload; returns `false` once the controller is gone.
    pub fn push(&self, native: N) -> bool {
        (self.deliver)(native)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<N> Clone for CallbackSink<N> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<N> fmt::Debug for CallbackSink<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BillingTransport: Send + Sync + 'static {
    /// Native payload consumed by the matching [`Normalize`](crate::normalizer::Normalize) adapter.
    type Native: Send + fmt::Debug + 'static;

    /// Connectivity probe; must not block.
    fn network_available(&self) -> bool;

    /// Open the platform connection.
    async fn connect(
        &self,
        config: &BillingConfig,
        sink: CallbackSink<Self::Native>,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self);

    async fn request_products(
        &self,
        product_ids: &[ProductId],
        item_type: ItemType,
    ) -> Result<Self::Native, TransportError>;

    /// Start a purchase. Platforms that answer later return `Ok(None)` and push
    /// the result through the sink.
    async fn request_purchase(
        &self,
        product_id: &ProductId,
        item_type: ItemType,
        developer_payload: &str,
    ) -> Result<Option<Self::Native>, TransportError>;

    /// Resolves once the platform reports the restore finished. Restored
    /// transactions may be returned here, pushed through the sink beforehand,
    /// or both.
    async fn request_restore(&self, item_type: ItemType) -> Result<Vec<Self::Native>, TransportError>;

    /// Finish (consume / acknowledge) a transaction.
    async fn acknowledge(&self, order_id: &OrderId) -> Result<(), TransportError>;

    async fn handle_activity_result(&self, _result: ActivityResult) -> Result<(), TransportError> {
        Ok(())
    }
}

//! In-flight requests awaiting a transport answer.
//!
//! Owned by the controller task, so no locking. Each request hands the
//! caller a oneshot receiver at registration and resolves it when the
//! matching signal arrives.
//!
//! - at most one inventory query and one restore; later callers join them
//! - at most one purchase per product; a second one is rejected

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::debug;

use billingflow_catalog::{Product, Purchase};
use billingflow_core::{ProductId, RequestId};

use crate::error::BillingError;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, BillingError>>;
pub(crate) type Answer<T> = oneshot::Receiver<Result<T, BillingError>>;

/// How a purchase request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Purchased(Purchase),
    Canceled,
    Failed { code: i32 },
}

impl PurchaseOutcome {
    /// `Some(purchase)`, `None` when canceled, or the failure as an error.
    pub fn into_purchase(self, product_id: &ProductId) -> Result<Option<Purchase>, BillingError> {
        match self {
            PurchaseOutcome::Purchased(p) => Ok(Some(p)),
            PurchaseOutcome::Canceled => Ok(None),
            PurchaseOutcome::Failed { code } => Err(BillingError::PurchaseFailed {
                code,
                product_id: Some(product_id.clone()),
            }),
        }
    }
}

/// Whether a request went out to the transport or joined one already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Issued(RequestId),
    Joined(RequestId),
}

fn resolve_all<T: Clone>(waiters: Vec<Reply<T>>, result: Result<T, BillingError>) {
    for waiter in waiters {
        // A caller that stopped waiting is not an error.
        let _ = waiter.send(result.clone());
    }
}

fn elapsed_ms(issued_at: DateTime<Utc>) -> i64 {
    (Utc::now() - issued_at).num_milliseconds()
}

#[derive(Debug)]
pub(crate) struct InventoryRequest {
    pub id: RequestId,
    pub issued_at: DateTime<Utc>,
    waiters: Vec<Reply<Vec<Product>>>,
}

impl InventoryRequest {
    pub fn resolve(self, result: Result<Vec<Product>, BillingError>) {
        debug!(
            request_id = %self.id,
            waiters = self.waiters.len(),
            elapsed_ms = elapsed_ms(self.issued_at),
            ok = result.is_ok(),
            "inventory request resolved"
        );
        resolve_all(self.waiters, result);
    }
}

#[derive(Debug)]
pub(crate) struct PurchaseRequest {
    pub id: RequestId,
    pub product_id: ProductId,
    pub issued_at: DateTime<Utc>,
    waiter: Reply<PurchaseOutcome>,
}

impl PurchaseRequest {
    pub fn resolve(self, result: Result<PurchaseOutcome, BillingError>) {
        debug!(
            request_id = %self.id,
            product_id = %self.product_id,
            elapsed_ms = elapsed_ms(self.issued_at),
            "purchase request resolved"
        );
        let _ = self.waiter.send(result);
    }
}

#[derive(Debug)]
pub(crate) struct RestoreRequest {
    pub id: RequestId,
    pub issued_at: DateTime<Utc>,
    recorded: usize,
    waiters: Vec<Reply<usize>>,
}

impl RestoreRequest {
    /// Purchases newly written to the ledger while this restore was open.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn resolve(self, result: Result<usize, BillingError>) {
        debug!(
            request_id = %self.id,
            waiters = self.waiters.len(),
            elapsed_ms = elapsed_ms(self.issued_at),
            ok = result.is_ok(),
            "restore request resolved"
        );
        resolve_all(self.waiters, result);
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    inventory: Option<InventoryRequest>,
    purchases: HashMap<ProductId, PurchaseRequest>,
    restore: Option<RestoreRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join_inventory(&mut self) -> (Admission, Answer<Vec<Product>>) {
        let (tx, rx) = oneshot::channel();
        match &mut self.inventory {
            Some(pending) => {
                pending.waiters.push(tx);
                debug!(request_id = %pending.id, "joined in-flight inventory query");
                (Admission::Joined(pending.id), rx)
            }
            None => {
                let id = RequestId::new();
                self.inventory = Some(InventoryRequest {
                    id,
                    issued_at: Utc::now(),
                    waiters: vec![tx],
                });
                (Admission::Issued(id), rx)
            }
        }
    }

    pub fn inventory_id(&self) -> Option<RequestId> {
        self.inventory.as_ref().map(|r| r.id)
    }

    pub fn take_inventory(&mut self) -> Option<InventoryRequest> {
        self.inventory.take()
    }

    pub fn begin_purchase(
        &mut self,
        product_id: ProductId,
    ) -> Result<(RequestId, Answer<PurchaseOutcome>), BillingError> {
        if self.purchases.contains_key(&product_id) {
            return Err(BillingError::PurchaseAlreadyInFlight(product_id));
        }

        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.purchases.insert(
            product_id.clone(),
            PurchaseRequest {
                id,
                product_id,
                issued_at: Utc::now(),
                waiter: tx,
            },
        );
        Ok((id, rx))
    }

    pub fn purchase_id(&self, product_id: &ProductId) -> Option<RequestId> {
        self.purchases.get(product_id).map(|r| r.id)
    }

    pub fn take_purchase(&mut self, product_id: &ProductId) -> Option<PurchaseRequest> {
        self.purchases.remove(product_id)
    }

    /// The only pending purchase, when exactly one is open.
    ///
    /// Used to attribute platform failures that do not name a product.
    pub fn sole_purchase(&self) -> Option<ProductId> {
        if self.purchases.len() == 1 {
            self.purchases.keys().next().cloned()
        } else {
            None
        }
    }

    pub fn join_restore(&mut self) -> (Admission, Answer<usize>) {
        let (tx, rx) = oneshot::channel();
        match &mut self.restore {
            Some(pending) => {
                pending.waiters.push(tx);
                debug!(request_id = %pending.id, "joined in-flight restore");
                (Admission::Joined(pending.id), rx)
            }
            None => {
                let id = RequestId::new();
                self.restore = Some(RestoreRequest {
                    id,
                    issued_at: Utc::now(),
                    recorded: 0,
                    waiters: vec![tx],
                });
                (Admission::Issued(id), rx)
            }
        }
    }

    pub fn restore_id(&self) -> Option<RequestId> {
        self.restore.as_ref().map(|r| r.id)
    }

    /// Count a newly recorded restored purchase against the open restore, if any.
    pub fn note_restored(&mut self) {
        if let Some(restore) = &mut self.restore {
            restore.recorded += 1;
        }
    }

    pub fn take_restore(&mut self) -> Option<RestoreRequest> {
        self.restore.take()
    }

    /// Resolve every open request with `error`.
    pub fn fail_all(&mut self, error: BillingError) {
        if let Some(inventory) = self.inventory.take() {
            inventory.resolve(Err(error.clone()));
        }
        for (_, purchase) in self.purchases.drain() {
            purchase.resolve(Err(error.clone()));
        }
        if let Some(restore) = self.restore.take() {
            restore.resolve(Err(error));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inventory.is_none() && self.purchases.is_empty() && self.restore.is_none()
    }
}

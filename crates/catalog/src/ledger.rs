//! Purchase ledger: the application-owned record of confirmed purchases.
//!
//! The controller receives a ledger at construction and appends to it; it
//! never reaches into global state. Entries are keyed by order id and are
//! append-only.

use std::collections::HashSet;
use std::sync::RwLock;

use thiserror::Error;

use billingflow_core::{Entity, OrderId, ProductId};

use crate::purchase::Purchase;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The backing store refused or failed the write.
    #[error("ledger write failed: {0}")]
    WriteFailed(String),

    /// Internal lock poisoning.
    #[error("ledger lock poisoned")]
    Poisoned,
}

/// Outcome of [`PurchaseLedger::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The purchase was appended.
    Appended,
    /// A purchase with the same order id was already present; nothing changed.
    AlreadyPresent,
}

/// Append-only purchase collection, keyed by order id.
///
/// Implementations must be idempotent per order id: recording the same order
/// twice leaves exactly one entry.
pub trait PurchaseLedger: Send + Sync {
    fn contains(&self, order_id: &OrderId) -> bool;

    fn record(&self, purchase: Purchase) -> Result<Recorded, LedgerError>;

    /// Snapshot in insertion order.
    fn purchases(&self) -> Vec<Purchase>;

    /// Whether any recorded purchase is for `product_id`.
    fn owns(&self, product_id: &ProductId) -> bool {
        self.purchases()
            .iter()
            .any(|p| p.product_id() == product_id)
    }
}

/// Insertion-ordered entities, unique by [`Entity::id`].
#[derive(Debug)]
struct LedgerState<E: Entity> {
    entries: Vec<E>,
    index: HashSet<E::Id>,
}

impl<E: Entity> Default for LedgerState<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashSet::new(),
        }
    }
}

impl<E: Entity> LedgerState<E> {
    /// `false` when an entity with the same id is already present.
    fn append(&mut self, entity: E) -> bool {
        if !self.index.insert(entity.id().clone()) {
            return false;
        }
        self.entries.push(entity);
        true
    }
}

/// In-memory ledger (process lifetime only).
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState<Purchase>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PurchaseLedger for InMemoryLedger {
    fn contains(&self, order_id: &OrderId) -> bool {
        self.state
            .read()
            .map(|s| s.index.contains(order_id))
            .unwrap_or(false)
    }

    fn record(&self, purchase: Purchase) -> Result<Recorded, LedgerError> {
        let mut state = self.state.write().map_err(|_| LedgerError::Poisoned)?;

        if state.append(purchase) {
            Ok(Recorded::Appended)
        } else {
            Ok(Recorded::AlreadyPresent)
        }
    }

    fn purchases(&self) -> Vec<Purchase> {
        self.state
            .read()
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }
}

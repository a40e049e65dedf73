//! Product collection shared between the controller (writer) and the UI (readers).

use std::sync::{Arc, RwLock};

use billingflow_core::ProductId;

use crate::product::Product;

/// Read handle on the current product collection.
///
/// Cheap to clone. Application code can read at any time; only the paired
/// [`CatalogWriter`] can change the contents.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    inner: Arc<RwLock<Vec<Product>>>,
}

/// Exclusive write handle, owned by the purchase-flow controller.
#[derive(Debug)]
pub struct CatalogWriter {
    inner: Arc<RwLock<Vec<Product>>>,
}

impl ProductCatalog {
    /// Create an empty catalog and its single writer.
    pub fn new() -> (CatalogWriter, ProductCatalog) {
        let inner = Arc::new(RwLock::new(Vec::new()));
        (
            CatalogWriter {
                inner: Arc::clone(&inner),
            },
            ProductCatalog { inner },
        )
    }

    /// Snapshot of all products.
    pub fn products(&self) -> Vec<Product> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, product_id: &ProductId) -> Option<Product> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|p| &p.product_id == product_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CatalogWriter {
    /// Replace the whole collection (products are never edited in place).
    pub fn replace(&self, products: Vec<Product>) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = products;
    }
}

//! Store catalog and purchase records.
//!
//! Pure data plus the two shared collections the application reads: the
//! product catalog and the purchase ledger.

pub mod catalog;
pub mod ledger;
pub mod product;
pub mod purchase;

pub use catalog::{CatalogWriter, ProductCatalog};
pub use ledger::{InMemoryLedger, LedgerError, PurchaseLedger, Recorded};
pub use product::{ItemType, Product};
pub use purchase::{PlatformPayload, Purchase};

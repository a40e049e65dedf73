//! `billingflow-billing`: platform-agnostic in-app purchase flow.
//!
//! - `controller`: the purchase-flow actor and its client handle
//! - `connection`: connection lifecycle aggregate
//! - `transport`: contract for the platform billing SDK
//! - `normalizer`: Play Billing and StoreKit payload adapters
//! - `pending`: in-flight request bookkeeping
//! - `testing` (feature `test-utils`): scripted transport double

pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod event;
pub mod normalizer;
pub mod pending;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{BillingConfig, ConfigError, LicenseKey};
pub use connection::{Connection, ConnectionState};
pub use controller::{BillingClient, BillingEnvelope, PendingPurchase, PurchaseFlow};
pub use error::{BillingError, TransportError, codes};
pub use event::BillingEvent;
pub use normalizer::{
    Normalize, Origin, PlayBillingNormalizer, PlayCallback, Signal, SkuDetails, StoreKitNormalizer,
    StoreKitNotification,
};
pub use pending::PurchaseOutcome;
pub use transport::{ActivityResult, BillingTransport, CallbackSink};

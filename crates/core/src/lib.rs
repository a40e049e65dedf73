//! `billingflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no IO, no async).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::DomainError;
pub use id::{OrderId, ProductId, RequestId, SessionId};

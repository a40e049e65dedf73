//! Things that keep their identity while their attributes change.

pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Identity used for equality across redeliveries.
    fn id(&self) -> &Self::Id;
}

//! State machines driven by commands and events.

/// Identity and version of a state machine instance.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far.
    fn version(&self) -> u64;
}

/// Pure decide/evolve pair.
///
/// `handle` inspects the current state and returns the events a command
/// produces without touching state; `apply` folds one event in. Neither
/// performs IO: the owner of the aggregate acts on the returned events.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

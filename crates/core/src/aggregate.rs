//! Event-sourced aggregate contract.

use crate::error::{DomainError, DomainResult};

/// Identity and stream position of an aggregate.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events folded into this state so far.
    ///
    /// Equals the stream's last sequence number once rehydrated, and is what
    /// callers pass back as [`ExpectedVersion::Exact`] when appending.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a stream append.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the current stream position.
    Any,
    /// Append only if the stream is exactly at this position.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stream moved on (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Decide/evolve split for event-sourced state.
///
/// `handle` inspects the current state and returns the events a command
/// produces, without mutating anything. `apply` folds a single event into the
/// state and bumps the version by one. Neither may perform IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold a sequence of events in order.
    fn replay<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_only_matches_same_position() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
        assert!(ExpectedVersion::Any.matches(42));

        match ExpectedVersion::Exact(1).check(2) {
            Err(DomainError::Conflict(msg)) => assert!(msg.contains("expected")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}

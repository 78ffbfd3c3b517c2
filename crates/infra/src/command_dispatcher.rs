//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! command ─► load stream ─► rehydrate ─► handle ─► append (expected version) ─► publish
//! ```
//!
//! A [`UnitOfWork`] runs that pipeline for several streams and commits them in
//! one atomic `append_batch`, so a change that spans aggregates (an order and
//! its number claim, every line of a receipt) lands completely or not at all.
//! Publication happens only after the append committed, and follows commit
//! order: projections expect each stream's events in sequence.

use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use stockflow_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, OrganizationId};
use stockflow_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A stream moved between load and append.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Business conflict decided by an aggregate (duplicate number, locked order).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient stock: requested {requested}, on hand {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Stored data contradicts itself (mixed stream types, broken sequence).
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Fan-out to the bus failed. Raised by publication only; a commit
    /// that reaches the store still succeeds.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    /// Worth reloading and deciding again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::OrganizationIsolation(msg) => DispatchError::OrganizationIsolation(msg),
            EventStoreError::AggregateTypeMismatch(msg) | EventStoreError::InvalidAppend(msg) => {
                DispatchError::Integrity(msg)
            }
            other @ EventStoreError::Backend(_) => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => DispatchError::InsufficientStock {
                requested,
                available,
            },
        }
    }
}

/// Aggregate state after a dispatch, with what was appended.
#[derive(Debug, Clone)]
pub struct Committed<A> {
    pub state: A,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    /// Held from append to publish so subscribers see commit order.
    commit_order: Mutex<()>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            commit_order: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate without changing it.
    pub fn load<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(organization_id, aggregate_id)?;
        validate_loaded_stream(organization_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(organization_id, aggregate_id);
        for stored in &history {
            aggregate.apply(&decode::<A>(&stored.payload)?);
        }
        Ok(aggregate)
    }

    /// Run one command against one stream and commit it.
    pub fn dispatch<A>(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<Committed<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        let mut unit = self.unit_of_work(organization_id);
        let state = unit.stage(aggregate_id, aggregate_type, command, make_aggregate)?;
        let events = unit.commit()?;
        Ok(Committed { state, events })
    }

    pub fn unit_of_work(&self, organization_id: OrganizationId) -> UnitOfWork<'_, S, B> {
        UnitOfWork {
            dispatcher: self,
            organization_id,
            streams: Vec::new(),
            observed: Vec::new(),
        }
    }

    fn publish(&self, committed: &[StoredEvent]) -> Result<(), DispatchError> {
        for stored in committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StagedStream {
    aggregate_id: AggregateId,
    aggregate_type: String,
    expected: ExpectedVersion,
    history: Vec<JsonValue>,
    pending: Vec<UncommittedEvent>,
}

/// Commands staged against several streams, committed atomically.
///
/// Staging the same stream twice continues from the state the first command
/// left it in; the stream is still checked against the version it had when it
/// was first loaded. Streams read through [`UnitOfWork::observe`] are checked
/// too, without being written.
#[derive(Debug)]
pub struct UnitOfWork<'a, S, B> {
    dispatcher: &'a CommandDispatcher<S, B>,
    organization_id: OrganizationId,
    streams: Vec<StagedStream>,
    observed: Vec<(AggregateId, u64)>,
}

impl<S, B> UnitOfWork<'_, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    /// Decide `command` and keep its events for [`UnitOfWork::commit`].
    ///
    /// Returns the aggregate state including the staged events.
    pub fn stage<A>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockflow_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        let idx = self.stream_index(aggregate_id, &aggregate_type)?;
        let organization_id = self.organization_id;
        let staged = &mut self.streams[idx];

        let mut aggregate = make_aggregate(organization_id, aggregate_id);
        for payload in staged.history.iter().chain(staged.pending.iter().map(|e| &e.payload)) {
            aggregate.apply(&decode::<A>(payload)?);
        }

        let decided = aggregate.handle(&command)?;
        for ev in &decided {
            staged.pending.push(UncommittedEvent::from_typed(
                organization_id,
                aggregate_id,
                aggregate_type.clone(),
                Uuid::now_v7(),
                ev,
            )?);
            aggregate.apply(ev);
        }

        Ok(aggregate)
    }

    /// Rehydrate a stream the staged decisions depend on but do not change.
    ///
    /// The commit fails with [`DispatchError::Concurrency`] if the stream
    /// moved in the meantime. The check runs under the dispatcher's commit
    /// lock, so it covers writers sharing this dispatcher.
    pub fn observe<A>(
        &mut self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(OrganizationId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self
            .dispatcher
            .store
            .load_stream(self.organization_id, aggregate_id)?;
        validate_loaded_stream(self.organization_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(self.organization_id, aggregate_id);
        for stored in &history {
            aggregate.apply(&decode::<A>(&stored.payload)?);
        }
        self.observed.push((aggregate_id, stream_version(&history)));
        Ok(aggregate)
    }

    /// Number of events waiting to be committed.
    pub fn pending_events(&self) -> usize {
        self.streams.iter().map(|s| s.pending.len()).sum()
    }

    /// Append every staged stream in one batch, then publish.
    ///
    /// Once the append succeeds the events are returned even if publication
    /// fails; the failure is logged and read models lag until rebuilt.
    pub fn commit(self) -> Result<Vec<StoredEvent>, DispatchError> {
        let batch: Vec<StreamAppend> = self
            .streams
            .into_iter()
            .filter(|s| !s.pending.is_empty())
            .map(|s| StreamAppend {
                events: s.pending,
                expected_version: s.expected,
            })
            .collect();

        if batch.is_empty() {
            return Ok(vec![]);
        }

        // The guard protects no data, so a poisoned lock is still usable.
        let _order = self
            .dispatcher
            .commit_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (aggregate_id, version) in &self.observed {
            let current = stream_version(
                &self
                    .dispatcher
                    .store
                    .load_stream(self.organization_id, *aggregate_id)?,
            );
            if current != *version {
                return Err(DispatchError::Concurrency(format!(
                    "stream {aggregate_id} moved from version {version} to {current} after it was read"
                )));
            }
        }
        let committed = self.dispatcher.store.append_batch(batch)?;
        debug!(
            organization_id = %self.organization_id,
            events = committed.len(),
            "unit of work committed"
        );
        if let Err(err) = self.dispatcher.publish(&committed) {
            warn!(
                organization_id = %self.organization_id,
                events = committed.len(),
                error = %err,
                "committed events were not published"
            );
        }
        Ok(committed)
    }

    fn stream_index(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<usize, DispatchError> {
        if let Some(idx) = self.streams.iter().position(|s| s.aggregate_id == aggregate_id) {
            if self.streams[idx].aggregate_type != aggregate_type {
                return Err(DispatchError::Integrity(format!(
                    "stream {aggregate_id} staged as '{}' and '{aggregate_type}'",
                    self.streams[idx].aggregate_type
                )));
            }
            return Ok(idx);
        }

        let history = self
            .dispatcher
            .store
            .load_stream(self.organization_id, aggregate_id)?;
        validate_loaded_stream(self.organization_id, aggregate_id, &history)?;
        if let Some(first) = history.first() {
            if first.aggregate_type != aggregate_type {
                return Err(DispatchError::Integrity(format!(
                    "stream {aggregate_id} is '{}', not '{aggregate_type}'",
                    first.aggregate_type
                )));
            }
        }

        self.streams.push(StagedStream {
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            expected: ExpectedVersion::Exact(stream_version(&history)),
            history: history.into_iter().map(|e| e.payload).collect(),
            pending: Vec::new(),
        });
        Ok(self.streams.len() - 1)
    }
}

/// Run `op` again while it fails with a concurrency conflict, up to `max_retries` extra attempts.
pub fn retry_on_conflict<T>(
    max_retries: u32,
    mut op: impl FnMut() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(attempt, error = %err, "retrying after concurrent modification");
            }
            other => return other,
        }
    }
}

fn decode<A>(payload: &JsonValue) -> Result<A::Event, DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    serde_json::from_value(payload.clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Reject streams a faulty backend could hand back: foreign organization or
/// aggregate, or a sequence that is not 1, 2, 3, ...
fn validate_loaded_stream(
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    for (idx, e) in stream.iter().enumerate() {
        if e.organization_id != organization_id {
            return Err(DispatchError::OrganizationIsolation(format!(
                "loaded stream contains wrong organization_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Integrity(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != idx as u64 + 1 {
            return Err(DispatchError::Integrity(format!(
                "stream {aggregate_id} has sequence_number {} at index {idx}",
                e.sequence_number
            )));
        }
    }
    Ok(())
}

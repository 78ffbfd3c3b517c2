use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockflow_core::{AggregateId, ExpectedVersion, OrganizationId};
use std::sync::Arc;

/// An event ready to be appended (sequence number not yet assigned).
///
/// Built from a typed domain event with [`UncommittedEvent::from_typed`], which
/// serializes the payload and captures the metadata needed to decode it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub organization_id: OrganizationId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A persisted event with its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub organization_id: OrganizationId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the `(organization_id, aggregate_id)` stream, starting at 1.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Envelope handed to the event bus.
    pub fn to_envelope(&self) -> stockflow_events::EventEnvelope<JsonValue> {
        stockflow_events::EventEnvelope::new(
            self.event_id,
            self.organization_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Events for one stream plus the version that stream must be at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Some stream was not at its expected version.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// Storage unreachable or failed outside the append rules.
    #[error("event store backend failure: {0}")]
    Backend(String),
}

/// Append-only, organization-scoped event store.
///
/// A stream is keyed by `(organization_id, aggregate_id)` and keeps one
/// aggregate type for its whole life. Appends are all-or-nothing: every stream
/// in a batch is checked against its expected version and either every event
/// is stored or none is.
pub trait EventStore: Send + Sync {
    /// Atomically append to one or more streams.
    ///
    /// Returns the stored events in batch order.
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Full stream in sequence order; empty if the stream does not exist.
    fn load_stream(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Ids of every stream of `aggregate_type` in the organization.
    fn stream_ids(
        &self,
        organization_id: OrganizationId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError>;

    /// Every stored event in commit order (read-model rebuilds).
    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append to a single stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_batch(vec![StreamAppend {
            events,
            expected_version,
        }])
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_batch(batch)
    }

    fn load_stream(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(organization_id, aggregate_id)
    }

    fn stream_ids(
        &self,
        organization_id: OrganizationId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        (**self).stream_ids(organization_id, aggregate_type)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all()
    }
}

impl UncommittedEvent {
    pub fn from_typed<E>(
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: stockflow_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            organization_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// Checks shared by every backend: each stream entry is non-empty and all its
/// events agree on organization, aggregate and type; no stream appears twice;
/// the whole batch belongs to one organization.
pub(crate) fn validate_batch(batch: &[StreamAppend]) -> Result<(), EventStoreError> {
    let mut seen = std::collections::HashSet::new();
    let mut organization: Option<OrganizationId> = None;

    for (stream_idx, entry) in batch.iter().enumerate() {
        let Some(first) = entry.events.first() else {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream entry {stream_idx} has no events"
            )));
        };

        match organization {
            None => organization = Some(first.organization_id),
            Some(org) if org != first.organization_id => {
                return Err(EventStoreError::OrganizationIsolation(format!(
                    "batch spans multiple organizations (stream entry {stream_idx})"
                )));
            }
            Some(_) => {}
        }

        if !seen.insert(first.aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {} appears twice in one batch",
                first.aggregate_id
            )));
        }

        for (idx, e) in entry.events.iter().enumerate() {
            if e.organization_id != first.organization_id {
                return Err(EventStoreError::OrganizationIsolation(format!(
                    "stream entry {stream_idx} contains multiple organization_ids (index {idx})"
                )));
            }
            if e.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream entry {stream_idx} contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream entry {stream_idx} contains multiple aggregate_types (index {idx})"
                )));
            }
        }
    }

    Ok(())
}

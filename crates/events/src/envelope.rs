use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{AggregateId, OrganizationId};

/// An event as it sits in a stream: payload plus organization and stream position.
///
/// `sequence_number` starts at 1 and increases by one per event within the
/// `(organization_id, aggregate_id)` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    organization_id: OrganizationId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            organization_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Same envelope with the payload transformed (e.g. JSON into a typed event).
    pub fn try_map<F, T, Err>(self, f: F) -> Result<EventEnvelope<T>, Err>
    where
        F: FnOnce(E) -> Result<T, Err>,
    {
        Ok(EventEnvelope {
            event_id: self.event_id,
            organization_id: self.organization_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            sequence_number: self.sequence_number,
            payload: f(self.payload)?,
        })
    }
}

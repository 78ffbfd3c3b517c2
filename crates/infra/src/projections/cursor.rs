//! Per-stream projection cursors.
//!
//! Each projection tracks the last applied `sequence_number` per
//! `(organization, aggregate)` stream. Replays at or below the cursor are
//! ignored, which makes projections safe under at-least-once delivery.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockflow_core::{AggregateId, OrganizationId};
use stockflow_events::EventEnvelope;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("organization isolation violation: {0}")]
    OrganizationIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state unavailable")]
    Unavailable,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: Mutex<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` if `envelope` is the next event of its stream.
    ///
    /// The cursor lock is held while `apply` runs, so two deliveries of the
    /// same event cannot both be applied. A stream starts at sequence 1 and
    /// each event must follow the last applied one; a gap is an error rather
    /// than a skip, so a read model never silently loses earlier events.
    pub fn advance(
        &self,
        envelope: &EventEnvelope<JsonValue>,
        apply: impl FnOnce() -> Result<(), ProjectionError>,
    ) -> Result<(), ProjectionError> {
        let mut cursors = self.inner.lock().map_err(|_| ProjectionError::Unavailable)?;
        let key = CursorKey {
            organization_id: envelope.organization_id(),
            aggregate_id: envelope.aggregate_id(),
        };
        let last = cursors.get(&key).copied().unwrap_or(0);
        let seq = envelope.sequence_number();

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(key, seq);
        Ok(())
    }

    pub fn position(&self, organization_id: OrganizationId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .lock()
            .ok()
            .and_then(|c| {
                c.get(&CursorKey {
                    organization_id,
                    aggregate_id,
                })
                .copied()
            })
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.inner.lock() {
            cursors.clear();
        }
    }
}

pub(crate) fn ensure_scope(
    envelope: &EventEnvelope<JsonValue>,
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
) -> Result<(), ProjectionError> {
    if organization_id != envelope.organization_id() {
        return Err(ProjectionError::OrganizationIsolation(
            "event organization_id does not match envelope organization_id".to_string(),
        ));
    }
    if aggregate_id != envelope.aggregate_id() {
        return Err(ProjectionError::OrganizationIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

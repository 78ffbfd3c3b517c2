use std::collections::HashMap;
use std::sync::RwLock;

use stockflow_core::{AggregateId, OrganizationId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, validate_batch};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<StoredEvent>>,
    /// Commit order across streams: (stream, index within stream).
    log: Vec<(StreamKey, usize)>,
}

/// In-memory append-only event store for tests/dev.
///
/// One write lock covers a whole batch, which makes multi-stream appends atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

fn poisoned() -> EventStoreError {
    EventStoreError::Backend("lock poisoned".to_string())
}

impl EventStore for InMemoryEventStore {
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batch: Vec<StreamAppend> = batch.into_iter().filter(|s| !s.events.is_empty()).collect();
        if batch.is_empty() {
            return Ok(vec![]);
        }
        validate_batch(&batch)?;

        let mut inner = self.inner.write().map_err(|_| poisoned())?;

        // Check every stream before touching any of them.
        for entry in &batch {
            let first = &entry.events[0];
            let key = StreamKey {
                organization_id: first.organization_id,
                aggregate_id: first.aggregate_id,
            };
            let stream = inner.streams.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !entry.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    key.aggregate_id, entry.expected_version
                )));
            }

            if let Some(existing) = stream.first() {
                if existing.aggregate_type != first.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, first.aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for entry in batch {
            let first = &entry.events[0];
            let key = StreamKey {
                organization_id: first.organization_id,
                aggregate_id: first.aggregate_id,
            };

            let Inner { streams, log } = &mut *inner;
            let stream = streams.entry(key).or_default();
            let mut next = Self::current_version(stream) + 1;

            for e in entry.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    organization_id: e.organization_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                log.push((key, stream.len()));
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            organization_id,
            aggregate_id,
        };

        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.streams.get(&key).cloned().unwrap_or_default())
    }

    fn stream_ids(
        &self,
        organization_id: OrganizationId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut ids: Vec<AggregateId> = inner
            .streams
            .iter()
            .filter(|(key, stream)| {
                key.organization_id == organization_id
                    && stream.first().is_some_and(|e| e.aggregate_type == aggregate_type)
            })
            .map(|(key, _)| key.aggregate_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .log
            .iter()
            .filter_map(|(key, idx)| inner.streams.get(key).and_then(|s| s.get(*idx)).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::Utc;
    use stockflow_core::ExpectedVersion;
    use uuid::Uuid;

    fn event(org: OrganizationId, aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            organization_id: org,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn append_assigns_sequence_numbers_per_stream() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(org, id, "t"), event(org, id, "t")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store.append(vec![event(org, id, "t")], ExpectedVersion::Exact(2)).unwrap();

        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second[0].sequence_number, 3);
        assert_eq!(store.load_stream(org, id).unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let id = AggregateId::new();
        store.append(vec![event(org, id, "t")], ExpectedVersion::Exact(0)).unwrap();

        let result = store.append(vec![event(org, id, "t")], ExpectedVersion::Exact(0));
        assert!(matches!(result, Err(EventStoreError::Concurrency(_))));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(org, b, "t")], ExpectedVersion::Exact(0)).unwrap();

        let result = store.append_batch(vec![
            StreamAppend {
                events: vec![event(org, a, "t")],
                expected_version: ExpectedVersion::Exact(0),
            },
            StreamAppend {
                events: vec![event(org, b, "t")],
                expected_version: ExpectedVersion::Exact(0),
            },
        ]);

        assert!(matches!(result, Err(EventStoreError::Concurrency(_))));
        assert!(store.load_stream(org, a).unwrap().is_empty());
        assert_eq!(store.load_stream(org, b).unwrap().len(), 1);
    }

    #[test]
    fn batch_cannot_span_organizations() {
        let store = InMemoryEventStore::new();
        let result = store.append_batch(vec![
            StreamAppend {
                events: vec![event(OrganizationId::new(), AggregateId::new(), "t")],
                expected_version: ExpectedVersion::Exact(0),
            },
            StreamAppend {
                events: vec![event(OrganizationId::new(), AggregateId::new(), "t")],
                expected_version: ExpectedVersion::Exact(0),
            },
        ]);
        assert!(matches!(result, Err(EventStoreError::OrganizationIsolation(_))));
    }

    #[test]
    fn streams_are_isolated_by_organization() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let id = AggregateId::new();
        store.append(vec![event(org, id, "t")], ExpectedVersion::Exact(0)).unwrap();

        assert!(store.load_stream(OrganizationId::new(), id).unwrap().is_empty());
        assert!(store.stream_ids(OrganizationId::new(), "t").unwrap().is_empty());
    }

    #[test]
    fn stream_type_is_fixed_and_listable() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(org, a, "item")], ExpectedVersion::Exact(0)).unwrap();
        store.append(vec![event(org, b, "order")], ExpectedVersion::Exact(0)).unwrap();

        assert_eq!(store.stream_ids(org, "item").unwrap(), vec![a]);
        assert!(matches!(
            store.append(vec![event(org, a, "order")], ExpectedVersion::Any),
            Err(EventStoreError::AggregateTypeMismatch(_))
        ));
    }

    #[test]
    fn load_all_preserves_commit_order() {
        let store = InMemoryEventStore::new();
        let org = OrganizationId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(org, a, "t")], ExpectedVersion::Any).unwrap();
        store.append(vec![event(org, b, "t")], ExpectedVersion::Any).unwrap();
        store.append(vec![event(org, a, "t")], ExpectedVersion::Any).unwrap();

        let order: Vec<_> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|e| (e.aggregate_id, e.sequence_number))
            .collect();
        assert_eq!(order, vec![(a, 1), (b, 1), (a, 2)]);
    }
}

//! Postgres-backed event store.
//!
//! Schema lives in `migrations/0001_event_store.sql`. Error mapping:
//!
//! | sqlx error | Postgres code | `EventStoreError` |
//! |---|---|---|
//! | unique violation | `23505` | `Concurrency` (someone appended the same sequence number first) |
//! | deadlock / serialization failure | `40P01` / `40001` | `Concurrency` |
//! | check / FK violation | `23514` / `23503` | `InvalidAppend` |
//! | any other database error | * | `Backend` |
//! | pool closed, IO, TLS | n/a | `Backend` |

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::sync::Arc;
use tracing::{Span, instrument};

use stockflow_core::{AggregateId, OrganizationId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, validate_batch};

/// Append-only event store over a single `events` table.
///
/// A batch runs in one transaction. Every stream of the batch is locked up
/// front with a transaction scoped advisory lock, in `(organization,
/// aggregate)` order so overlapping batches cannot deadlock, and the unique
/// `(organization_id, aggregate_id, sequence_number)` constraint backs that up,
/// so two writers racing on a stream cannot both commit.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the bundled schema.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        sqlx::raw_sql(include_str!("../../migrations/0001_event_store.sql"))
            .execute(&pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(Self::new(pool))
    }

    #[instrument(
        skip(self),
        fields(
            organization_id = %organization_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            event_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn load_stream_async(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, organization_id, aggregate_id, aggregate_type, sequence_number,
                   event_type, event_version, occurred_at, payload
            FROM events
            WHERE organization_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let events = rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self, batch), fields(streams = batch.len(), committed_events = tracing::field::Empty), err)]
    pub async fn append_batch_async(
        &self,
        batch: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batch: Vec<StreamAppend> = batch.into_iter().filter(|s| !s.events.is_empty()).collect();
        if batch.is_empty() {
            return Ok(vec![]);
        }
        validate_batch(&batch)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for (organization_id, aggregate_id) in lock_order(&batch) {
            lock_stream(&mut tx, organization_id, aggregate_id).await?;
        }

        let mut committed = Vec::new();
        for entry in batch {
            let organization_id = entry.events[0].organization_id;
            let aggregate_id = entry.events[0].aggregate_id;
            let aggregate_type = entry.events[0].aggregate_type.clone();

            let (current, existing_type) =
                check_stream_version(&mut tx, organization_id, aggregate_id).await?;

            if let Some(existing) = existing_type {
                if existing != aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                    )));
                }
            }
            if !entry.expected_version.matches(current) {
                // Dropping the transaction rolls it back.
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current}",
                    entry.expected_version
                )));
            }

            let mut next = current + 1;
            for event in entry.events {
                sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id, organization_id, aggregate_id, aggregate_type, sequence_number,
                        event_type, event_version, occurred_at, payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(event.event_id)
                .bind(organization_id.as_uuid())
                .bind(aggregate_id.as_uuid())
                .bind(&aggregate_type)
                .bind(next as i64)
                .bind(&event.event_type)
                .bind(event.event_version as i32)
                .bind(event.occurred_at)
                .bind(&event.payload)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        EventStoreError::Concurrency(format!(
                            "stream {aggregate_id}: sequence_number {next} already exists"
                        ))
                    } else {
                        map_sqlx_error("insert_event", e)
                    }
                })?;

                committed.push(StoredEvent {
                    event_id: event.event_id,
                    organization_id,
                    aggregate_id,
                    aggregate_type: aggregate_type.clone(),
                    sequence_number: next,
                    event_type: event.event_type,
                    event_version: event.event_version,
                    occurred_at: event.occurred_at,
                    payload: event.payload,
                });
                next += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_events", committed.len());
        Ok(committed)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id.as_uuid()), err)]
    pub async fn stream_ids_async(
        &self,
        organization_id: OrganizationId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT aggregate_id
            FROM events
            WHERE organization_id = $1 AND aggregate_type = $2
            ORDER BY aggregate_id
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(aggregate_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stream_ids", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("aggregate_id")
                    .map(AggregateId::from_uuid)
                    .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_id: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self), fields(event_count = tracing::field::Empty), err)]
    pub async fn load_all_async(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, organization_id, aggregate_id, aggregate_type, sequence_number,
                   event_type, event_version, occurred_at, payload
            FROM events
            ORDER BY global_position ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all", e))?;

        let events = rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }
}

/// Serialize writers of one stream for the rest of the transaction.
/// Streams of a batch in the order their locks are taken.
fn lock_order(batch: &[StreamAppend]) -> Vec<(OrganizationId, AggregateId)> {
    let mut keys: Vec<_> = batch
        .iter()
        .filter_map(|entry| entry.events.first())
        .map(|e| (e.organization_id, e.aggregate_id))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

async fn lock_stream(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
) -> Result<(), EventStoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{organization_id}/{aggregate_id}"))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stream", e))?;
    Ok(())
}

/// `(current_version, aggregate_type)`; version 0 and `None` for a new stream.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: OrganizationId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence_number), 0) AS current_version,
               MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE organization_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(organization_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((current.max(0) as u64, aggregate_type))
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e: sqlx::Error| EventStoreError::Backend(format!("failed to decode event row: {e}"));

    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(read)?,
        organization_id: OrganizationId::from_uuid(row.try_get("organization_id").map_err(read)?),
        aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id").map_err(read)?),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        sequence_number: sequence_number as u64,
        event_type: row.try_get("event_type").map_err(read)?,
        event_version: event_version as u32,
        occurred_at,
        payload: row.try_get("payload").map_err(read)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            classify_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Conflicts a retry can resolve map to `Concurrency`.
fn classify_sqlstate(code: Option<&str>, msg: String) -> EventStoreError {
    match code {
        Some("23505") | Some("40P01") | Some("40001") => EventStoreError::Concurrency(msg),
        Some("23503") | Some("23514") => EventStoreError::InvalidAppend(msg),
        _ => EventStoreError::Backend(msg),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

/// Drive a store future from the synchronous `EventStore` API.
///
/// Callers run on a blocking-capable thread of a multi-threaded tokio runtime
/// (the HTTP layer dispatches writes through `spawn_blocking`).
fn run<F, T>(fut: F) -> Result<T, EventStoreError>
where
    F: Future<Output = Result<T, EventStoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        EventStoreError::Backend("PostgresEventStore must be used inside a tokio runtime".to_string())
    })?;
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl EventStore for PostgresEventStore {
    fn append_batch(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        run(self.append_batch_async(batch))
    }

    fn load_stream(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        run(self.load_stream_async(organization_id, aggregate_id))
    }

    fn stream_ids(
        &self,
        organization_id: OrganizationId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        run(self.stream_ids_async(organization_id, aggregate_type))
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        run(self.load_all_async())
    }
}

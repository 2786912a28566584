use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ScyllaConfig;
use crate::event_sourcing::core::{EventStoreError, ProjectionError, RawEnvelope, StreamId};
use crate::event_sourcing::projection::ReadModelStore;

use super::event_log::{CommittedStream, EventLog, StreamAppend};

// ============================================================================
// ScyllaDB Event Log
// ============================================================================
//
// Schema:
// - event_log:   one partition per stream, clustered by sequence_number
// - read_models: one row per (projection, read model id), JSON document
//
// Appends are lightweight transactions: every event row is inserted
// `IF NOT EXISTS`, so a writer that lost the race to the same sequence
// numbers gets a batch that is not applied at all. Conditional batches must
// stay inside one partition, so a unit of work here covers a single stream.
//
// ============================================================================

const CREATE_EVENT_LOG: &str = "CREATE TABLE IF NOT EXISTS event_log (
    stream_id text,
    sequence_number bigint,
    event_id uuid,
    event_type text,
    event_version int,
    payload text,
    correlation_id uuid,
    causation_id uuid,
    user_id uuid,
    metadata map<text, text>,
    occurred_at timestamp,
    PRIMARY KEY (stream_id, sequence_number)
) WITH CLUSTERING ORDER BY (sequence_number ASC)";

const CREATE_READ_MODELS: &str = "CREATE TABLE IF NOT EXISTS read_models (
    projection text,
    id text,
    document text,
    updated_at timestamp,
    PRIMARY KEY ((projection, id))
)";

const INSERT_EVENT: &str = "INSERT INTO event_log (
    stream_id, sequence_number, event_id, event_type, event_version,
    payload, correlation_id, causation_id, user_id, metadata, occurred_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS";

const SELECT_STREAM: &str = "SELECT stream_id, sequence_number, event_id, event_type, event_version,
        payload, correlation_id, causation_id, user_id, metadata, occurred_at
 FROM event_log
 WHERE stream_id = ?
 ORDER BY sequence_number ASC";

const SELECT_TAIL: &str = "SELECT sequence_number FROM event_log
 WHERE stream_id = ?
 ORDER BY sequence_number DESC
 LIMIT 1";

type EventRow = (
    String,
    i64,
    Uuid,
    String,
    i32,
    String,
    Uuid,
    Option<Uuid>,
    Option<Uuid>,
    Option<HashMap<String, String>>,
    DateTime<Utc>,
);

/// Open a session for the configured cluster and make sure keyspace and tables exist
pub async fn connect(config: &ScyllaConfig) -> Result<Arc<Session>, EventStoreError> {
    tracing::info!(known_node = %config.known_node, keyspace = %config.keyspace, "Connecting to ScyllaDB...");

    let session: Session = SessionBuilder::new()
        .known_node(&config.known_node)
        .build()
        .await
        .map_err(EventStoreError::backend)?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                config.keyspace, config.replication_factor
            ),
            &[],
        )
        .await
        .map_err(EventStoreError::backend)?;

    session
        .use_keyspace(&config.keyspace, false)
        .await
        .map_err(EventStoreError::backend)?;

    for statement in [CREATE_EVENT_LOG, CREATE_READ_MODELS] {
        session
            .query_unpaged(statement, &[])
            .await
            .map_err(EventStoreError::backend)?;
    }

    Ok(Arc::new(session))
}

pub struct ScyllaEventLog {
    session: Arc<Session>,
}

impl ScyllaEventLog {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl EventLog for ScyllaEventLog {
    async fn append(&self, appends: Vec<StreamAppend>) -> Result<Vec<CommittedStream>, EventStoreError> {
        let mut appends = appends.into_iter();
        let append = match (appends.next(), appends.len()) {
            (None, _) => return Ok(Vec::new()),
            (Some(append), 0) => append,
            (Some(_), remaining) => return Err(EventStoreError::CrossStreamCommit(remaining + 1)),
        };

        append.validate()?;

        // Check optimistic concurrency before paying for the LWT round
        let current_version = self.stream_version(&append.stream_id).await?;
        if current_version != append.expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id: append.stream_id,
                expected: append.expected_version,
                actual: current_version,
            });
        }

        let mut batch = Batch::default();
        let mut values = Vec::with_capacity(append.events.len());
        for envelope in &append.events {
            batch.append_statement(INSERT_EVENT);
            values.push(to_row(envelope)?);
        }

        let result = self
            .session
            .batch(&batch, values)
            .await
            .map_err(EventStoreError::backend)?;

        let applied = result
            .into_rows_result()
            .map_err(EventStoreError::backend)?
            .first_row::<Row>()
            .map_err(EventStoreError::backend)
            .map(|row| lwt_applied(&row))?;

        if !applied {
            let actual = self.stream_version(&append.stream_id).await?;
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id: append.stream_id,
                expected: append.expected_version,
                actual,
            });
        }

        Ok(vec![CommittedStream {
            version: append.next_version(),
            event_count: append.events.len(),
            stream_id: append.stream_id,
        }])
    }

    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<RawEnvelope>, EventStoreError> {
        let result = self
            .session
            .query_unpaged(SELECT_STREAM, (stream_id.as_str(),))
            .await
            .map_err(EventStoreError::backend)?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events), // No rows
        };

        for row in rows_result.rows::<EventRow>().map_err(EventStoreError::backend)? {
            let row = row.map_err(EventStoreError::backend)?;
            events.push(from_row(row)?);
        }

        tracing::debug!("Loaded {} events for stream {}", events.len(), stream_id);
        Ok(events)
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        let result = self
            .session
            .query_unpaged(SELECT_TAIL, (stream_id.as_str(),))
            .await
            .map_err(EventStoreError::backend)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(0), // No rows = new stream
        };

        match rows_result.maybe_first_row::<(i64,)>() {
            Ok(Some((version,))) => to_sequence(stream_id, version),
            Ok(None) => Ok(0),
            Err(e) => Err(EventStoreError::backend(e)),
        }
    }
}

fn lwt_applied(row: &Row) -> bool {
    matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true))))
}

fn to_row(envelope: &RawEnvelope) -> Result<EventRow, EventStoreError> {
    let sequence_number = i64::try_from(envelope.sequence_number).map_err(|_| {
        EventStoreError::Backend(format!(
            "sequence number {} does not fit a bigint",
            envelope.sequence_number
        ))
    })?;

    Ok((
        envelope.stream_id.as_str().to_string(),
        sequence_number,
        envelope.event_id,
        envelope.event_type.clone(),
        envelope.event_version,
        serde_json::to_string(&envelope.event_data)?,
        envelope.correlation_id,
        envelope.causation_id,
        envelope.user_id,
        Some(envelope.metadata.clone()),
        envelope.occurred_at,
    ))
}

fn from_row(row: EventRow) -> Result<RawEnvelope, EventStoreError> {
    let (
        stream_id,
        sequence_number,
        event_id,
        event_type,
        event_version,
        payload,
        correlation_id,
        causation_id,
        user_id,
        metadata,
        occurred_at,
    ) = row;
    let stream_id = StreamId::from(stream_id);

    Ok(RawEnvelope {
        event_id,
        sequence_number: to_sequence(&stream_id, sequence_number)?,
        stream_id,
        event_type,
        event_version,
        event_data: serde_json::from_str(&payload)?,
        correlation_id,
        causation_id,
        user_id,
        occurred_at,
        metadata: metadata.unwrap_or_default(),
    })
}

fn to_sequence(stream_id: &StreamId, value: i64) -> Result<u64, EventStoreError> {
    u64::try_from(value).map_err(|_| {
        EventStoreError::Backend(format!("stream {stream_id} holds negative sequence number {value}"))
    })
}

// ============================================================================
// ScyllaDB Read Model Store
// ============================================================================

/// JSON documents for one projection; each `put` is a single-row upsert
pub struct ScyllaReadModelStore<M> {
    session: Arc<Session>,
    projection: String,
    _phantom: PhantomData<fn() -> M>,
}

impl<M> ScyllaReadModelStore<M> {
    pub fn new(session: Arc<Session>, projection: &str) -> Self {
        Self {
            session,
            projection: projection.to_string(),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<M> ReadModelStore<M> for ScyllaReadModelStore<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Result<Option<M>, ProjectionError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT document FROM read_models WHERE projection = ? AND id = ?",
                (self.projection.as_str(), id),
            )
            .await
            .map_err(ProjectionError::store)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        match rows_result.maybe_first_row::<(String,)>() {
            Ok(Some((document,))) => Ok(Some(serde_json::from_str(&document)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ProjectionError::store(e)),
        }
    }

    async fn put(&self, id: &str, model: M) -> Result<(), ProjectionError> {
        let document = serde_json::to_string(&model)?;

        self.session
            .query_unpaged(
                "INSERT INTO read_models (projection, id, document, updated_at) VALUES (?, ?, ?, ?)",
                (self.projection.as_str(), id, document, Utc::now()),
            )
            .await
            .map_err(ProjectionError::store)?;

        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
//
// Statements against a live cluster are exercised by integration runs with a
// ScyllaDB container; the row mapping is covered here.
//
// ============================================================================

//! Persistent record of dispatches that ended in failure.
//!
//! Two outcomes are recorded: a fatal rejection of a generation request, and
//! exhaustion of the combination budget. Retriable per-attempt failures are
//! traced, never recorded here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genrelay_core::{Provenance, ServiceType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::rest::RestStore;

/// Table failure records are inserted into.
const FAILURES_TABLE: &str = "generation_failures";

/// What ended the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Content rejected upstream.
    Fatal,
    /// Every combination in the budget failed.
    Exhausted,
}

/// One failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Record id.
    pub id: Uuid,
    /// When the dispatch gave up.
    pub recorded_at: DateTime<Utc>,
    /// What ended the dispatch.
    pub kind: FailureKind,
    /// Caller-supplied log context.
    pub log_context: String,
    /// Service the request targeted.
    pub service_type: ServiceType,
    /// Request path below the service prefix.
    pub relative_path: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Terminal error message.
    pub message: String,
    /// Token provenance of the failing attempt, for fatal rejections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Server of the failing attempt, for fatal rejections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// HTTP status of the failing attempt, if one arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Username of the current user, or `unknown`.
    pub username: String,
}

impl FailureRecord {
    /// New record stamped with a fresh id and the current time.
    pub fn new(
        kind: FailureKind,
        service_type: ServiceType,
        relative_path: impl Into<String>,
        log_context: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            kind,
            log_context: log_context.into(),
            service_type,
            relative_path: relative_path.into(),
            attempts,
            message: message.into(),
            provenance: None,
            server: None,
            http_status: None,
            username: "unknown".into(),
        }
    }
}

/// Sink for failure records.
#[async_trait]
pub trait FailureLog: Send + Sync {
    /// Persist one record.
    async fn record(&self, record: FailureRecord) -> Result<(), RemoteError>;
}

/// Emits each record as a structured `error!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureLog;

#[async_trait]
impl FailureLog for TracingFailureLog {
    async fn record(&self, record: FailureRecord) -> Result<(), RemoteError> {
        tracing::error!(
            id = %record.id,
            kind = ?record.kind,
            service = %record.service_type,
            path = %record.relative_path,
            context = %record.log_context,
            attempts = record.attempts,
            provenance = ?record.provenance,
            server = ?record.server,
            http_status = ?record.http_status,
            "dispatch failed: {}",
            record.message
        );
        Ok(())
    }
}

/// Collects records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFailureLog {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl MemoryFailureLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records so far.
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl FailureLog for MemoryFailureLog {
    async fn record(&self, record: FailureRecord) -> Result<(), RemoteError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Inserts records as rows of the store's failures table.
#[derive(Debug, Clone)]
pub struct RestFailureLog {
    store: RestStore,
}

impl RestFailureLog {
    /// Wrap a store client.
    pub fn new(store: RestStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FailureLog for RestFailureLog {
    async fn record(&self, record: FailureRecord) -> Result<(), RemoteError> {
        self.store.insert(FAILURES_TABLE, &record).await
    }
}

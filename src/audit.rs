//! Audit records and the batching sink for the reserved log database.
//!
//! Business operations report audit records through an [`AuditHandle`];
//! a background task batches them and writes to the log connection. The
//! channel is bounded and lossy by design: when it is full, records are
//! dropped with a warning rather than slowing or failing business work.
//!
//! Audit writes are independent of business transactions — there is no
//! cross-database atomicity. A rolled-back business transaction may still
//! have emitted audit records, and a crash may lose records that were
//! queued but not yet flushed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backends::SqliteBackend;
use crate::error::StorageResult;
use crate::tenant::TenantContext;

/// One audit entry, bound for the log database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id.
    pub id: Uuid,
    /// The tenant the operation ran under (0 for privileged scopes).
    pub tenant_id: i64,
    /// The acting user (0 for privileged scopes).
    pub user_id: i64,
    /// Short operation name, e.g. `create` or `delete`.
    pub operation: String,
    /// The logical table the operation touched.
    pub table_name: String,
    /// Free-form detail, e.g. a key or a summary of the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the record was created.
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates a record for an operation under the given context.
    pub fn new(
        context: &TenantContext,
        operation: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: context.tenant_id.max(0),
            user_id: context.user_id.max(0),
            operation: operation.into(),
            table_name: table_name.into(),
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attaches free-form detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Configuration for the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSinkConfig {
    /// Bounded channel capacity; records beyond it are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum records written per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    64
}

impl Default for AuditSinkConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

/// Handle for submitting audit records.
///
/// Cheap to clone; the background task stops after every handle is dropped
/// and the queue has drained.
#[derive(Debug, Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditHandle {
    /// Queues a record for writing.
    ///
    /// Returns `false` when the record was dropped because the queue is
    /// full; business work proceeds either way.
    pub fn record(&self, record: AuditRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "audit record dropped");
                false
            }
        }
    }
}

/// The batching audit writer.
pub struct AuditSink;

impl AuditSink {
    /// Initializes the audit schema and spawns the writer task.
    ///
    /// Returns the submission handle and the task handle; await the task
    /// after dropping every handle to flush remaining records on shutdown.
    pub fn spawn(
        backend: Arc<SqliteBackend>,
        config: AuditSinkConfig,
    ) -> StorageResult<(AuditHandle, JoinHandle<()>)> {
        Self::init_schema(&backend)?;

        let (tx, mut rx) = mpsc::channel::<AuditRecord>(config.channel_capacity.max(1));
        let batch_size = config.batch_size.max(1);

        let task = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = Vec::with_capacity(batch_size);
                batch.push(first);
                while batch.len() < batch_size {
                    match rx.try_recv() {
                        Ok(record) => batch.push(record),
                        Err(_) => break,
                    }
                }
                if let Err(err) = write_batch(&backend, &batch) {
                    warn!(error = %err, records = batch.len(), "audit batch write failed");
                } else {
                    debug!(records = batch.len(), "audit batch written");
                }
            }
        });

        Ok((AuditHandle { tx }, task))
    }

    fn init_schema(backend: &SqliteBackend) -> StorageResult<()> {
        let conn = backend.checkout()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                tenant_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                operation TEXT NOT NULL,
                table_name TEXT NOT NULL,
                detail TEXT,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_log_tenant
                ON audit_log (tenant_id, recorded_at);",
        )?;
        Ok(())
    }
}

fn write_batch(backend: &SqliteBackend, batch: &[AuditRecord]) -> StorageResult<()> {
    let conn = backend.checkout()?;
    conn.execute_batch("BEGIN")?;
    let result = (|| -> StorageResult<()> {
        let mut stmt = conn.prepare(
            "INSERT INTO audit_log
                (id, tenant_id, user_id, operation, table_name, detail, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for record in batch {
            stmt.execute(params![
                record.id.to_string(),
                record.tenant_id,
                record.user_id,
                record.operation,
                record.table_name,
                record.detail,
                record.recorded_at.to_rfc3339(),
            ])?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(err)
        }
    }
}

//! libSQL backend: async `QueueStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::QueueStore;
use crate::tasks::model::{QueueEntry, Task};

/// libSQL queue store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlQueueStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    closed: AtomicBool,
}

impl LibSqlQueueStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        info!(path = %path.display(), "Queue store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            closed: AtomicBool::new(false),
        })
    }

    /// Get the connection, unless the store was closed.
    fn conn(&self) -> Result<&Connection, DatabaseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Pool("Queue store is closed".into()));
        }
        Ok(&self.conn)
    }
}

fn row_to_entry(row: &libsql::Row) -> Result<QueueEntry, libsql::Error> {
    Ok(QueueEntry {
        task_id: row.get(0)?,
        language: row.get(1)?,
        priority: row.get(2)?,
    })
}

#[async_trait]
impl QueueStore for LibSqlQueueStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()?).await
    }

    async fn push(&self, entry: &QueueEntry) -> Result<(), DatabaseError> {
        self.conn()?
            .execute(
                "INSERT INTO task_queue (task_id, language, priority) VALUES (?1, ?2, ?3)
                 ON CONFLICT(task_id) DO UPDATE SET
                    language = excluded.language,
                    priority = excluded.priority",
                params![entry.task_id.as_str(), entry.language.as_str(), entry.priority],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("push: {e}")))?;
        Ok(())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueueEntry>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut rows = self
            .conn()?
            .query(
                "SELECT task_id, language, priority FROM task_queue
                 ORDER BY priority DESC, seq ASC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("peek: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("peek: {e}")))?
        {
            match row_to_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping queue row: {e}"),
            }
        }
        Ok(entries)
    }

    async fn remove(&self, task_id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()?
            .execute("DELETE FROM task_queue WHERE task_id = ?1", params![task_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("remove: {e}")))?;
        Ok(affected > 0)
    }

    async fn queue_len(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()?
            .query("SELECT COUNT(*) FROM task_queue", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_len: {e}")))?;
        let count = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_len: {e}")))?
        {
            Some(row) => row.get::<i64>(0).unwrap_or(0),
            None => 0,
        };
        Ok(count.max(0) as usize)
    }

    async fn save_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let body = serde_json::to_string(task)
            .map_err(|e| DatabaseError::Serialization(format!("task {}: {e}", task.id)))?;
        self.conn()?
            .execute(
                "INSERT INTO tasks (id, status, body, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![
                    task.id.as_str(),
                    task.status.as_str(),
                    body,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_task: {e}")))?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM task_queue WHERE task_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        Ok(())
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()?
            .query("SELECT id, body FROM tasks", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_tasks: {e}")))?
        {
            let id: String = row.get(0).unwrap_or_default();
            let body: String = match row.get(1) {
                Ok(body) => body,
                Err(e) => {
                    warn!(task_id = %id, "Skipping task row: {e}");
                    continue;
                }
            };
            match serde_json::from_str::<Task>(&body) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(task_id = %id, "Skipping unreadable task record: {e}"),
            }
        }
        Ok(tasks)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Queue store closed");
        }
    }
}

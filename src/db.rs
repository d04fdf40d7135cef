//! Task persistence: one row per generation run, with lifecycle transitions
//! and progress counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
    Pool, Row, Sqlite,
};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::TARGET_DB;

/// Lifecycle states for a generation task. Transitions only move forward:
/// pending → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total_urls: i64,
    pub processed: i64,
    pub failed: i64,
}

/// Summary attached to a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub generated_at: DateTime<Utc>,
    pub total_processed: usize,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: TaskProgress,
    pub markdown_content: Option<String>,
    pub metadata: Option<ResultMetadata>,
    pub error: Option<String>,
    pub original_payload: Value,
}

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("failed to serialize task data: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct TaskStore {
    pool: Pool<Sqlite>,
}

impl TaskStore {
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!(target: TARGET_DB, "Creating task store pool for: {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    sqlx::Error::Configuration(
                        format!("cannot create database directory: {}", err).into(),
                    )
                })?;
            }
        }

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                total_urls INTEGER NOT NULL DEFAULT 0,
                processed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                markdown_content TEXT,
                metadata_json TEXT,
                error TEXT,
                original_payload_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
            "#,
        )
        .execute(&pool)
        .await?;
        info!(target: TARGET_DB, "Task table ensured to exist");

        Ok(TaskStore { pool })
    }

    /// Create a pending task with zeroed progress.
    pub async fn create(
        &self,
        total_urls: i64,
        payload: Value,
    ) -> Result<TaskRecord, TaskStoreError> {
        let task_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let payload_json = serde_json::to_string(&payload)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, status, created_at, updated_at, total_urls, processed, failed, original_payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)
            "#,
        )
        .bind(&task_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .bind(total_urls)
        .bind(&payload_json)
        .execute(&self.pool)
        .await?;

        info!(target: TARGET_DB, "Created task {} for {} urls", task_id, total_urls);

        Ok(TaskRecord {
            task_id,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            progress: TaskProgress {
                total_urls,
                processed: 0,
                failed: 0,
            },
            markdown_content: None,
            metadata: None,
            error: None,
            original_payload: payload,
        })
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskStoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_record).transpose()
    }

    async fn fetch_existing(&self, task_id: &str) -> Result<TaskRecord, TaskStoreError> {
        self.get(task_id)
            .await?
            .ok_or_else(|| TaskStoreError::NotFound(task_id.to_string()))
    }

    pub async fn mark_processing(&self, task_id: &str) -> Result<TaskRecord, TaskStoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE task_id = ?3",
        )
        .bind(TaskStatus::Processing.as_str())
        .bind(Utc::now())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskStoreError::NotFound(task_id.to_string()));
        }
        self.fetch_existing(task_id).await
    }

    pub async fn mark_completed(
        &self,
        task_id: &str,
        markdown_content: &str,
        metadata: &ResultMetadata,
        progress: &TaskProgress,
    ) -> Result<TaskRecord, TaskStoreError> {
        let metadata_json = serde_json::to_string(metadata)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?1, markdown_content = ?2, metadata_json = ?3,
                total_urls = ?4, processed = ?5, failed = ?6,
                completed_at = ?7, error = NULL, updated_at = ?8
            WHERE task_id = ?9
            "#,
        )
        .bind(TaskStatus::Completed.as_str())
        .bind(markdown_content)
        .bind(&metadata_json)
        .bind(progress.total_urls)
        .bind(progress.processed)
        .bind(progress.failed)
        .bind(now)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskStoreError::NotFound(task_id.to_string()));
        }
        self.fetch_existing(task_id).await
    }

    pub async fn mark_failed(
        &self,
        task_id: &str,
        error: &str,
        progress: Option<&TaskProgress>,
    ) -> Result<TaskRecord, TaskStoreError> {
        let now = Utc::now();
        let result = match progress {
            Some(progress) => {
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = ?1, error = ?2, completed_at = ?3, updated_at = ?4,
                        total_urls = ?5, processed = ?6, failed = ?7
                    WHERE task_id = ?8
                    "#,
                )
                .bind(TaskStatus::Failed.as_str())
                .bind(error)
                .bind(now)
                .bind(now)
                .bind(progress.total_urls)
                .bind(progress.processed)
                .bind(progress.failed)
                .bind(task_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = ?1, error = ?2, completed_at = ?3, updated_at = ?4
                    WHERE task_id = ?5
                    "#,
                )
                .bind(TaskStatus::Failed.as_str())
                .bind(error)
                .bind(now)
                .bind(now)
                .bind(task_id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(TaskStoreError::NotFound(task_id.to_string()));
        }
        self.fetch_existing(task_id).await
    }
}

fn row_to_record(row: SqliteRow) -> Result<TaskRecord, TaskStoreError> {
    let status_text: String = row.get("status");
    let status = TaskStatus::from_str(&status_text)
        .map_err(|err| TaskStoreError::Database(sqlx::Error::Decode(err.into())))?;

    let metadata = row
        .get::<Option<String>, _>("metadata_json")
        .map(|json| serde_json::from_str::<ResultMetadata>(&json))
        .transpose()?;
    let original_payload: Value = serde_json::from_str(&row.get::<String, _>("original_payload_json"))?;

    Ok(TaskRecord {
        task_id: row.get("task_id"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
        progress: TaskProgress {
            total_urls: row.get("total_urls"),
            processed: row.get("processed"),
            failed: row.get("failed"),
        },
        markdown_content: row.get("markdown_content"),
        metadata,
        error: row.get("error"),
        original_payload,
    })
}

use std::time::Duration;

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use recepta_core::domain::task::{QueuedTask, TaskFate, TaskId, TaskState};
use recepta_core::domain::user::SessionId;

use super::users::{parse_optional_timestamp, parse_timestamp};
use super::{RepositoryError, TaskQueueRepository};
use crate::DbPool;

pub struct SqlTaskQueueRepository {
    pool: DbPool,
}

impl SqlTaskQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskQueueRepository for SqlTaskQueueRepository {
    async fn enqueue(
        &self,
        session: &SessionId,
        text: &str,
        max_retries: u32,
    ) -> Result<TaskId, RepositoryError> {
        let id = TaskId(Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO task_queue (
                id, session_id, text, state, retry_count, max_retries,
                available_at, created_at, updated_at
             ) VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(&session.0)
        .bind(text)
        .bind(i64::from(max_retries))
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedTask>, RepositoryError> {
        let now = Utc::now();

        // Claim by compare-and-swap: the UPDATE only wins if the row is
        // still queued, so concurrent workers cannot take the same task.
        loop {
            let candidate = sqlx::query(
                "SELECT id FROM task_queue
                 WHERE state = 'queued' AND available_at <= ?
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
            )
            .bind(now.to_rfc3339())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = candidate else {
                return Ok(None);
            };
            let candidate_id: String = row.try_get("id")?;

            let claimed = sqlx::query(
                "UPDATE task_queue
                 SET state = 'running', claimed_by = ?, claimed_at = ?, updated_at = ?
                 WHERE id = ? AND state = 'queued'",
            )
            .bind(worker_id)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(&candidate_id)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 0 {
                // Lost the race to another worker; try the next task.
                continue;
            }

            return self.find(&TaskId(candidate_id)).await;
        }
    }

    async fn complete(&self, id: &TaskId) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE task_queue SET state = 'done', updated_at = ? WHERE id = ? AND state = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(
        &self,
        id: &TaskId,
        error: &str,
        backoff: Duration,
    ) -> Result<TaskFate, RepositoryError> {
        let task = self
            .find(id)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("unknown task `{}`", id.0)))?;

        let now = Utc::now();
        let retry_count = task.retry_count + 1;

        if retry_count > task.max_retries {
            sqlx::query(
                "UPDATE task_queue
                 SET state = 'dead', retry_count = ?, last_error = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(i64::from(retry_count))
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
            return Ok(TaskFate::Dead);
        }

        // Exponential backoff: attempt n waits backoff * 2^(n-1).
        let exponent = retry_count.saturating_sub(1).min(16);
        let delay = backoff.as_secs().saturating_mul(1_u64 << exponent);
        let available_at = now + chrono::Duration::seconds(delay as i64);

        sqlx::query(
            "UPDATE task_queue
             SET state = 'queued', retry_count = ?, last_error = ?, available_at = ?,
                 claimed_by = NULL, claimed_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(i64::from(retry_count))
        .bind(error)
        .bind(available_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(TaskFate::Requeued)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, RepositoryError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than.as_secs() as i64);

        let result = sqlx::query(
            "UPDATE task_queue
             SET state = 'queued', claimed_by = NULL, claimed_at = NULL, updated_at = ?
             WHERE state = 'running' AND claimed_at <= ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find(&self, id: &TaskId) -> Result<Option<QueuedTask>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id, session_id, text, state, retry_count, max_retries,
                available_at, claimed_by, claimed_at, last_error,
                created_at, updated_at
             FROM task_queue
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }
}

fn task_from_row(row: SqliteRow) -> Result<QueuedTask, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = TaskState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task state `{state_raw}`")))?;

    Ok(QueuedTask {
        id: TaskId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        text: row.try_get("text")?,
        state,
        retry_count: parse_u32("retry_count", row.try_get("retry_count")?)?,
        max_retries: parse_u32("max_retries", row.try_get("max_retries")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use recepta_core::domain::message::{AgentStage, MessagePayload, SenderRole, StoredMessage};
use recepta_core::domain::user::SessionId;

use super::users::parse_timestamp;
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(
        &self,
        session: &SessionId,
        role: SenderRole,
        agent: Option<AgentStage>,
        payload: &MessagePayload,
    ) -> Result<(), RepositoryError> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|error| RepositoryError::Decode(format!("payload encode failed: {error}")))?;

        sqlx::query(
            "INSERT INTO chat_message (session_id, sender, agent_name, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.0)
        .bind(role.as_str())
        .bind(agent.map(|stage| stage.as_str()))
        .bind(payload_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_history(
        &self,
        session: &SessionId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, RepositoryError> {
        // Newest `limit` rows, then back into chronological order so the
        // agent context reads oldest-first.
        let rows = sqlx::query(
            "SELECT sender, agent_name, payload, created_at
             FROM (
                SELECT id, sender, agent_name, payload, created_at
                FROM chat_message
                WHERE session_id = ?
                ORDER BY id DESC
                LIMIT ?
             ) recent
             ORDER BY id ASC",
        )
        .bind(&session.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<StoredMessage, RepositoryError> {
    let role_raw = row.try_get::<String, _>("sender")?;
    let role = SenderRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sender role `{role_raw}`")))?;

    let agent = row
        .try_get::<Option<String>, _>("agent_name")?
        .map(|value| {
            AgentStage::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown agent stage `{value}`")))
        })
        .transpose()?;

    let payload_raw = row.try_get::<String, _>("payload")?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid payload json: {error}")))?;

    Ok(StoredMessage {
        role,
        agent,
        payload,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

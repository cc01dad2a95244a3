use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use recepta_core::domain::user::{SessionId, UserRecord, UserUpdate};

use super::{RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find(&self, session: &SessionId) -> Result<Option<UserRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                session_id,
                full_name,
                document,
                insurance,
                notes,
                registration_complete,
                requires_human,
                contact_origin,
                created_at
             FROM users
             WHERE session_id = ?",
        )
        .bind(&session.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn create_if_absent(
        &self,
        session: &SessionId,
        contact_origin: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO users (session_id, contact_origin, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(&session.0)
        .bind(contact_origin)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(
        &self,
        session: &SessionId,
        update: &UserUpdate,
    ) -> Result<(), RepositoryError> {
        let notes_json = update
            .notes
            .as_ref()
            .map(|notes| serde_json::to_string(notes))
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("notes encode failed: {error}")))?;

        sqlx::query(
            "UPDATE users
             SET
                full_name = COALESCE(?, full_name),
                document = COALESCE(?, document),
                insurance = COALESCE(?, insurance),
                notes = COALESCE(?, notes)
             WHERE session_id = ?",
        )
        .bind(update.full_name.as_deref())
        .bind(update.document.as_deref())
        .bind(update.insurance.as_deref())
        .bind(notes_json.as_deref())
        .bind(&session.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_registration_complete(
        &self,
        session: &SessionId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET registration_complete = 1 WHERE session_id = ?")
            .bind(&session.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_requires_human(&self, session: &SessionId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET requires_human = 1 WHERE session_id = ?")
            .bind(&session.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn user_from_row(row: SqliteRow) -> Result<UserRecord, RepositoryError> {
    let notes = row
        .try_get::<Option<String>, _>("notes")?
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid notes json: {error}")))
        })
        .transpose()?;

    Ok(UserRecord {
        session_id: SessionId(row.try_get("session_id")?),
        full_name: row.try_get("full_name")?,
        document: row.try_get("document")?,
        insurance: row.try_get("insurance")?,
        notes,
        registration_complete: row.try_get::<i64, _>("registration_complete")? != 0,
        requires_human: row.try_get::<i64, _>("requires_human")? != 0,
        contact_origin: row.try_get("contact_origin")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

use chrono::Utc;

use recepta_core::domain::message::AgentStage;
use recepta_core::domain::user::SessionId;

use super::{RepositoryError, TokenUsageRepository};
use crate::DbPool;

pub struct SqlTokenUsageRepository {
    pool: DbPool,
}

impl SqlTokenUsageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TokenUsageRepository for SqlTokenUsageRepository {
    async fn record(
        &self,
        session: &SessionId,
        stage: Option<AgentStage>,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO token_usage (
                session_id, stage, model, input_tokens, output_tokens, total_tokens, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.0)
        .bind(stage.map(|stage| stage.as_str()))
        .bind(model)
        .bind(i64::from(input_tokens))
        .bind(i64::from(output_tokens))
        .bind(i64::from(input_tokens) + i64::from(output_tokens))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use recepta_core::domain::message::AgentStage;
    use recepta_core::domain::user::SessionId;

    use super::SqlTokenUsageRepository;
    use crate::migrations;
    use crate::repositories::TokenUsageRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool(name: &str) -> DbPool {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn usage_rows_accumulate_totals() {
        let pool = setup_pool("token_usage").await;
        let repo = SqlTokenUsageRepository::new(pool.clone());
        let session = SessionId("5599555550001".to_owned());

        repo.record(&session, Some(AgentStage::Rag), "gpt-test", 120, 40)
            .await
            .expect("record");

        let row = sqlx::query(
            "SELECT stage, total_tokens FROM token_usage WHERE session_id = ?",
        )
        .bind(&session.0)
        .fetch_one(&pool)
        .await
        .expect("fetch usage");

        assert_eq!(row.get::<String, _>("stage"), "rag");
        assert_eq!(row.get::<i64, _>("total_tokens"), 160);

        pool.close().await;
    }
}

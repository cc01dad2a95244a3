use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use recepta_agent::calendar::HttpCalendarClient;
use recepta_agent::embedding::HttpEmbeddingClient;
use recepta_agent::llm::{resolve_base_url, HttpLlmClient};
use recepta_agent::router::TurnRouter;
use recepta_agent::runtime::QueueWorker;
use recepta_agent::tools::ToolExecutor;
use recepta_core::config::{AppConfig, ConfigError, LoadOptions};
use recepta_core::domain::user::SessionId;
use recepta_db::repositories::{
    SqlBookingRepository, SqlDoctorRepository, SqlFileRepository, SqlKnowledgeRepository,
    SqlMessageRepository, SqlTaskQueueRepository, SqlTokenUsageRepository, SqlUserRepository,
    TaskQueueRepository,
};
use recepta_db::{connect_with_settings, migrations, DbPool};
use recepta_messaging::gateway::HttpMessageGateway;
use recepta_messaging::reminders::{
    HttpReminderScheduler, NoopReminderScheduler, ReminderScheduler,
};
use recepta_messaging::transcribe::HttpTranscriber;

use crate::buffer::{DebounceAggregator, FlushHandler};
use crate::webhook::WebhookState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub webhook_state: WebhookState,
    pub workers: Vec<Arc<QueueWorker>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

/// Flush handler for production: the buffer's only job after a quiet
/// period is to put the turn on the durable queue.
pub struct TaskEnqueueHandler {
    pub queue: Arc<dyn TaskQueueRepository>,
    pub max_retries: u32,
}

#[async_trait]
impl FlushHandler for TaskEnqueueHandler {
    async fn flush(&self, session: &SessionId, text: &str) -> anyhow::Result<()> {
        let task_id = self.queue.enqueue(session, text, self.max_retries).await?;
        info!(
            event_name = "buffer.turn_enqueued",
            session_id = %session,
            task_id = %task_id.0,
            "aggregated turn accepted for processing"
        );
        Ok(())
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let users = Arc::new(SqlUserRepository::new(db_pool.clone()));
    let messages = Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let queue: Arc<dyn TaskQueueRepository> =
        Arc::new(SqlTaskQueueRepository::new(db_pool.clone()));

    let gateway = Arc::new(HttpMessageGateway::new(&config.gateway));
    let llm = Arc::new(HttpLlmClient::new(&config.llm));
    let llm_base_url = resolve_base_url(&config.llm);

    let reminders: Arc<dyn ReminderScheduler> = if config.reminder.enabled {
        Arc::new(HttpReminderScheduler::new(
            config.reminder.base_url.clone().unwrap_or_default(),
            config.reminder.api_token.clone(),
            config.reminder.webhook_url.clone().unwrap_or_default(),
            config.reminder.lead_time_hours,
        ))
    } else {
        Arc::new(NoopReminderScheduler)
    };

    let tools = Arc::new(ToolExecutor {
        users: users.clone(),
        doctors: Arc::new(SqlDoctorRepository::new(db_pool.clone())),
        bookings: Arc::new(SqlBookingRepository::new(db_pool.clone())),
        knowledge: Arc::new(SqlKnowledgeRepository::new(db_pool.clone())),
        files: Arc::new(SqlFileRepository::new(db_pool.clone())),
        gateway: gateway.clone(),
        calendar: Arc::new(HttpCalendarClient::new(&config.calendar)),
        reminders,
        embeddings: Arc::new(HttpEmbeddingClient::new(&config.llm, llm_base_url.clone())),
    });

    let router = Arc::new(TurnRouter {
        users: users.clone(),
        messages: messages.clone(),
        token_usage: Arc::new(SqlTokenUsageRepository::new(db_pool.clone())),
        llm,
        gateway: gateway.clone(),
        tools,
        config: config.agent.clone(),
        model_label: config.llm.model.clone(),
    });

    let processing_timeout = Duration::from_secs(config.queue.processing_timeout_secs);
    let workers = (0..config.queue.worker_count)
        .map(|index| {
            Arc::new(QueueWorker {
                queue: queue.clone(),
                router: router.clone(),
                gateway: gateway.clone(),
                messages: messages.clone(),
                worker_id: format!("worker-{index}"),
                poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
                processing_timeout,
                retry_backoff: Duration::from_secs(config.queue.retry_backoff_secs),
                stale_after: processing_timeout.saturating_mul(2),
            })
        })
        .collect();

    let flush_handler = Arc::new(TaskEnqueueHandler {
        queue: queue.clone(),
        max_retries: config.queue.max_retries,
    });
    let aggregator = Arc::new(DebounceAggregator::new(
        Duration::from_secs(config.buffer.idle_window_secs),
        flush_handler,
    ));
    info!(
        event_name = "system.bootstrap.buffer_ready",
        idle_window_secs = config.buffer.idle_window_secs,
        "debounce buffer and expiry listener ready"
    );

    let webhook_state = WebhookState {
        users,
        messages,
        buffer: aggregator,
        transcriber: Arc::new(HttpTranscriber::new(
            llm_base_url,
            config.llm.api_key.clone(),
            config.llm.transcription_model.clone(),
            "pt",
        )),
        gateway,
    };

    Ok(Application { config, db_pool, webhook_state, workers })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use recepta_core::config::{ConfigOverrides, LoadOptions};
    use recepta_core::domain::task::TaskState;
    use recepta_core::domain::user::SessionId;
    use recepta_db::repositories::{SqlTaskQueueRepository, TaskQueueRepository};
    use recepta_db::{connect_with_settings, migrations};

    use super::{bootstrap, TaskEnqueueHandler};
    use crate::buffer::FlushHandler;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                gateway_base_url: Some("http://gateway.local".to_string()),
                gateway_api_key: Some("key-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_gateway_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap must fail").to_string();
        assert!(message.contains("gateway"));
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_workers_and_buffer() {
        let app = bootstrap(valid_overrides("sqlite:file:bootstrap_ok?mode=memory&cache=shared"))
            .await
            .expect("bootstrap should succeed");

        assert_eq!(app.workers.len() as u32, app.config.queue.worker_count);

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name IN ('users', 'chat_message', 'task_queue', 'bookings')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables present");
        assert_eq!(table_count, 4);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn flush_handler_enqueues_one_task_per_flush() {
        let pool =
            connect_with_settings("sqlite:file:bootstrap_flush?mode=memory&cache=shared", 1, 30)
                .await
                .expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let queue = Arc::new(SqlTaskQueueRepository::new(pool.clone()));
        let handler = TaskEnqueueHandler { queue: queue.clone(), max_retries: 3 };
        let session = SessionId("5599111100001".to_owned());

        handler.flush(&session, "Hello I need an appointment").await.expect("flush");

        let task = queue.claim_next("worker-test").await.expect("claim").expect("task queued");
        assert_eq!(task.session_id, session);
        assert_eq!(task.text, "Hello I need an appointment");
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.max_retries, 3);

        pool.close().await;
    }
}

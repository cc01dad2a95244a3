use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use recepta_core::domain::booking::Booking;
use recepta_core::domain::doctor::{Doctor, DoctorId};
use recepta_core::domain::knowledge::{KnowledgeChunk, StoredFile};
use recepta_core::domain::message::{AgentStage, MessagePayload, SenderRole, StoredMessage};
use recepta_core::domain::task::{QueuedTask, TaskFate, TaskId};
use recepta_core::domain::user::{SessionId, UserRecord, UserUpdate};

pub mod bookings;
pub mod doctors;
pub mod files;
pub mod knowledge;
pub mod messages;
pub mod task_queue;
pub mod token_usage;
pub mod users;

pub use bookings::SqlBookingRepository;
pub use doctors::SqlDoctorRepository;
pub use files::SqlFileRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use messages::SqlMessageRepository;
pub use task_queue::SqlTaskQueueRepository;
pub use token_usage::SqlTokenUsageRepository;
pub use users::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, session: &SessionId) -> Result<Option<UserRecord>, RepositoryError>;

    /// Inserts a fresh record unless the sender is already known.
    /// Returns `true` when a new record was created.
    async fn create_if_absent(
        &self,
        session: &SessionId,
        contact_origin: &str,
    ) -> Result<bool, RepositoryError>;

    async fn update_profile(
        &self,
        session: &SessionId,
        update: &UserUpdate,
    ) -> Result<(), RepositoryError>;

    async fn mark_registration_complete(&self, session: &SessionId)
        -> Result<(), RepositoryError>;

    /// Raises the human-handoff gate. Idempotent; there is no unset
    /// counterpart in this subsystem.
    async fn set_requires_human(&self, session: &SessionId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(
        &self,
        session: &SessionId,
        role: SenderRole,
        agent: Option<AgentStage>,
        payload: &MessagePayload,
    ) -> Result<(), RepositoryError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent_history(
        &self,
        session: &SessionId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, RepositoryError>;
}

#[async_trait]
pub trait TaskQueueRepository: Send + Sync {
    /// Durably records a turn for processing. Success means accepted,
    /// not processed.
    async fn enqueue(
        &self,
        session: &SessionId,
        text: &str,
        max_retries: u32,
    ) -> Result<TaskId, RepositoryError>;

    /// Claims the oldest ready task for `worker_id`, or `None` if the
    /// queue is empty. No two workers can claim the same task.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedTask>, RepositoryError>;

    async fn complete(&self, id: &TaskId) -> Result<(), RepositoryError>;

    /// Records a failed attempt: requeues with `backoff` until the retry
    /// budget is exhausted, then parks the task as dead.
    async fn fail(
        &self,
        id: &TaskId,
        error: &str,
        backoff: Duration,
    ) -> Result<TaskFate, RepositoryError>;

    /// Returns tasks stuck in `running` longer than `older_than` to the
    /// queue (worker died mid-turn).
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, RepositoryError>;

    async fn find(&self, id: &TaskId) -> Result<Option<QueuedTask>, RepositoryError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn save(&self, booking: &Booking) -> Result<(), RepositoryError>;
    async fn list_for_session(&self, session: &SessionId) -> Result<Vec<Booking>, RepositoryError>;
    async fn delete(&self, session: &SessionId, event_id: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait DoctorRepository: Send + Sync {
    async fn find(&self, id: &DoctorId) -> Result<Option<Doctor>, RepositoryError>;
    async fn find_by_calendar(&self, calendar_id: &str) -> Result<Option<Doctor>, RepositoryError>;

    /// Active doctors offering `procedure`, optionally narrowed to one
    /// insurance plan.
    async fn list_available(
        &self,
        procedure: &str,
        insurance: Option<&str>,
    ) -> Result<Vec<Doctor>, RepositoryError>;

    async fn save(&self, doctor: &Doctor) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn insert_chunk(
        &self,
        category: &str,
        content: &str,
        embedding: &[f32],
    ) -> Result<(), RepositoryError>;

    /// Chunks ranked by cosine similarity to `query_embedding`,
    /// best first.
    async fn search(
        &self,
        query_embedding: &[f32],
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<KnowledgeChunk>, RepositoryError>;
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn find_by_category(&self, category: &str)
        -> Result<Option<StoredFile>, RepositoryError>;
    async fn save(&self, file: &StoredFile) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TokenUsageRepository: Send + Sync {
    async fn record(
        &self,
        session: &SessionId,
        stage: Option<AgentStage>,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<(), RepositoryError>;
}

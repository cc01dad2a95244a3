use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use recepta_core::domain::message::{MessagePayload, SenderRole};
use recepta_core::domain::task::{QueuedTask, TaskFate};
use recepta_db::repositories::{MessageRepository, RepositoryError, TaskQueueRepository};
use recepta_messaging::gateway::MessageGateway;

use crate::router::TurnRouter;

pub const DEAD_TASK_APOLOGY: &str = "Sorry, something went wrong while handling your message. \
Please send it again in a few minutes.";

/// Queued tasks stuck in `running` are swept back onto the queue every
/// this many polls.
const STALE_SWEEP_EVERY: u32 = 120;

/// One queue worker: claims a task, routes the turn with a processing
/// timeout, and completes or fails it. Workers are independent; safe
/// parallelism across senders comes from the queue's claim semantics.
pub struct QueueWorker {
    pub queue: Arc<dyn TaskQueueRepository>,
    pub router: Arc<TurnRouter>,
    pub gateway: Arc<dyn MessageGateway>,
    pub messages: Arc<dyn MessageRepository>,
    pub worker_id: String,
    pub poll_interval: Duration,
    pub processing_timeout: Duration,
    pub retry_backoff: Duration,
    pub stale_after: Duration,
}

impl QueueWorker {
    /// Claims and processes at most one task. Returns whether a task was
    /// handled, so the caller knows whether to poll again immediately.
    pub async fn poll_once(&self) -> Result<bool, RepositoryError> {
        let Some(task) = self.queue.claim_next(&self.worker_id).await? else {
            return Ok(false);
        };

        info!(
            event_name = "worker.task_claimed",
            worker_id = %self.worker_id,
            task_id = %task.id.0,
            session_id = %task.session_id,
            retry_count = task.retry_count,
            "claimed queued turn"
        );

        let outcome = tokio::time::timeout(
            self.processing_timeout,
            self.router.process_turn(&task.session_id, &task.text),
        )
        .await;

        match outcome {
            Ok(Ok(report)) => {
                self.queue.complete(&task.id).await?;
                info!(
                    event_name = "worker.task_done",
                    worker_id = %self.worker_id,
                    task_id = %task.id.0,
                    stage = report.stage.map(|stage| stage.as_str()).unwrap_or("none"),
                    "turn completed"
                );
            }
            Ok(Err(error)) => {
                self.handle_failure(&task, &error.to_string()).await?;
            }
            Err(_elapsed) => {
                self.handle_failure(
                    &task,
                    &format!("processing timeout of {:?} elapsed", self.processing_timeout),
                )
                .await?;
            }
        }

        Ok(true)
    }

    pub async fn run(&self) {
        info!(
            event_name = "worker.started",
            worker_id = %self.worker_id,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "queue worker started"
        );

        let mut polls_since_sweep: u32 = 0;
        loop {
            polls_since_sweep += 1;
            if polls_since_sweep >= STALE_SWEEP_EVERY {
                polls_since_sweep = 0;
                match self.queue.requeue_stale(self.stale_after).await {
                    Ok(0) => {}
                    Ok(requeued) => warn!(
                        event_name = "worker.stale_tasks_requeued",
                        worker_id = %self.worker_id,
                        requeued,
                        "returned stale running tasks to the queue"
                    ),
                    Err(error) => warn!(
                        event_name = "worker.stale_sweep_failed",
                        worker_id = %self.worker_id,
                        error = %error,
                        "stale-task sweep failed"
                    ),
                }
            }

            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(error) => {
                    warn!(
                        event_name = "worker.poll_failed",
                        worker_id = %self.worker_id,
                        error = %error,
                        "queue poll failed; backing off"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn handle_failure(
        &self,
        task: &QueuedTask,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let fate = self.queue.fail(&task.id, error, self.retry_backoff).await?;
        warn!(
            event_name = "worker.task_failed",
            worker_id = %self.worker_id,
            task_id = %task.id.0,
            session_id = %task.session_id,
            retry_count = task.retry_count + 1,
            fate = ?fate,
            error = %error,
            "turn processing failed"
        );

        // Retries are silent; only a dead task surfaces a failure reply
        // so the sender is not left waiting forever.
        if fate == TaskFate::Dead {
            if let Err(send_error) =
                self.gateway.send_text(&task.session_id, DEAD_TASK_APOLOGY).await
            {
                warn!(
                    event_name = "worker.apology_send_failed",
                    task_id = %task.id.0,
                    error = %send_error,
                    "failure apology was not delivered"
                );
            }
            if let Err(persist_error) = self
                .messages
                .append(
                    &task.session_id,
                    SenderRole::Assistant,
                    None,
                    &MessagePayload::Assistant { content: DEAD_TASK_APOLOGY.to_owned() },
                )
                .await
            {
                warn!(
                    event_name = "worker.apology_persist_failed",
                    task_id = %task.id.0,
                    error = %persist_error,
                    "failure apology was not persisted"
                );
            }
        }

        Ok(())
    }
}

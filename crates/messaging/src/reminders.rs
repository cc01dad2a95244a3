use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::info;

use recepta_core::domain::user::SessionId;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("reminder request failed: {0}")]
    Request(String),
    #[error("reminder service returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Reminder keyed by the booking's calendar event id so cancellation can
/// delete the matching entry later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderRequest {
    pub id: String,
    pub session_id: SessionId,
    pub starts_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn create(&self, reminder: &ReminderRequest) -> Result<(), ReminderError>;
    async fn delete(&self, reminder_id: &str) -> Result<(), ReminderError>;
}

/// Fire time for a reminder: the configured lead before the booking.
pub fn schedule_time(starts_at: DateTime<Utc>, lead: Duration) -> DateTime<Utc> {
    starts_at - lead
}

pub const REMINDER_MESSAGE: &str = "Hi! Just a reminder about your upcoming appointment.\n\
If anything comes up, please contact the doctor responsible for your visit.\n\
Have a great day!";

/// Third-party scheduler client: create posts the reminder with a
/// callback to our `/reminder` route; delete removes it by id.
pub struct HttpReminderScheduler {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
    webhook_url: String,
    lead: Duration,
}

impl HttpReminderScheduler {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<SecretString>,
        webhook_url: impl Into<String>,
        lead_time_hours: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_token,
            webhook_url: webhook_url.into(),
            lead: Duration::hours(lead_time_hours as i64),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl ReminderScheduler for HttpReminderScheduler {
    async fn create(&self, reminder: &ReminderRequest) -> Result<(), ReminderError> {
        let fire_at = schedule_time(reminder.starts_at, self.lead);
        let payload = serde_json::json!({
            "id": reminder.id,
            "scheduleTo": fire_at.to_rfc3339(),
            "payload": {
                "sender": reminder.session_id.0,
                "message": REMINDER_MESSAGE,
            },
            "webhookUrl": self.webhook_url,
        });

        let response = self
            .authorize(self.client.post(format!("{}/messages", self.base_url)))
            .json(&payload)
            .send()
            .await
            .map_err(|error| ReminderError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReminderError::Status { status: status.as_u16(), body });
        }

        info!(
            event_name = "reminder.created",
            reminder_id = %reminder.id,
            fire_at = %fire_at.to_rfc3339(),
            "booking reminder scheduled"
        );
        Ok(())
    }

    async fn delete(&self, reminder_id: &str) -> Result<(), ReminderError> {
        let response = self
            .authorize(self.client.delete(format!("{}/messages/{reminder_id}", self.base_url)))
            .send()
            .await
            .map_err(|error| ReminderError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReminderError::Status { status: status.as_u16(), body });
        }

        info!(
            event_name = "reminder.deleted",
            reminder_id = %reminder_id,
            "booking reminder removed"
        );
        Ok(())
    }
}

/// Used when the reminder side-channel is disabled by configuration.
#[derive(Default)]
pub struct NoopReminderScheduler;

#[async_trait]
impl ReminderScheduler for NoopReminderScheduler {
    async fn create(&self, _reminder: &ReminderRequest) -> Result<(), ReminderError> {
        Ok(())
    }

    async fn delete(&self, _reminder_id: &str) -> Result<(), ReminderError> {
        Ok(())
    }
}

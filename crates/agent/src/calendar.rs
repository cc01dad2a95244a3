use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use recepta_core::config::CalendarConfig;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Request(String),
    #[error("calendar returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("calendar response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusySlot {
    pub summary: String,
    pub start: String,
    pub end: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: String,
    pub end: String,
}

/// Calendar backend at its interface boundary: list busy slots, create
/// an event, delete an event. Timestamps are ISO 8601 strings as the
/// agent produced them.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn busy_between(
        &self,
        calendar_id: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<BusySlot>, CalendarError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        summary: &str,
        description: &str,
        start: &str,
        end: &str,
    ) -> Result<CalendarEvent, CalendarError>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError>;
}

pub struct HttpCalendarClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
    timezone: String,
}

impl HttpCalendarClient {
    pub fn new(config: &CalendarConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_token: config.api_token.clone(),
            timezone: config.timezone.clone(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<WireEvent>,
}

#[derive(Deserialize)]
struct WireEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: WireEventTime,
    end: WireEventTime,
}

#[derive(Deserialize)]
struct WireEventTime {
    #[serde(default, rename = "dateTime")]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl WireEventTime {
    fn into_string(self) -> String {
        self.date_time.or(self.date).unwrap_or_default()
    }
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn busy_between(
        &self,
        calendar_id: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<BusySlot>, CalendarError> {
        let response = self
            .authorize(self.client.get(format!("{}/calendars/{calendar_id}/events", self.base_url)))
            .query(&[
                ("timeMin", start),
                ("timeMax", end),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .send()
            .await
            .map_err(|error| CalendarError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Status { status: status.as_u16(), body });
        }

        let list: EventList =
            response.json().await.map_err(|error| CalendarError::Decode(error.to_string()))?;

        Ok(list
            .items
            .into_iter()
            .map(|event| BusySlot {
                summary: event.summary.unwrap_or_else(|| "Untitled".to_owned()),
                start: event.start.into_string(),
                end: event.end.into_string(),
            })
            .collect())
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        summary: &str,
        description: &str,
        start: &str,
        end: &str,
    ) -> Result<CalendarEvent, CalendarError> {
        let payload = serde_json::json!({
            "summary": summary,
            "description": description,
            "start": { "dateTime": start, "timeZone": self.timezone },
            "end": { "dateTime": end, "timeZone": self.timezone },
        });

        let response = self
            .authorize(self.client.post(format!("{}/calendars/{calendar_id}/events", self.base_url)))
            .json(&payload)
            .send()
            .await
            .map_err(|error| CalendarError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Status { status: status.as_u16(), body });
        }

        let event: WireEvent =
            response.json().await.map_err(|error| CalendarError::Decode(error.to_string()))?;

        Ok(CalendarEvent {
            id: event.id,
            summary: event.summary.unwrap_or_else(|| summary.to_owned()),
            start: event.start.into_string(),
            end: event.end.into_string(),
        })
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let response = self
            .authorize(
                self.client
                    .delete(format!("{}/calendars/{calendar_id}/events/{event_id}", self.base_url)),
            )
            .send()
            .await
            .map_err(|error| CalendarError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Status { status: status.as_u16(), body });
        }

        Ok(())
    }
}


#[cfg(test)]
impl WireEventTime {
    fn clone_into_string(&self) -> String {
        self.date_time.clone().or_else(|| self.date.clone()).unwrap_or_default()
    }
}

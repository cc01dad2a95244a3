use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use recepta_core::config::GatewayConfig;
use recepta_core::domain::knowledge::StoredFile;
use recepta_core::domain::user::SessionId;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway admin number is not configured")]
    MissingAdminNumber,
}

/// Per-chunk delivery receipt. The gateway's response carries more, but
/// only these fields are ever inspected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DeliveryAck {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Summary pushed to the responsible doctor when a booking lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingNotice {
    pub patient_number: String,
    pub patient_name: String,
    pub insurance: String,
    pub document: String,
    pub procedure: String,
    pub description: String,
    pub doctor_number: String,
    pub starts_at: String,
    pub ends_at: String,
}

/// Alert pushed to the clinic admin when a sender is handed off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffNotice {
    pub patient_number: String,
    pub patient_name: String,
    pub reason: String,
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Sends `text` in paragraph/sentence chunks with a simulated typing
    /// delay per chunk. Returns one ack per chunk delivered.
    async fn send_text(
        &self,
        to: &SessionId,
        text: &str,
    ) -> Result<Vec<DeliveryAck>, GatewayError>;

    async fn send_file(
        &self,
        to: &SessionId,
        file: &StoredFile,
        caption: &str,
    ) -> Result<DeliveryAck, GatewayError>;

    async fn notify_booking(&self, notice: &BookingNotice) -> Result<(), GatewayError>;

    async fn notify_handoff(&self, notice: &HandoffNotice) -> Result<(), GatewayError>;
}

/// How outbound text is broken up before delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub threshold: usize,
    pub delay_ms_per_char: u64,
    pub delay_cap_ms: u64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self { threshold: 300, delay_ms_per_char: 30, delay_cap_ms: 3_000 }
    }
}

impl ChunkPolicy {
    /// Blank-line paragraphs first; any paragraph past the threshold is
    /// re-split at sentence boundaries so no chunk reads like a wall of
    /// text.
    pub fn chunks(&self, text: &str) -> Vec<String> {
        text.trim()
            .split("\n\n")
            .map(str::trim)
            .filter(|paragraph| !paragraph.is_empty())
            .flat_map(|paragraph| {
                if paragraph.len() > self.threshold {
                    split_sentences(paragraph)
                } else {
                    vec![paragraph.to_owned()]
                }
            })
            .collect()
    }

    pub fn typing_delay_ms(&self, chunk: &str) -> u64 {
        (chunk.len() as u64).saturating_mul(self.delay_ms_per_char).min(self.delay_cap_ms)
    }
}

/// Breaks after `.`, `!`, or `?` followed by whitespace. Mid-token
/// punctuation (decimals, `R$ 1.50`) does not split because the next
/// character is not whitespace.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace())
        {
            while chars.peek().map_or(false, |next| next.is_whitespace()) {
                chars.next();
            }
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_owned());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }
    sentences
}

pub struct HttpMessageGateway {
    client: reqwest::Client,
    base_url: String,
    instance: String,
    api_key: SecretString,
    admin_number: Option<String>,
    chunking: ChunkPolicy,
}

impl HttpMessageGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            instance: config.instance.clone(),
            api_key: config.api_key.clone(),
            admin_number: config.admin_number.clone(),
            chunking: ChunkPolicy {
                threshold: config.chunk_threshold,
                delay_ms_per_char: config.typing_delay_ms_per_char,
                delay_cap_ms: config.typing_delay_cap_ms,
            },
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryAck, GatewayError> {
        let url = format!("{}{}/{}", self.base_url, endpoint, self.instance);
        let response = self
            .client
            .post(url)
            .header("apikey", self.api_key.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status: status.as_u16(), body });
        }

        Ok(response.json::<DeliveryAck>().await.unwrap_or_default())
    }

    async fn send_plain(&self, number: &str, text: &str) -> Result<DeliveryAck, GatewayError> {
        let payload = serde_json::json!({
            "number": number,
            "text": text,
            "delay": self.chunking.typing_delay_ms(text),
            "presence": "composing",
        });
        self.post("/message/sendText", &payload).await
    }
}

#[async_trait]
impl MessageGateway for HttpMessageGateway {
    async fn send_text(
        &self,
        to: &SessionId,
        text: &str,
    ) -> Result<Vec<DeliveryAck>, GatewayError> {
        let mut acks = Vec::new();
        for chunk in self.chunking.chunks(text) {
            acks.push(self.send_plain(&to.0, &chunk).await?);
        }
        Ok(acks)
    }

    async fn send_file(
        &self,
        to: &SessionId,
        file: &StoredFile,
        caption: &str,
    ) -> Result<DeliveryAck, GatewayError> {
        let payload = serde_json::json!({
            "number": to.0,
            "mediatype": file.media_type,
            "fileName": file.file_name,
            "media": file.location,
            "caption": caption,
            "delay": 2_000,
            "presence": "composing",
        });
        self.post("/message/sendMedia", &payload).await
    }

    async fn notify_booking(&self, notice: &BookingNotice) -> Result<(), GatewayError> {
        self.send_plain(&notice.doctor_number, &booking_notice_text(notice)).await?;
        Ok(())
    }

    async fn notify_handoff(&self, notice: &HandoffNotice) -> Result<(), GatewayError> {
        let Some(admin_number) = self.admin_number.as_deref() else {
            warn!(
                event_name = "gateway.handoff_notice_skipped",
                patient_number = %notice.patient_number,
                "no admin number configured; handoff notice not delivered"
            );
            return Err(GatewayError::MissingAdminNumber);
        };
        self.send_plain(admin_number, &handoff_notice_text(notice)).await?;
        Ok(())
    }
}

pub fn booking_notice_text(notice: &BookingNotice) -> String {
    format!(
        "New booking confirmed\n\n\
         Patient: {name}\n\
         Phone: {number}\n\
         Starts: {starts}\n\
         Ends: {ends}\n\
         Insurance: {insurance}\n\
         Document: {document}\n\
         Procedure: {procedure}\n\
         Notes: {description}\n\n\
         Check the calendar or contact the patient.",
        name = notice.patient_name,
        number = notice.patient_number,
        starts = notice.starts_at,
        ends = notice.ends_at,
        insurance = notice.insurance,
        document = notice.document,
        procedure = notice.procedure,
        description = notice.description,
    )
}

pub fn handoff_notice_text(notice: &HandoffNotice) -> String {
    format!(
        "Patient waiting for human assistance\n\n\
         Patient: {name}\n\
         Phone: {number}\n\
         Reason: {reason}\n\n\
         Please get in touch.",
        name = notice.patient_name,
        number = notice.patient_number,
        reason = notice.reason,
    )
}

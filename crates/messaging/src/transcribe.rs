use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcription request failed: {0}")]
    Request(String),
    #[error("transcription service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transcription response had no text")]
    EmptyResponse,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscribeError>;
}

/// Whisper-style `audio/transcriptions` endpoint client.
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    language: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscribeError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec()).file_name("audio.ogg");
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let mut request =
            self.client.post(format!("{}/audio/transcriptions", self.base_url)).multipart(form);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| TranscribeError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Status { status: status.as_u16(), body });
        }

        let parsed: TranscriptionResponse =
            response.json().await.map_err(|_| TranscribeError::EmptyResponse)?;
        Ok(parsed.text)
    }
}

pub const AUDIO_MISSING_PLACEHOLDER: &str = "[audio not processed]";
pub const AUDIO_FAILED_PLACEHOLDER: &str = "[audio transcription failed]";

/// Decodes and transcribes an inbound voice note. Always returns text:
/// a missing payload or a failed call degrades into a placeholder the
/// conversation can carry forward instead of aborting the turn.
pub async fn transcribe_base64(
    transcriber: &dyn Transcriber,
    audio_base64: Option<&str>,
) -> String {
    let Some(encoded) = audio_base64 else {
        return AUDIO_MISSING_PLACEHOLDER.to_owned();
    };

    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(
                event_name = "transcribe.decode_failed",
                error = %error,
                "inbound audio payload was not valid base64"
            );
            return AUDIO_FAILED_PLACEHOLDER.to_owned();
        }
    };

    match transcriber.transcribe(&bytes).await {
        Ok(text) => text,
        Err(error) => {
            warn!(
                event_name = "transcribe.request_failed",
                error = %error,
                "audio transcription failed; falling back to placeholder"
            );
            AUDIO_FAILED_PLACEHOLDER.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        transcribe_base64, TranscribeError, Transcriber, AUDIO_FAILED_PLACEHOLDER,
        AUDIO_MISSING_PLACEHOLDER,
    };

    struct ScriptedTranscriber {
        result: Result<String, ()>,
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(&self, _audio: &[u8]) -> Result<String, TranscribeError> {
            self.result
                .clone()
                .map_err(|_| TranscribeError::Request("scripted failure".to_owned()))
        }
    }

    #[tokio::test]
    async fn successful_transcription_returns_text() {
        let transcriber = ScriptedTranscriber { result: Ok("I need an appointment".to_owned()) };
        let text = transcribe_base64(&transcriber, Some("b2dn")).await;
        assert_eq!(text, "I need an appointment");
    }

    #[tokio::test]
    async fn missing_payload_yields_placeholder() {
        let transcriber = ScriptedTranscriber { result: Ok("unused".to_owned()) };
        let text = transcribe_base64(&transcriber, None).await;
        assert_eq!(text, AUDIO_MISSING_PLACEHOLDER);
    }

    #[tokio::test]
    async fn failures_degrade_to_placeholder_not_error() {
        let transcriber = ScriptedTranscriber { result: Err(()) };
        let text = transcribe_base64(&transcriber, Some("b2dn")).await;
        assert_eq!(text, AUDIO_FAILED_PLACEHOLDER);

        let text = transcribe_base64(&transcriber, Some("not valid base64!!!")).await;
        assert_eq!(text, AUDIO_FAILED_PLACEHOLDER);
    }
}

use serde_json::Value;
use thiserror::Error;

use recepta_core::domain::user::SessionId;

/// One inbound message event as the gateway posts it to the webhook,
/// reduced to the fields this system acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub session_id: SessionId,
    pub payload: InboundPayload,
    /// Set when the event is an echo of something sent from the
    /// clinic's own number (by this system or by a human operator).
    pub from_self: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundPayload {
    Text { content: String },
    Image,
    Audio { base64: Option<String> },
    Unsupported { kind: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    #[error("webhook payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("sender jid `{0}` has no number part")]
    InvalidJid(String),
}

/// Extracts the typed event from the gateway's webhook envelope.
///
/// The envelope nests everything under `data`: the sender jid and echo
/// flag under `data.key`, the kind under `data.messageType`, and the
/// kind-specific payload under `data.message`.
pub fn parse_webhook_event(body: &Value) -> Result<InboundEvent, EventParseError> {
    let data = body.get("data").ok_or(EventParseError::MissingField("data"))?;
    let key = data.get("key").ok_or(EventParseError::MissingField("data.key"))?;

    let remote_jid = key
        .get("remoteJid")
        .and_then(Value::as_str)
        .ok_or(EventParseError::MissingField("data.key.remoteJid"))?;
    let number = remote_jid
        .split('@')
        .next()
        .filter(|part| !part.is_empty())
        .ok_or_else(|| EventParseError::InvalidJid(remote_jid.to_owned()))?;

    let from_self = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);

    let message_type = data
        .get("messageType")
        .and_then(Value::as_str)
        .ok_or(EventParseError::MissingField("data.messageType"))?;

    let message = data.get("message");
    let payload = match message_type {
        "conversation" => {
            let content = message
                .and_then(|m| m.get("conversation"))
                .and_then(Value::as_str)
                .ok_or(EventParseError::MissingField("data.message.conversation"))?;
            InboundPayload::Text { content: content.to_owned() }
        }
        "imageMessage" => InboundPayload::Image,
        "audioMessage" => {
            let base64 = message
                .and_then(|m| m.get("base64"))
                .and_then(Value::as_str)
                .map(str::to_owned);
            InboundPayload::Audio { base64 }
        }
        other => InboundPayload::Unsupported { kind: other.to_owned() },
    };

    Ok(InboundEvent { session_id: SessionId(number.to_owned()), payload, from_self })
}

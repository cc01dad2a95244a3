use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use recepta_core::domain::message::{MessagePayload, SenderRole};
use recepta_core::domain::user::SessionId;
use recepta_core::errors::{ApplicationError, InterfaceError};
use recepta_db::repositories::{MessageRepository, UserRepository};
use recepta_messaging::events::{parse_webhook_event, InboundPayload};
use recepta_messaging::gateway::MessageGateway;
use recepta_messaging::transcribe::{transcribe_base64, Transcriber};

use crate::buffer::InboundBuffer;

pub const IMAGE_PLACEHOLDER: &str = "[image received]";

#[derive(Clone)]
pub struct WebhookState {
    pub users: Arc<dyn UserRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub buffer: Arc<dyn InboundBuffer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub gateway: Arc<dyn MessageGateway>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

fn error_response(
    error: ApplicationError,
    session: &SessionId,
    context: &'static str,
) -> (StatusCode, Json<WebhookResponse>) {
    let interface = error.into_interface(session.0.clone());
    let status_code = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "webhook.request_failed",
        session_id = %session,
        context,
        error = %interface,
        "inbound request failed"
    );
    (status_code, Json(WebhookResponse { status: "error" }))
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/reminder", post(reminder))
        .with_state(state)
}

/// Inbound message endpoint. Returns as soon as the fragment is
/// buffered; all agent work happens behind the queue.
///
/// Order matters: malformed payloads are rejected before anything is
/// stored, self echoes and gated senders are persisted without ever
/// touching the buffer, and only then does the fragment enter the
/// debounce window.
pub async fn webhook(
    State(state): State<WebhookState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<WebhookResponse>) {
    let event = match parse_webhook_event(&body) {
        Ok(event) => event,
        Err(error) => {
            warn!(
                event_name = "webhook.invalid_payload",
                error = %error,
                "rejecting malformed webhook payload"
            );
            return (StatusCode::BAD_REQUEST, Json(WebhookResponse { status: "invalid_payload" }));
        }
    };

    let text = match &event.payload {
        InboundPayload::Text { content } => content.clone(),
        InboundPayload::Image => IMAGE_PLACEHOLDER.to_owned(),
        InboundPayload::Audio { base64 } => {
            transcribe_base64(state.transcriber.as_ref(), base64.as_deref()).await
        }
        InboundPayload::Unsupported { kind } => {
            info!(
                event_name = "webhook.unsupported_kind",
                session_id = %event.session_id,
                kind = %kind,
                "ignoring unsupported message kind"
            );
            return (StatusCode::OK, Json(WebhookResponse { status: "ignored" }));
        }
    };

    // Echo of our own outbound channel (bot reply or a human typing on
    // the clinic's device): record it and stop, or the system would
    // answer itself forever.
    if event.from_self {
        if let Err(error) = state
            .messages
            .append(
                &event.session_id,
                SenderRole::Operator,
                None,
                &MessagePayload::User { content: text },
            )
            .await
        {
            return error_response(
                ApplicationError::Persistence(error.to_string()),
                &event.session_id,
                "self_echo_persist",
            );
        }
        return (StatusCode::OK, Json(WebhookResponse { status: "self_message_recorded" }));
    }

    // Handoff gate: a blocked sender gets persistence only.
    match state.users.find(&event.session_id).await {
        Ok(Some(user)) if user.requires_human => {
            info!(
                event_name = "webhook.handoff_gate_hit",
                session_id = %event.session_id,
                "sender is gated; recording message for manual follow-up"
            );
            if let Err(error) = state
                .messages
                .append(
                    &event.session_id,
                    SenderRole::User,
                    None,
                    &MessagePayload::User { content: text },
                )
                .await
            {
                return error_response(
                    ApplicationError::Persistence(error.to_string()),
                    &event.session_id,
                    "gated_persist",
                );
            }
            return (StatusCode::OK, Json(WebhookResponse { status: "handoff_active" }));
        }
        Ok(_) => {}
        Err(error) => {
            return error_response(
                ApplicationError::Persistence(error.to_string()),
                &event.session_id,
                "gate_check",
            );
        }
    }

    if let Err(error) = state.buffer.append(&event.session_id, &text) {
        return error_response(
            ApplicationError::Integration(error.to_string()),
            &event.session_id,
            "buffer_append",
        );
    }

    (StatusCode::OK, Json(WebhookResponse { status: "buffered" }))
}

/// Reminder-scheduler callback: deliver the reminder text to the sender
/// and keep it in the chat log.
pub async fn reminder(
    State(state): State<WebhookState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<WebhookResponse>) {
    let sender = body.get("sender").and_then(serde_json::Value::as_str);
    let message = body.get("message").and_then(serde_json::Value::as_str);
    let (Some(sender), Some(message)) = (sender, message) else {
        return (StatusCode::BAD_REQUEST, Json(WebhookResponse { status: "invalid_payload" }));
    };

    let session = SessionId(sender.to_owned());
    if let Err(error) = state.gateway.send_text(&session, message).await {
        return error_response(
            ApplicationError::Integration(error.to_string()),
            &session,
            "reminder_send",
        );
    }

    if let Err(error) = state
        .messages
        .append(
            &session,
            SenderRole::Assistant,
            None,
            &MessagePayload::Assistant { content: message.to_owned() },
        )
        .await
    {
        warn!(
            event_name = "webhook.reminder_persist_failed",
            session_id = %session,
            error = %error,
            "reminder message was not persisted"
        );
    }

    info!(
        event_name = "webhook.reminder_delivered",
        session_id = %session,
        "reminder delivered and recorded"
    );
    (StatusCode::OK, Json(WebhookResponse { status: "sent" }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Json};
    use serde_json::json;

    use recepta_core::domain::message::{MessagePayload, SenderRole};
    use recepta_core::domain::user::SessionId;
    use recepta_db::repositories::{
        MessageRepository, SqlMessageRepository, SqlUserRepository, UserRepository,
    };
    use recepta_db::{connect_with_settings, migrations, DbPool};
    use recepta_messaging::gateway::{
        BookingNotice, DeliveryAck, GatewayError, HandoffNotice, MessageGateway,
    };
    use recepta_messaging::transcribe::{TranscribeError, Transcriber};
    use recepta_core::domain::knowledge::StoredFile;

    use super::{reminder, webhook, WebhookState, IMAGE_PLACEHOLDER};
    use crate::buffer::{BufferError, InboundBuffer};

    struct RecordingBuffer {
        appended: Mutex<Vec<(String, String)>>,
    }

    impl RecordingBuffer {
        fn new() -> Arc<Self> {
            Arc::new(Self { appended: Mutex::new(Vec::new()) })
        }

        fn appended(&self) -> Vec<(String, String)> {
            self.appended.lock().expect("lock").clone()
        }
    }

    impl InboundBuffer for RecordingBuffer {
        fn append(&self, session: &SessionId, fragment: &str) -> Result<(), BufferError> {
            self.appended.lock().expect("lock").push((session.0.clone(), fragment.to_owned()));
            Ok(())
        }
    }

    struct FixedTranscriber;

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _audio: &[u8]) -> Result<String, TranscribeError> {
            Ok("voice note transcript".to_owned())
        }
    }

    struct RecordingGateway {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl MessageGateway for RecordingGateway {
        async fn send_text(
            &self,
            to: &SessionId,
            text: &str,
        ) -> Result<Vec<DeliveryAck>, GatewayError> {
            self.sent.lock().expect("lock").push((to.0.clone(), text.to_owned()));
            Ok(vec![DeliveryAck::default()])
        }

        async fn send_file(
            &self,
            _to: &SessionId,
            _file: &StoredFile,
            _caption: &str,
        ) -> Result<DeliveryAck, GatewayError> {
            Ok(DeliveryAck::default())
        }

        async fn notify_booking(&self, _notice: &BookingNotice) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn notify_handoff(&self, _notice: &HandoffNotice) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    struct Fixture {
        state: WebhookState,
        buffer: Arc<RecordingBuffer>,
        gateway: Arc<RecordingGateway>,
        users: Arc<SqlUserRepository>,
        messages: Arc<SqlMessageRepository>,
        pool: DbPool,
    }

    async fn fixture(name: &str) -> Fixture {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");

        let buffer = RecordingBuffer::new();
        let gateway = RecordingGateway::new();
        let users = Arc::new(SqlUserRepository::new(pool.clone()));
        let messages = Arc::new(SqlMessageRepository::new(pool.clone()));

        let state = WebhookState {
            users: users.clone(),
            messages: messages.clone(),
            buffer: buffer.clone(),
            transcriber: Arc::new(FixedTranscriber),
            gateway: gateway.clone(),
        };

        Fixture { state, buffer, gateway, users, messages, pool }
    }

    fn envelope(number: &str, message_type: &str, message: serde_json::Value, from_me: bool) -> serde_json::Value {
        json!({
            "data": {
                "key": {
                    "remoteJid": format!("{number}@s.whatsapp.net"),
                    "fromMe": from_me,
                },
                "messageType": message_type,
                "message": message,
            }
        })
    }

    fn text_envelope(number: &str, content: &str) -> serde_json::Value {
        envelope(number, "conversation", json!({"conversation": content}), false)
    }

    #[tokio::test]
    async fn text_messages_are_buffered_and_acknowledged() {
        let fixture = fixture("webhook_buffered").await;

        let (status, Json(response)) =
            webhook(State(fixture.state.clone()), Json(text_envelope("5599000000001", "Hello")))
                .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "buffered");
        assert_eq!(
            fixture.buffer.appended(),
            vec![("5599000000001".to_owned(), "Hello".to_owned())]
        );

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn malformed_payloads_are_rejected_before_any_state_changes() {
        let fixture = fixture("webhook_malformed").await;

        let (status, Json(response)) =
            webhook(State(fixture.state.clone()), Json(json!({"unexpected": true}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.status, "invalid_payload");
        assert!(fixture.buffer.appended().is_empty());

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn self_echoes_are_persisted_but_never_buffered() {
        let fixture = fixture("webhook_self_echo").await;
        let session = SessionId("5599000000002".to_owned());

        let (status, Json(response)) = webhook(
            State(fixture.state.clone()),
            Json(envelope(
                &session.0,
                "conversation",
                json!({"conversation": "typed by the clinic"}),
                true,
            )),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "self_message_recorded");
        assert!(fixture.buffer.appended().is_empty());

        let history = fixture.messages.recent_history(&session, 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, SenderRole::Operator);

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn gated_senders_get_persistence_only() {
        let fixture = fixture("webhook_gate").await;
        let session = SessionId("5599000000003".to_owned());
        fixture.users.create_if_absent(&session, "whatsapp").await.expect("create");
        fixture.users.set_requires_human(&session).await.expect("gate");

        let (status, Json(response)) = webhook(
            State(fixture.state.clone()),
            Json(text_envelope(&session.0, "anyone there?")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "handoff_active");
        assert!(fixture.buffer.appended().is_empty());
        assert!(fixture.gateway.sent.lock().expect("lock").is_empty());

        let history = fixture.messages.recent_history(&session, 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, SenderRole::User);
        assert_eq!(
            history[0].payload,
            MessagePayload::User { content: "anyone there?".to_owned() }
        );

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn audio_is_transcribed_before_buffering() {
        let fixture = fixture("webhook_audio").await;

        let (status, Json(response)) = webhook(
            State(fixture.state.clone()),
            Json(envelope("5599000000004", "audioMessage", json!({"base64": "b2dn"}), false)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "buffered");
        assert_eq!(
            fixture.buffer.appended(),
            vec![("5599000000004".to_owned(), "voice note transcript".to_owned())]
        );

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn images_become_a_placeholder_and_stickers_are_inert() {
        let fixture = fixture("webhook_kinds").await;

        let (_, Json(response)) = webhook(
            State(fixture.state.clone()),
            Json(envelope("5599000000005", "imageMessage", json!({}), false)),
        )
        .await;
        assert_eq!(response.status, "buffered");
        assert_eq!(fixture.buffer.appended()[0].1, IMAGE_PLACEHOLDER);

        let (status, Json(response)) = webhook(
            State(fixture.state.clone()),
            Json(envelope("5599000000005", "stickerMessage", json!({}), false)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "ignored");
        assert_eq!(fixture.buffer.appended().len(), 1);

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn reminder_callback_sends_and_persists() {
        let fixture = fixture("webhook_reminder").await;
        let session = SessionId("5599000000006".to_owned());

        let (status, Json(response)) = reminder(
            State(fixture.state.clone()),
            Json(json!({"sender": session.0, "message": "See you at 14:00!"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "sent");

        let sent = fixture.gateway.sent.lock().expect("lock").clone();
        assert_eq!(sent, vec![(session.0.clone(), "See you at 14:00!".to_owned())]);

        let history = fixture.messages.recent_history(&session, 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, SenderRole::Assistant);

        fixture.pool.close().await;
    }

    #[tokio::test]
    async fn reminder_callback_rejects_missing_fields() {
        let fixture = fixture("webhook_reminder_bad").await;

        let (status, Json(response)) =
            reminder(State(fixture.state.clone()), Json(json!({"sender": "5599"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.status, "invalid_payload");

        fixture.pool.close().await;
    }
}

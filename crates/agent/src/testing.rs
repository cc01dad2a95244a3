//! Shared scripted fakes for the crate's tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use recepta_core::domain::knowledge::StoredFile;
use recepta_core::domain::user::SessionId;
use recepta_core::flow::RouteDecision;
use recepta_db::{connect_with_settings, migrations, DbPool};
use recepta_messaging::gateway::{
    BookingNotice, DeliveryAck, GatewayError, HandoffNotice, MessageGateway,
};
use recepta_messaging::reminders::{ReminderError, ReminderRequest, ReminderScheduler};

use crate::calendar::{BusySlot, CalendarClient, CalendarError, CalendarEvent};
use crate::embedding::EmbeddingClient;
use crate::llm::{AgentReply, ChatMessage, LlmClient, LlmError, RoutedReply, ToolSpec};

pub async fn setup_pool(name: &str) -> DbPool {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    pool
}

pub struct RecordingGateway {
    pub sent_texts: Mutex<Vec<(String, String)>>,
    pub sent_files: Mutex<Vec<(String, String)>>,
    pub booking_notices: Mutex<Vec<BookingNotice>>,
    pub handoff_notices: Mutex<Vec<HandoffNotice>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            sent_texts: Mutex::new(Vec::new()),
            sent_files: Mutex::new(Vec::new()),
            booking_notices: Mutex::new(Vec::new()),
            handoff_notices: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn send_text(&self, to: &SessionId, text: &str) -> Result<Vec<DeliveryAck>, GatewayError> {
        self.sent_texts.lock().await.push((to.0.clone(), text.to_owned()));
        Ok(vec![DeliveryAck::default()])
    }

    async fn send_file(
        &self,
        to: &SessionId,
        file: &StoredFile,
        _caption: &str,
    ) -> Result<DeliveryAck, GatewayError> {
        self.sent_files.lock().await.push((to.0.clone(), file.file_name.clone()));
        Ok(DeliveryAck::default())
    }

    async fn notify_booking(&self, notice: &BookingNotice) -> Result<(), GatewayError> {
        self.booking_notices.lock().await.push(notice.clone());
        Ok(())
    }

    async fn notify_handoff(&self, notice: &HandoffNotice) -> Result<(), GatewayError> {
        self.handoff_notices.lock().await.push(notice.clone());
        Ok(())
    }
}

pub struct ScriptedCalendar {
    pub busy: Vec<BusySlot>,
    pub created: Mutex<Vec<CalendarEvent>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedCalendar {
    pub fn free() -> Self {
        Self { busy: Vec::new(), created: Mutex::new(Vec::new()), deleted: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl CalendarClient for ScriptedCalendar {
    async fn busy_between(
        &self,
        _calendar_id: &str,
        _start: &str,
        _end: &str,
    ) -> Result<Vec<BusySlot>, CalendarError> {
        Ok(self.busy.clone())
    }

    async fn create_event(
        &self,
        _calendar_id: &str,
        summary: &str,
        _description: &str,
        start: &str,
        end: &str,
    ) -> Result<CalendarEvent, CalendarError> {
        let event = CalendarEvent {
            id: format!("evt-{}", self.created.lock().await.len() + 1),
            summary: summary.to_owned(),
            start: start.to_owned(),
            end: end.to_owned(),
        };
        self.created.lock().await.push(event.clone());
        Ok(event)
    }

    async fn delete_event(&self, _calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        self.deleted.lock().await.push(event_id.to_owned());
        Ok(())
    }
}

pub struct RecordingReminders {
    pub created: Mutex<Vec<ReminderRequest>>,
    pub deleted: Mutex<Vec<String>>,
}

impl RecordingReminders {
    pub fn new() -> Self {
        Self { created: Mutex::new(Vec::new()), deleted: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ReminderScheduler for RecordingReminders {
    async fn create(&self, reminder: &ReminderRequest) -> Result<(), ReminderError> {
        self.created.lock().await.push(reminder.clone());
        Ok(())
    }

    async fn delete(&self, reminder_id: &str) -> Result<(), ReminderError> {
        self.deleted.lock().await.push(reminder_id.to_owned());
        Ok(())
    }
}

pub struct FixedEmbedding;

#[async_trait]
impl EmbeddingClient for FixedEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

/// Gateway whose text sends always fail, for exercising retry paths.
pub struct FailingGateway;

#[async_trait]
impl MessageGateway for FailingGateway {
    async fn send_text(
        &self,
        _to: &SessionId,
        _text: &str,
    ) -> Result<Vec<DeliveryAck>, GatewayError> {
        Err(GatewayError::Request("scripted outage".to_owned()))
    }

    async fn send_file(
        &self,
        _to: &SessionId,
        _file: &StoredFile,
        _caption: &str,
    ) -> Result<DeliveryAck, GatewayError> {
        Err(GatewayError::Request("scripted outage".to_owned()))
    }

    async fn notify_booking(&self, _notice: &BookingNotice) -> Result<(), GatewayError> {
        Err(GatewayError::Request("scripted outage".to_owned()))
    }

    async fn notify_handoff(&self, _notice: &HandoffNotice) -> Result<(), GatewayError> {
        Err(GatewayError::Request("scripted outage".to_owned()))
    }
}

/// Client that never answers within any reasonable window, for
/// exercising the worker's processing timeout.
pub struct SlowLlm;

#[async_trait]
impl LlmClient for SlowLlm {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<AgentReply, LlmError> {
        tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
        Err(LlmError::Request("unreachable".to_owned()))
    }

    async fn route(&self, _messages: &[ChatMessage]) -> Result<RoutedReply, LlmError> {
        tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
        Err(LlmError::Request("unreachable".to_owned()))
    }
}

/// Replays scripted chat replies / routing decisions in order and
/// records the context each call received.
pub struct ScriptedLlm {
    pub chat_replies: Mutex<VecDeque<Result<AgentReply, String>>>,
    pub route_decisions: Mutex<VecDeque<Result<RouteDecision, String>>>,
    pub chat_contexts: Mutex<Vec<Vec<ChatMessage>>>,
    pub route_contexts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(
        chat_replies: Vec<Result<AgentReply, String>>,
        route_decisions: Vec<Result<RouteDecision, String>>,
    ) -> Self {
        Self {
            chat_replies: Mutex::new(chat_replies.into()),
            route_decisions: Mutex::new(route_decisions.into()),
            chat_contexts: Mutex::new(Vec::new()),
            route_contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(content: &str) -> AgentReply {
        AgentReply {
            content: content.to_owned(),
            tool_calls: Vec::new(),
            usage: Default::default(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<AgentReply, LlmError> {
        self.chat_contexts.lock().await.push(messages.to_vec());
        match self.chat_replies.lock().await.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::Request(message)),
            None => Err(LlmError::Request("no scripted chat reply left".to_owned())),
        }
    }

    async fn route(&self, messages: &[ChatMessage]) -> Result<RoutedReply, LlmError> {
        self.route_contexts.lock().await.push(messages.to_vec());
        match self.route_decisions.lock().await.pop_front() {
            Some(Ok(decision)) => Ok(RoutedReply { decision, usage: Default::default() }),
            Some(Err(message)) => Err(LlmError::Request(message)),
            None => Err(LlmError::Request("no scripted route decision left".to_owned())),
        }
    }
}

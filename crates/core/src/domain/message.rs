use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column value for the `sender` field of the chat log. `Operator`
/// marks messages typed on the clinic's own device (echoed back by the
/// gateway) so a manual takeover still reads as the human side of the
/// conversation when history is reloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    User,
    Assistant,
    Operator,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Operator => "operator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

/// The closed set of agent stages the router can run. Adding a stage is
/// a compile-time change: every match over this enum is exhaustive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStage {
    Receptionist,
    Orchestrator,
    Rag,
    Scheduling,
}

impl AgentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receptionist => "receptionist",
            Self::Orchestrator => "orchestrator",
            Self::Rag => "rag",
            Self::Scheduling => "scheduling",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "receptionist" => Some(Self::Receptionist),
            "orchestrator" => Some(Self::Orchestrator),
            "rag" => Some(Self::Rag),
            "scheduling" => Some(Self::Scheduling),
            _ => None,
        }
    }
}

/// A tool invocation as the model requested it, kept verbatim so a later
/// turn can replay the exchange into context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tagged payload stored in the chat log. Each variant carries only the
/// fields valid for that kind of record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    User { content: String },
    Assistant { content: String },
    ToolRequest { calls: Vec<PersistedToolCall> },
    ToolResult { content: String, call_id: String },
}

impl MessagePayload {
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::User { content } | Self::Assistant { content } | Self::ToolResult { content, .. } => {
                Some(content)
            }
            Self::ToolRequest { .. } => None,
        }
    }
}

/// One persisted chat-log entry, as repositories return it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: SenderRole,
    pub agent: Option<AgentStage>,
    pub payload: MessagePayload,
    pub created_at: DateTime<Utc>,
}

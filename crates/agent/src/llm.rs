use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use recepta_core::config::{LlmConfig, LlmProvider};
use recepta_core::domain::message::{MessagePayload, SenderRole, StoredMessage};
use recepta_core::flow::RouteDecision;

/// One entry of the working context handed to the model.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String, tool_calls: Vec<ToolCallRequest> },
    Tool { content: String, call_id: String },
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutedReply {
    pub decision: RouteDecision,
    pub usage: TokenUsage,
}

/// Declaration of a callable tool as advertised to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm call failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Boundary to the language model. Agents are stateless functions over
/// the messages passed in; nothing is retained between calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form completion with optional tool calling.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AgentReply, LlmError>;

    /// Structured routing decision (orchestrator stage).
    async fn route(&self, messages: &[ChatMessage]) -> Result<RoutedReply, LlmError>;
}

/// Rebuilds model context from the persisted chat log. Operator
/// messages (manual takeover echoes) read as the human side.
pub fn chat_messages_from_history(history: &[StoredMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|message| match (&message.role, &message.payload) {
            (_, MessagePayload::User { content }) => ChatMessage::User { content: content.clone() },
            (_, MessagePayload::Assistant { content }) => {
                ChatMessage::Assistant { content: content.clone(), tool_calls: Vec::new() }
            }
            (_, MessagePayload::ToolRequest { calls }) => ChatMessage::Assistant {
                content: String::new(),
                tool_calls: calls
                    .iter()
                    .map(|call| ToolCallRequest {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .collect(),
            },
            (_, MessagePayload::ToolResult { content, call_id }) => {
                ChatMessage::Tool { content: content.clone(), call_id: call_id.clone() }
            }
        })
        .collect()
}

const ROUTE_TOOL_NAME: &str = "route_conversation";

/// OpenAI-compatible chat-completions client. Anthropic and Ollama are
/// reached through their compatibility endpoints, so one wire format
/// covers all three configured providers.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

/// The provider endpoint this configuration resolves to, normalized for
/// the chat-completions wire format.
pub fn resolve_base_url(config: &LlmConfig) -> String {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(config.provider).to_owned());
    match config.provider {
        LlmProvider::Ollama if !base_url.ends_with("/v1") => {
            format!("{}/v1", base_url.trim_end_matches('/'))
        }
        _ => base_url.trim_end_matches('/').to_owned(),
    }
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let base_url = resolve_base_url(config);

        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        }
    }

    async fn complete(&self, request: &WireRequest<'_>) -> Result<WireResponse, LlmError> {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(250_u64.saturating_mul(1 << attempt.min(6)));
                tokio::time::sleep(delay).await;
            }

            let mut builder =
                self.client.post(format!("{}/chat/completions", self.base_url)).json(request);
            if let Some(api_key) = &self.api_key {
                builder = builder.bearer_auth(api_key.expose_secret());
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<WireResponse>()
                            .await
                            .map_err(|error| LlmError::Decode(error.to_string()));
                    }

                    let body = response.text().await.unwrap_or_default();
                    last_error = format!("status {status}: {body}");
                    // Client errors will not improve on retry.
                    if status.is_client_error() {
                        return Err(LlmError::Status { status: status.as_u16(), body });
                    }
                }
                Err(error) => {
                    last_error = error.to_string();
                }
            }

            warn!(
                event_name = "llm.attempt_failed",
                attempt,
                max_retries = self.max_retries,
                error = %last_error,
                "llm call attempt failed"
            );
        }

        Err(LlmError::Exhausted { attempts: self.max_retries + 1, last: last_error })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AgentReply, LlmError> {
        let request = WireRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: wire_tools(tools),
            tool_choice: None,
            temperature: 0.0,
        };

        let response = self.complete(&request).await?;
        let (message, usage) = response.into_parts()?;

        Ok(AgentReply {
            content: message.content.unwrap_or_default(),
            tool_calls: decode_tool_calls(message.tool_calls)?,
            usage,
        })
    }

    async fn route(&self, messages: &[ChatMessage]) -> Result<RoutedReply, LlmError> {
        let route_tool = ToolSpec {
            name: ROUTE_TOOL_NAME,
            description: "Choose which specialist handles this conversation turn.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": {
                        "type": "string",
                        "enum": ["rag", "scheduling", "human"],
                    },
                    "reason": { "type": "string" },
                },
                "required": ["target"],
            }),
        };

        let request = WireRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: wire_tools(&[route_tool]),
            tool_choice: Some(serde_json::json!({
                "type": "function",
                "function": { "name": ROUTE_TOOL_NAME },
            })),
            temperature: 0.0,
        };

        let response = self.complete(&request).await?;
        let (message, usage) = response.into_parts()?;

        let call = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .find(|call| call.function.name == ROUTE_TOOL_NAME)
            .ok_or_else(|| LlmError::Decode("no routing decision in response".to_owned()))?;

        let decision: RouteDecision = serde_json::from_str(&call.function.arguments)
            .map_err(|error| LlmError::Decode(format!("invalid routing arguments: {error}")))?;

        Ok(RoutedReply { decision, usage })
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com/v1",
        LlmProvider::Anthropic => "https://api.anthropic.com/v1",
        LlmProvider::Ollama => "http://localhost:11434/v1",
    }
}

fn wire_tools(tools: &[ToolSpec]) -> Option<Vec<WireTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| WireTool {
                kind: "function",
                function: WireToolFunction {
                    name: tool.name.to_owned(),
                    description: tool.description.to_owned(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect(),
    )
}

fn decode_tool_calls(
    calls: Option<Vec<WireToolCall>>,
) -> Result<Vec<ToolCallRequest>, LlmError> {
    calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments).map_err(|error| {
                LlmError::Decode(format!(
                    "tool call `{}` had invalid arguments: {error}",
                    call.function.name
                ))
            })?;
            Ok(ToolCallRequest { id: call.id, name: call.function.name, arguments })
        })
        .collect()
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        match message {
            ChatMessage::System { content } => Self {
                role: "system",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::User { content } => Self {
                role: "user",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::Assistant { content, tool_calls } => Self {
                role: "assistant",
                content: Some(content.clone()),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|call| WireToolCall {
                                id: call.id.clone(),
                                kind: "function".to_owned(),
                                function: WireCallFunction {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
            },
            ChatMessage::Tool { content, call_id } => Self {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            },
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction,
}

#[derive(Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireCallFunction,
}

#[derive(Serialize, Deserialize)]
struct WireCallFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl WireResponse {
    fn into_parts(self) -> Result<(WireResponseMessage, TokenUsage), LlmError> {
        let usage = self
            .usage
            .map(|usage| TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();

        let message = self
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::Decode("response had no choices".to_owned()))?;

        Ok((message, usage))
    }
}

#[cfg(test)]
mod tests {
    use recepta_core::domain::message::{
        MessagePayload, PersistedToolCall, SenderRole, StoredMessage,
    };

    use super::{chat_messages_from_history, ChatMessage, ToolCallRequest, WireMessage, WireResponse};

    fn stored(role: SenderRole, payload: MessagePayload) -> StoredMessage {
        StoredMessage { role, agent: None, payload, created_at: chrono::Utc::now() }
    }

    #[test]
    fn history_conversion_covers_every_payload_kind() {
        let history = vec![
            stored(SenderRole::User, MessagePayload::User { content: "hi".to_owned() }),
            stored(
                SenderRole::Assistant,
                MessagePayload::ToolRequest {
                    calls: vec![PersistedToolCall {
                        id: "call-1".to_owned(),
                        name: "list_doctors".to_owned(),
                        arguments: serde_json::json!({"procedure": "cleaning"}),
                    }],
                },
            ),
            stored(
                SenderRole::Assistant,
                MessagePayload::ToolResult { content: "[]".to_owned(), call_id: "call-1".to_owned() },
            ),
            stored(SenderRole::Assistant, MessagePayload::Assistant { content: "done".to_owned() }),
            stored(SenderRole::Operator, MessagePayload::User { content: "staff note".to_owned() }),
        ];

        let messages = chat_messages_from_history(&history);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], ChatMessage::User { content: "hi".to_owned() });
        assert!(matches!(
            &messages[1],
            ChatMessage::Assistant { tool_calls, .. } if tool_calls.len() == 1
        ));
        assert_eq!(
            messages[2],
            ChatMessage::Tool { content: "[]".to_owned(), call_id: "call-1".to_owned() }
        );
        assert_eq!(
            messages[4],
            ChatMessage::User { content: "staff note".to_owned() }
        );
    }

    #[test]
    fn assistant_tool_calls_serialize_with_function_payload() {
        let message = ChatMessage::Assistant {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call-9".to_owned(),
                name: "check_availability".to_owned(),
                arguments: serde_json::json!({"calendar_id": "c1"}),
            }],
        };

        let encoded = serde_json::to_value(WireMessage::from(&message)).expect("encode");
        assert_eq!(encoded["role"], "assistant");
        assert_eq!(encoded["tool_calls"][0]["type"], "function");
        assert_eq!(encoded["tool_calls"][0]["function"]["name"], "check_availability");
    }

    #[test]
    fn response_decoding_extracts_message_and_usage() {
        let raw = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call-2",
                        "type": "function",
                        "function": {
                            "name": "search_knowledge",
                            "arguments": "{\"query\":\"prices\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 80, "completion_tokens": 12}
        });

        let response: WireResponse = serde_json::from_value(raw).expect("decode");
        let (message, usage) = response.into_parts().expect("parts");
        assert_eq!(usage.input_tokens, 80);
        assert_eq!(usage.output_tokens, 12);

        let calls = super::decode_tool_calls(message.tool_calls).expect("tool calls");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search_knowledge");
        assert_eq!(calls[0].arguments, serde_json::json!({"query": "prices"}));
    }

    #[test]
    fn empty_choices_are_a_decode_error() {
        let response: WireResponse =
            serde_json::from_value(serde_json::json!({"choices": []})).expect("decode");
        assert!(response.into_parts().is_err());
    }
}

pub mod calendar;
pub mod embedding;
pub mod llm;
pub mod prompt;
pub mod router;
pub mod runtime;
#[cfg(test)]
pub(crate) mod testing;
pub mod tools;

pub use calendar::{BusySlot, CalendarClient, CalendarError, CalendarEvent, HttpCalendarClient};
pub use embedding::{EmbeddingClient, HttpEmbeddingClient};
pub use llm::{
    AgentReply, ChatMessage, HttpLlmClient, LlmClient, LlmError, RoutedReply, TokenUsage,
    ToolCallRequest, ToolSpec,
};
pub use router::{RouterError, TurnReport, TurnRouter};
pub use runtime::QueueWorker;
pub use tools::{ToolExecutor, ToolId};

pub mod config;
pub mod domain;
pub mod errors;
pub mod flow;

pub use domain::booking::Booking;
pub use domain::doctor::{Doctor, DoctorId, HoursBlock};
pub use domain::knowledge::{KnowledgeChunk, StoredFile};
pub use domain::message::{AgentStage, MessagePayload, PersistedToolCall, SenderRole, StoredMessage};
pub use domain::task::{QueuedTask, TaskFate, TaskId, TaskState};
pub use domain::user::{SessionId, UserRecord, UserUpdate};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flow::{RouteDecision, RouteTarget, TransitionOutcome, TurnEvent, TurnPhase};

pub use chrono;

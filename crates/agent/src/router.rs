use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use recepta_core::config::AgentConfig;
use recepta_core::domain::message::{AgentStage, MessagePayload, PersistedToolCall, SenderRole};
use recepta_core::domain::user::SessionId;
use recepta_core::flow::{self, TurnEvent, TurnPhase, TurnTransitionError};
use recepta_db::repositories::{
    MessageRepository, RepositoryError, TokenUsageRepository, UserRepository,
};
use recepta_messaging::gateway::{GatewayError, HandoffNotice, MessageGateway};

use crate::llm::{chat_messages_from_history, ChatMessage, LlmClient, ToolCallRequest, TokenUsage};
use crate::prompt;
use crate::tools::{ToolExecutor, ToolId};

pub const HANDOFF_ACK: &str = "I'm transferring you to a human attendant.\n\
As soon as possible, someone will continue this conversation.";

pub const HANDOFF_FAILURE: &str =
    "There was a problem transferring you to a human attendant. Please try again in a moment.";

pub const STAGE_FAILURE_APOLOGY: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a few minutes.";

pub const TOOL_BUDGET_APOLOGY: &str =
    "Sorry, I couldn't finish that request. Could you rephrase it or try again shortly?";

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Transition(#[from] TurnTransitionError),
    #[error("sender `{0}` has no user record")]
    MissingUser(String),
}

/// What one routed turn produced, for the worker's bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub stage: Option<AgentStage>,
    pub reply: String,
}

/// Drives the pure turn state machine in `recepta_core::flow`: executes
/// the side effects for the current phase, feeds the resulting event
/// back, and follows the transition until the turn is done. One router
/// invocation owns one turn; nothing is shared across turns except what
/// the repositories persist.
pub struct TurnRouter {
    pub users: Arc<dyn UserRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub token_usage: Arc<dyn TokenUsageRepository>,
    pub llm: Arc<dyn LlmClient>,
    pub gateway: Arc<dyn MessageGateway>,
    pub tools: Arc<ToolExecutor>,
    pub config: AgentConfig,
    pub model_label: String,
}

#[derive(Default)]
struct TurnContext {
    working: Vec<ChatMessage>,
    pending_calls: Vec<ToolCallRequest>,
    stage: Option<AgentStage>,
    route_reason: Option<String>,
    reply: Option<String>,
    tool_rounds: u32,
    history_loaded: bool,
}

impl TurnRouter {
    pub async fn process_turn(
        &self,
        session: &SessionId,
        text: &str,
    ) -> Result<TurnReport, RouterError> {
        let mut phase = TurnPhase::IdentityCheck;
        let mut ctx = TurnContext::default();

        loop {
            let event = self.execute_phase(&phase, session, text, &mut ctx).await?;
            phase = flow::transition(&phase, &event)?.to;
            if phase == TurnPhase::Done {
                break;
            }
        }

        let reply = ctx.reply.unwrap_or_else(|| STAGE_FAILURE_APOLOGY.to_owned());
        info!(
            event_name = "router.turn_done",
            session_id = %session,
            stage = ctx.stage.map(|stage| stage.as_str()).unwrap_or("none"),
            "turn processed"
        );
        Ok(TurnReport { stage: ctx.stage, reply })
    }

    async fn execute_phase(
        &self,
        phase: &TurnPhase,
        session: &SessionId,
        text: &str,
        ctx: &mut TurnContext,
    ) -> Result<TurnEvent, RouterError> {
        match phase {
            TurnPhase::IdentityCheck => {
                let created = self.users.create_if_absent(session, "whatsapp").await?;
                if created {
                    info!(
                        event_name = "router.user_created",
                        session_id = %session,
                        "first contact from sender"
                    );
                    Ok(TurnEvent::UserCreated)
                } else {
                    Ok(TurnEvent::UserFound)
                }
            }

            TurnPhase::PersistInbound => {
                self.messages
                    .append(
                        session,
                        SenderRole::User,
                        None,
                        &MessagePayload::User { content: text.to_owned() },
                    )
                    .await?;
                Ok(TurnEvent::InboundPersisted)
            }

            TurnPhase::RegistrationCheck => {
                let user = self
                    .users
                    .find(session)
                    .await?
                    .ok_or_else(|| RouterError::MissingUser(session.0.clone()))?;
                if user.registration_complete {
                    Ok(TurnEvent::RegistrationComplete)
                } else {
                    Ok(TurnEvent::RegistrationIncomplete)
                }
            }

            TurnPhase::Agent(stage) => self.run_agent_stage(*stage, session, ctx).await,

            TurnPhase::ToolLoop(stage) => self.run_tool_loop(*stage, session, ctx).await,

            TurnPhase::Handoff => self.raise_handoff_gate(session, ctx).await,

            TurnPhase::SendReply => {
                let reply =
                    ctx.reply.clone().unwrap_or_else(|| STAGE_FAILURE_APOLOGY.to_owned());
                ctx.reply = Some(reply.clone());
                self.gateway.send_text(session, &reply).await?;
                Ok(TurnEvent::ReplySent)
            }

            TurnPhase::PersistOutbound => {
                let reply =
                    ctx.reply.clone().unwrap_or_else(|| STAGE_FAILURE_APOLOGY.to_owned());
                self.messages
                    .append(
                        session,
                        SenderRole::Assistant,
                        ctx.stage,
                        &MessagePayload::Assistant { content: reply },
                    )
                    .await?;
                Ok(TurnEvent::OutboundPersisted)
            }

            TurnPhase::Done => Err(TurnTransitionError::AlreadyDone.into()),
        }
    }

    async fn run_agent_stage(
        &self,
        stage: AgentStage,
        session: &SessionId,
        ctx: &mut TurnContext,
    ) -> Result<TurnEvent, RouterError> {
        if !ctx.history_loaded {
            let history = self
                .messages
                .recent_history(session, self.config.history_limit)
                .await?;
            ctx.working = chat_messages_from_history(&history);
            ctx.history_loaded = true;
        }

        let instructions = prompt::stage_instructions(&self.config, stage, session, Utc::now());
        let mut context = Vec::with_capacity(ctx.working.len() + 1);
        context.push(ChatMessage::System { content: instructions });
        context.extend(ctx.working.iter().cloned());

        info!(
            event_name = "router.agent_invoked",
            session_id = %session,
            stage = stage.as_str(),
            context_len = context.len(),
            "invoking agent stage"
        );

        if stage == AgentStage::Orchestrator {
            match self.llm.route(&context).await {
                Ok(routed) => {
                    self.record_usage(session, stage, routed.usage).await;
                    ctx.stage = Some(stage);
                    ctx.route_reason = routed.decision.reason.clone();
                    info!(
                        event_name = "router.routed",
                        session_id = %session,
                        target = routed.decision.target.as_str(),
                        "orchestrator routing decision"
                    );
                    Ok(TurnEvent::Routed(routed.decision.target))
                }
                Err(error) => {
                    warn!(
                        event_name = "router.stage_failed",
                        session_id = %session,
                        stage = stage.as_str(),
                        error = %error,
                        "orchestrator call failed; replying with apology"
                    );
                    ctx.stage = Some(stage);
                    ctx.reply = Some(STAGE_FAILURE_APOLOGY.to_owned());
                    Ok(TurnEvent::StageFailed)
                }
            }
        } else {
            let specs = ToolId::specs_for_stage(stage);
            match self.llm.chat(&context, &specs).await {
                Ok(reply) => {
                    self.record_usage(session, stage, reply.usage).await;
                    ctx.stage = Some(stage);
                    ctx.working.push(ChatMessage::Assistant {
                        content: reply.content.clone(),
                        tool_calls: reply.tool_calls.clone(),
                    });

                    if reply.tool_calls.is_empty() {
                        ctx.reply = Some(reply.content);
                        Ok(TurnEvent::AgentReplied { requested_tools: false })
                    } else {
                        ctx.pending_calls = reply.tool_calls;
                        Ok(TurnEvent::AgentReplied { requested_tools: true })
                    }
                }
                Err(error) => {
                    warn!(
                        event_name = "router.stage_failed",
                        session_id = %session,
                        stage = stage.as_str(),
                        error = %error,
                        "agent call failed; replying with apology"
                    );
                    ctx.stage = Some(stage);
                    ctx.reply = Some(STAGE_FAILURE_APOLOGY.to_owned());
                    Ok(TurnEvent::StageFailed)
                }
            }
        }
    }

    async fn run_tool_loop(
        &self,
        stage: AgentStage,
        session: &SessionId,
        ctx: &mut TurnContext,
    ) -> Result<TurnEvent, RouterError> {
        if ctx.tool_rounds >= self.config.max_tool_rounds {
            warn!(
                event_name = "router.tool_budget_exhausted",
                session_id = %session,
                stage = stage.as_str(),
                rounds = ctx.tool_rounds,
                "tool-call loop hit its iteration ceiling"
            );
            ctx.pending_calls.clear();
            ctx.reply = Some(TOOL_BUDGET_APOLOGY.to_owned());
            return Ok(TurnEvent::ToolBudgetExhausted);
        }
        ctx.tool_rounds += 1;

        let calls = std::mem::take(&mut ctx.pending_calls);

        // Doctor discovery exchanges go into the chat log (request
        // before results, as the agent will replay them next turn).
        let persisted: Vec<PersistedToolCall> = calls
            .iter()
            .filter(|call| {
                ToolId::parse(&call.name).map_or(false, |tool| tool.persists_for_context())
            })
            .map(|call| PersistedToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .collect();
        if !persisted.is_empty() {
            self.messages
                .append(
                    session,
                    SenderRole::Assistant,
                    Some(stage),
                    &MessagePayload::ToolRequest { calls: persisted },
                )
                .await?;
        }

        for call in &calls {
            let result = self.tools.execute(session, call).await;

            let persists =
                ToolId::parse(&call.name).map_or(false, |tool| tool.persists_for_context());
            if persists {
                self.messages
                    .append(
                        session,
                        SenderRole::Assistant,
                        Some(stage),
                        &MessagePayload::ToolResult {
                            content: result.clone(),
                            call_id: call.id.clone(),
                        },
                    )
                    .await?;
            }

            ctx.working.push(ChatMessage::Tool { content: result, call_id: call.id.clone() });
        }

        Ok(TurnEvent::ToolsExecuted)
    }

    async fn raise_handoff_gate(
        &self,
        session: &SessionId,
        ctx: &mut TurnContext,
    ) -> Result<TurnEvent, RouterError> {
        ctx.stage = Some(AgentStage::Orchestrator);
        let reason =
            ctx.route_reason.clone().unwrap_or_else(|| "not specified".to_owned());

        match self.users.set_requires_human(session).await {
            Ok(()) => {
                info!(
                    event_name = "router.handoff_gate_raised",
                    session_id = %session,
                    reason = %reason,
                    "sender handed off to a human"
                );

                let patient_name = self
                    .users
                    .find(session)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|user| user.full_name)
                    .unwrap_or_else(|| "Not registered".to_owned());

                let notice = HandoffNotice {
                    patient_number: session.0.clone(),
                    patient_name,
                    reason,
                };
                if let Err(error) = self.gateway.notify_handoff(&notice).await {
                    warn!(
                        event_name = "router.handoff_notice_failed",
                        session_id = %session,
                        error = %error,
                        "handoff alert was not delivered to the admin"
                    );
                }

                ctx.reply = Some(HANDOFF_ACK.to_owned());
            }
            Err(error) => {
                warn!(
                    event_name = "router.handoff_gate_failed",
                    session_id = %session,
                    error = %error,
                    "could not persist the handoff gate"
                );
                ctx.reply = Some(HANDOFF_FAILURE.to_owned());
            }
        }

        Ok(TurnEvent::GateRaised)
    }

    async fn record_usage(&self, session: &SessionId, stage: AgentStage, usage: TokenUsage) {
        if usage.input_tokens == 0 && usage.output_tokens == 0 {
            return;
        }
        if let Err(error) = self
            .token_usage
            .record(
                session,
                Some(stage),
                &self.model_label,
                usage.input_tokens,
                usage.output_tokens,
            )
            .await
        {
            warn!(
                event_name = "router.token_usage_record_failed",
                session_id = %session,
                error = %error,
                "token usage row was not written"
            );
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::message::AgentStage;

/// Structured output of the orchestrator stage: which specialist takes
/// the turn, with an optional free-text justification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Rag,
    Scheduling,
    Human,
}

impl RouteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::Scheduling => "scheduling",
            Self::Human => "human",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub target: RouteTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Where a turn currently is. One router invocation walks this machine
/// from `IdentityCheck` to `Done`; phases never repeat except the
/// `Agent`/`ToolLoop` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnPhase {
    IdentityCheck,
    PersistInbound,
    RegistrationCheck,
    Agent(AgentStage),
    ToolLoop(AgentStage),
    Handoff,
    SendReply,
    PersistOutbound,
    Done,
}

/// What happened while executing the current phase. The runtime performs
/// the side effects and reports back with one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    UserFound,
    UserCreated,
    InboundPersisted,
    RegistrationIncomplete,
    RegistrationComplete,
    Routed(RouteTarget),
    AgentReplied { requested_tools: bool },
    /// The language-model call failed after its retry budget; the stage
    /// degrades into a fixed apology reply instead of crashing the turn.
    StageFailed,
    ToolsExecuted,
    ToolBudgetExhausted,
    GateRaised,
    ReplySent,
    OutboundPersisted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnPhase,
    pub to: TurnPhase,
    pub event: TurnEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnTransitionError {
    #[error("invalid transition from {phase:?} using event {event:?}")]
    InvalidTransition { phase: TurnPhase, event: TurnEvent },
    #[error("turn already finished")]
    AlreadyDone,
}

/// Pure transition table for one conversation turn.
///
/// Invariants encoded here rather than in the runtime:
/// - the inbound text is persisted before any registration or agent work;
/// - the registration gate precedes the orchestrator, so an unregistered
///   sender can only ever reach the receptionist stage;
/// - only the orchestrator may route, and `human` bypasses every further
///   agent stage via `Handoff`;
/// - tool loops return to the same stage that requested them;
/// - a reply is always sent and persisted exactly once per turn.
pub fn transition(current: &TurnPhase, event: &TurnEvent) -> Result<TransitionOutcome, TurnTransitionError> {
    use AgentStage::{Orchestrator, Rag, Receptionist, Scheduling};
    use TurnEvent::{
        AgentReplied, GateRaised, InboundPersisted, OutboundPersisted, RegistrationComplete,
        RegistrationIncomplete, ReplySent, Routed, StageFailed, ToolBudgetExhausted, ToolsExecuted,
        UserCreated, UserFound,
    };
    use TurnPhase::{
        Agent, Done, Handoff, IdentityCheck, PersistInbound, PersistOutbound, RegistrationCheck,
        SendReply, ToolLoop,
    };

    if *current == Done {
        return Err(TurnTransitionError::AlreadyDone);
    }

    let to = match (current, event) {
        (IdentityCheck, UserFound | UserCreated) => PersistInbound,
        (PersistInbound, InboundPersisted) => RegistrationCheck,
        (RegistrationCheck, RegistrationIncomplete) => Agent(Receptionist),
        (RegistrationCheck, RegistrationComplete) => Agent(Orchestrator),
        (Agent(Orchestrator), Routed(RouteTarget::Rag)) => Agent(Rag),
        (Agent(Orchestrator), Routed(RouteTarget::Scheduling)) => Agent(Scheduling),
        (Agent(Orchestrator), Routed(RouteTarget::Human)) => Handoff,
        (Agent(stage @ (Receptionist | Rag | Scheduling)), AgentReplied { requested_tools: true }) => {
            ToolLoop(*stage)
        }
        (Agent(Receptionist | Rag | Scheduling), AgentReplied { requested_tools: false }) => SendReply,
        (Agent(_), StageFailed) => SendReply,
        (ToolLoop(stage), ToolsExecuted) => Agent(*stage),
        (ToolLoop(_), ToolBudgetExhausted) => SendReply,
        (Handoff, GateRaised) => SendReply,
        (SendReply, ReplySent) => PersistOutbound,
        (PersistOutbound, OutboundPersisted) => Done,
        _ => {
            return Err(TurnTransitionError::InvalidTransition {
                phase: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone() })
}

#[cfg(test)]
mod tests {
    use super::{transition, RouteTarget, TurnEvent, TurnPhase, TurnTransitionError};
    use crate::domain::message::AgentStage;

    fn walk(mut phase: TurnPhase, events: &[TurnEvent]) -> Result<TurnPhase, TurnTransitionError> {
        for event in events {
            phase = transition(&phase, event)?.to;
        }
        Ok(phase)
    }

    #[test]
    fn unregistered_sender_runs_receptionist_to_completion() {
        let phase = walk(
            TurnPhase::IdentityCheck,
            &[
                TurnEvent::UserCreated,
                TurnEvent::InboundPersisted,
                TurnEvent::RegistrationIncomplete,
                TurnEvent::AgentReplied { requested_tools: true },
                TurnEvent::ToolsExecuted,
                TurnEvent::AgentReplied { requested_tools: false },
                TurnEvent::ReplySent,
                TurnEvent::OutboundPersisted,
            ],
        )
        .expect("receptionist path");
        assert_eq!(phase, TurnPhase::Done);
    }

    #[test]
    fn registration_gate_precedes_orchestrator() {
        // An incomplete registration can only reach the receptionist,
        // regardless of what the orchestrator would have decided.
        let phase = walk(
            TurnPhase::IdentityCheck,
            &[TurnEvent::UserFound, TurnEvent::InboundPersisted, TurnEvent::RegistrationIncomplete],
        )
        .expect("gate path");
        assert_eq!(phase, TurnPhase::Agent(AgentStage::Receptionist));

        let error = transition(&phase, &TurnEvent::Routed(RouteTarget::Scheduling))
            .expect_err("receptionist stage cannot route");
        assert!(matches!(error, TurnTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn orchestrator_routes_to_each_specialist() {
        let at_orchestrator = walk(
            TurnPhase::IdentityCheck,
            &[TurnEvent::UserFound, TurnEvent::InboundPersisted, TurnEvent::RegistrationComplete],
        )
        .expect("orchestrator path");
        assert_eq!(at_orchestrator, TurnPhase::Agent(AgentStage::Orchestrator));

        let rag = transition(&at_orchestrator, &TurnEvent::Routed(RouteTarget::Rag))
            .expect("route rag")
            .to;
        assert_eq!(rag, TurnPhase::Agent(AgentStage::Rag));

        let scheduling = transition(&at_orchestrator, &TurnEvent::Routed(RouteTarget::Scheduling))
            .expect("route scheduling")
            .to;
        assert_eq!(scheduling, TurnPhase::Agent(AgentStage::Scheduling));

        let handoff = transition(&at_orchestrator, &TurnEvent::Routed(RouteTarget::Human))
            .expect("route human")
            .to;
        assert_eq!(handoff, TurnPhase::Handoff);
    }

    #[test]
    fn handoff_skips_agent_stages_and_still_replies() {
        let phase = walk(
            TurnPhase::Handoff,
            &[TurnEvent::GateRaised, TurnEvent::ReplySent, TurnEvent::OutboundPersisted],
        )
        .expect("handoff path");
        assert_eq!(phase, TurnPhase::Done);
    }

    #[test]
    fn tool_loop_returns_to_the_requesting_stage() {
        let loop_phase = TurnPhase::ToolLoop(AgentStage::Scheduling);
        let back = transition(&loop_phase, &TurnEvent::ToolsExecuted).expect("loop back").to;
        assert_eq!(back, TurnPhase::Agent(AgentStage::Scheduling));

        let exhausted =
            transition(&loop_phase, &TurnEvent::ToolBudgetExhausted).expect("budget exit").to;
        assert_eq!(exhausted, TurnPhase::SendReply);
    }

    #[test]
    fn a_failed_stage_still_reaches_the_reply_path() {
        for stage in [AgentStage::Receptionist, AgentStage::Orchestrator, AgentStage::Rag] {
            let next = transition(&TurnPhase::Agent(stage), &TurnEvent::StageFailed)
                .expect("stage failure degrades to reply")
                .to;
            assert_eq!(next, TurnPhase::SendReply);
        }
    }

    #[test]
    fn orchestrator_never_enters_the_tool_loop() {
        let error = transition(
            &TurnPhase::Agent(AgentStage::Orchestrator),
            &TurnEvent::AgentReplied { requested_tools: true },
        )
        .expect_err("orchestrator has no tools");
        assert!(matches!(error, TurnTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn finished_turns_reject_further_events() {
        let error = transition(&TurnPhase::Done, &TurnEvent::ReplySent)
            .expect_err("done is terminal");
        assert_eq!(error, TurnTransitionError::AlreadyDone);
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let events = [
            TurnEvent::UserFound,
            TurnEvent::InboundPersisted,
            TurnEvent::RegistrationComplete,
            TurnEvent::Routed(RouteTarget::Rag),
            TurnEvent::AgentReplied { requested_tools: false },
            TurnEvent::ReplySent,
            TurnEvent::OutboundPersisted,
        ];

        let first = walk(TurnPhase::IdentityCheck, &events).expect("first run");
        let second = walk(TurnPhase::IdentityCheck, &events).expect("second run");
        assert_eq!(first, second);
        assert_eq!(first, TurnPhase::Done);
    }

    #[test]
    fn route_decision_deserializes_from_structured_output() {
        let decision: super::RouteDecision =
            serde_json::from_str(r#"{"target":"human","reason":"asked for a person"}"#)
                .expect("decode decision");
        assert_eq!(decision.target, RouteTarget::Human);
        assert_eq!(decision.reason.as_deref(), Some("asked for a person"));

        let bare: super::RouteDecision =
            serde_json::from_str(r#"{"target":"rag"}"#).expect("decode bare decision");
        assert_eq!(bare.target, RouteTarget::Rag);
        assert!(bare.reason.is_none());
    }
}

//! Group chat event system.
//!
//! Two optional observation hooks can be attached to an
//! [`Orchestrator`](crate::groupchat::orchestration::Orchestrator):
//!
//! - [`EventHandler`] receives turn-level [`ChatEvent`]s (run start/end, speaker selection,
//!   agent replies and failures, termination checks). It is async and awaited inline, so a
//!   handler should return quickly.
//! - [`MessageSink`] is a synchronous, best-effort callback invoked once per agent-produced
//!   message. Errors it returns, and panics it raises, are logged and otherwise ignored: a
//!   misbehaving sink never stops a conversation.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use groupchat::event::{ChatEvent, EventHandler};
//!
//! struct Progress;
//!
//! #[async_trait]
//! impl EventHandler for Progress {
//!     async fn on_chat_event(&self, event: &ChatEvent) {
//!         if let ChatEvent::AgentResponded { agent, turn, response_length, .. } = event {
//!             println!("==== {} just responded (turn {}, {} chars) ====", agent, turn, response_length);
//!         }
//!     }
//! }
//! ```

use crate::groupchat::agent::TokenUsage;
use crate::groupchat::message::ChatMessage;
use crate::groupchat::orchestration::TerminationReason;
use async_trait::async_trait;
use std::error::Error;

/// Events emitted by the orchestrator's turn loop.
///
/// Every variant carries the `run_id` so one handler can observe several conversations.
///
/// ```text
/// RunStarted
///   └─ TurnStarted { turn: 1 }
///       ├─ AgentSelected
///       ├─ AgentResponded | AgentFailed
///       └─ TerminationChecked
///   └─ TurnStarted { turn: 2 } ...
/// RunCompleted | RunFailed
/// ```
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The seed has been appended and the loop is about to start.
    RunStarted {
        run_id: String,
        chat_name: String,
        /// Names of the agents on the roster, in order.
        agents: Vec<String>,
        selection: String,
        termination: Option<String>,
        max_turns: usize,
    },
    TurnStarted {
        run_id: String,
        turn: usize,
    },
    AgentSelected {
        run_id: String,
        turn: usize,
        agent: String,
        /// Explanation supplied by the selection strategy.
        reason: String,
    },
    /// An agent's reply was appended to the history.
    AgentResponded {
        run_id: String,
        turn: usize,
        agent: String,
        sequence: u64,
        tokens_used: Option<TokenUsage>,
        /// Length of the reply in bytes.
        response_length: usize,
    },
    AgentFailed {
        run_id: String,
        turn: usize,
        agent: String,
        error: String,
    },
    /// The termination policy (if any) and the turn bound were evaluated.
    TerminationChecked {
        run_id: String,
        turn: usize,
        strategy: Option<String>,
        terminate: bool,
    },
    RunCompleted {
        run_id: String,
        turns: usize,
        reason: TerminationReason,
        total_tokens: usize,
    },
    RunFailed {
        run_id: String,
        turns: usize,
        error: String,
    },
}

impl ChatEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ChatEvent::RunStarted { run_id, .. }
            | ChatEvent::TurnStarted { run_id, .. }
            | ChatEvent::AgentSelected { run_id, .. }
            | ChatEvent::AgentResponded { run_id, .. }
            | ChatEvent::AgentFailed { run_id, .. }
            | ChatEvent::TerminationChecked { run_id, .. }
            | ChatEvent::RunCompleted { run_id, .. }
            | ChatEvent::RunFailed { run_id, .. } => run_id,
        }
    }
}

/// Receives [`ChatEvent`]s. The default implementation ignores everything.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_chat_event(&self, _event: &ChatEvent) {}
}

/// Forwards every event to the [`log`] facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventHandler;

#[async_trait]
impl EventHandler for LogEventHandler {
    async fn on_chat_event(&self, event: &ChatEvent) {
        match event {
            ChatEvent::RunStarted {
                run_id,
                chat_name,
                agents,
                selection,
                termination,
                max_turns,
            } => log::info!(
                "[{}] '{}' started with {:?} (selection: {}, termination: {}, max turns: {})",
                run_id,
                chat_name,
                agents,
                selection,
                termination.as_deref().unwrap_or("none"),
                max_turns
            ),
            ChatEvent::TurnStarted { run_id, turn } => log::debug!("[{}] turn {}", run_id, turn),
            ChatEvent::AgentSelected {
                run_id,
                turn,
                agent,
                reason,
            } => log::debug!("[{}] turn {}: {} selected ({})", run_id, turn, agent, reason),
            ChatEvent::AgentResponded {
                run_id,
                turn,
                agent,
                sequence,
                response_length,
                ..
            } => log::info!(
                "[{}] turn {}: {} responded (#{}, {} bytes)",
                run_id,
                turn,
                agent,
                sequence,
                response_length
            ),
            ChatEvent::AgentFailed {
                run_id,
                turn,
                agent,
                error,
            } => log::warn!("[{}] turn {}: {} failed: {}", run_id, turn, agent, error),
            ChatEvent::TerminationChecked {
                run_id,
                turn,
                strategy,
                terminate,
            } => log::debug!(
                "[{}] turn {}: termination check ({}) -> {}",
                run_id,
                turn,
                strategy.as_deref().unwrap_or("turn bound only"),
                terminate
            ),
            ChatEvent::RunCompleted {
                run_id,
                turns,
                reason,
                total_tokens,
            } => log::info!(
                "[{}] finished after {} turns ({}), {} tokens",
                run_id,
                turns,
                reason,
                total_tokens
            ),
            ChatEvent::RunFailed {
                run_id,
                turns,
                error,
            } => log::error!("[{}] failed after {} turns: {}", run_id, turns, error),
        }
    }
}

/// Best-effort streaming callback, invoked once per agent-produced message.
///
/// Any `Fn(&ChatMessage)` closure is a sink.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, message: &ChatMessage) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl<F> MessageSink for F
where
    F: Fn(&ChatMessage) + Send + Sync,
{
    fn on_message(&self, message: &ChatMessage) -> Result<(), Box<dyn Error + Send + Sync>> {
        self(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink: Arc<dyn MessageSink> = Arc::new(move |_: &ChatMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.on_message(&ChatMessage::seed(1, "x")).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_event_exposes_its_run() {
        let event = ChatEvent::TurnStarted {
            run_id: "run-7".into(),
            turn: 3,
        };
        assert_eq!(event.run_id(), "run-7");
    }
}

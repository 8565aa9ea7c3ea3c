//! The group chat turn loop.
//!
//! An [`Orchestrator`] owns one conversation: a [`Roster`] of agents, a
//! [`SelectionStrategy`], an optional [`TerminationStrategy`], and the [`ChatHistory`] they all
//! read. Running it appends the caller's seed and then repeats a turn until something stops it:
//!
//! ```text
//! select speaker ─► invoke agent ─► append reply ─► check termination ─┐
//!       ▲                                                               │
//!       └──────────────────────── continue ◄────────────────────────────┘
//! ```
//!
//! The loop ends in one of these states:
//!
//! - `Terminated(policy-satisfied)`: the termination strategy said stop.
//! - `Terminated(max-rounds-exhausted)`: the `max_turns` safety net was reached.
//! - `Terminated(cancelled)`: a [`RunControl`] asked for a stop. A graceful stop lets the
//!   in-flight turn finish; a hard cancel abandons it and appends nothing.
//! - `Failed`: an agent or a strategy returned an error. Failures are never retried and
//!   the history produced so far is kept.
//!
//! Only one agent is ever invoked at a time, which gives the history its total order.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use groupchat::agent::ScriptedAgent;
//! use groupchat::orchestration::{Orchestrator, TerminationReason};
//! use groupchat::termination::KeywordTermination;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut chat = Orchestrator::new("review", "Document review")
//!     .with_termination(KeywordTermination::new("User", "APPROVED"))
//!     .with_max_turns(10);
//! chat.add_agent(Arc::new(ScriptedAgent::new("Writer", ["Draft v1", "Draft v2"])))?;
//! chat.add_agent(Arc::new(ScriptedAgent::new("User", ["Needs work", "APPROVED"])))?;
//!
//! let outcome = chat.run_to_completion("Write a guide").await?;
//! assert_eq!(outcome.reason, TerminationReason::PolicySatisfied);
//! assert_eq!(outcome.turns, 4);
//! assert_eq!(&*outcome.final_result_from("Writer")?.content, "Draft v2");
//! # Ok(())
//! # }
//! ```

use crate::groupchat::agent::{ChatAgent, Roster};
use crate::groupchat::config::GroupChatConfig;
use crate::groupchat::error::GroupChatError;
use crate::groupchat::event::{ChatEvent, EventHandler, MessageSink};
use crate::groupchat::history::{ChatHistory, HistorySnapshot};
use crate::groupchat::message::{ChatMessage, TURN_METADATA_KEY};
use crate::groupchat::selection::{
    RoundRobinSelection, Selection, SelectionContext, SelectionStrategy,
};
use crate::groupchat::termination::{TerminationContext, TerminationStrategy};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a conversation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The termination strategy decided the conversation is complete.
    PolicySatisfied,
    /// The `max_turns` bound was reached first.
    MaxRoundsExhausted,
    /// A stop or cancel was requested.
    Cancelled,
    /// An agent or strategy failed.
    Failed,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::PolicySatisfied => "policy-satisfied",
            TerminationReason::MaxRoundsExhausted => "max-rounds-exhausted",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Failed => "failed",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-turn verdict combining the termination strategy and the turn bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Continue,
    Terminate(TerminationReason),
}

impl TerminationSignal {
    pub fn should_terminate(&self) -> bool {
        matches!(self, TerminationSignal::Terminate(_))
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        match self {
            TerminationSignal::Continue => None,
            TerminationSignal::Terminate(reason) => Some(*reason),
        }
    }
}

/// Lifecycle of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started; no seed has been appended.
    Idle,
    Running,
    /// Finished normally. Never carries [`TerminationReason::Failed`].
    Terminated(TerminationReason),
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Terminated(_) | RunState::Failed)
    }
}

/// How [`ConversationOutcome::final_result_with`] treats several matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultPolicy {
    /// The latest match is the result.
    #[default]
    MostRecent,
    /// Exactly one message may match; more is [`GroupChatError::AmbiguousResult`].
    Unique,
}

/// Cooperative stop and cancel requests for one run.
///
/// - [`request_stop`](RunControl::request_stop) lets the in-flight turn finish and begins no
///   new turn.
/// - [`cancel`](RunControl::cancel) additionally abandons the in-flight agent invocation; its
///   partial result is discarded.
///
/// Clones share the same tokens.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    stop: CancellationToken,
    cancel: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control whose requests also fire when the parent tokens fire.
    pub(crate) fn child_of(stop: &CancellationToken, cancel: &CancellationToken) -> Self {
        Self {
            stop: stop.child_token(),
            cancel: cancel.child_token(),
        }
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.stop.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled() || self.cancel.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`cancel`](RunControl::cancel) has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    /// Identifier shared with the run's [`ChatEvent`]s.
    pub run_id: String,
    /// Full history at the end of the run, seed included.
    pub history: HistorySnapshot,
    /// Agent turns whose message was committed.
    pub turns: usize,
    pub reason: TerminationReason,
    /// Sum of the tokens reported by agents.
    pub total_tokens_used: usize,
    /// Set when the run failed.
    pub error: Option<GroupChatError>,
}

impl ConversationOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn state(&self) -> RunState {
        match self.error {
            Some(_) => RunState::Failed,
            None => RunState::Terminated(self.reason),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.history.messages()
    }

    /// Authors of every agent turn, in order.
    pub fn speakers(&self) -> Vec<&str> {
        self.history
            .iter()
            .skip(1)
            .map(|m| m.author.as_str())
            .collect()
    }

    /// Latest message matching `predicate`.
    ///
    /// A failed run has no deliverable: its error is returned instead.
    pub fn final_result<P>(&self, predicate: P) -> Result<ChatMessage, GroupChatError>
    where
        P: Fn(&ChatMessage) -> bool,
    {
        self.final_result_with(predicate, ResultPolicy::MostRecent)
    }

    pub fn final_result_with<P>(
        &self,
        predicate: P,
        policy: ResultPolicy,
    ) -> Result<ChatMessage, GroupChatError>
    where
        P: Fn(&ChatMessage) -> bool,
    {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let matches = self.history.filter(predicate);
        if policy == ResultPolicy::Unique {
            let count = matches.count();
            if count > 1 {
                return Err(GroupChatError::AmbiguousResult(count));
            }
        }
        matches
            .last()
            .cloned()
            .ok_or(GroupChatError::NoMatchingResult)
    }

    /// Latest message written by `agent`.
    pub fn final_result_from(&self, agent: &str) -> Result<ChatMessage, GroupChatError> {
        self.final_result(|m| m.is_authored_by(agent))
    }
}

#[derive(Debug, Default)]
struct RunProgress {
    turns: usize,
    total_tokens: usize,
    previous_speaker: Option<String>,
    streak: usize,
}

/// Drives one multi-agent conversation.
///
/// Build it with [`Orchestrator::new`] and the `with_*` methods, register agents, then either
/// await [`run_to_completion`](Orchestrator::run_to_completion) or hand it to a
/// [`Runtime`](crate::groupchat::runtime::Runtime) to stream messages as they are produced.
pub struct Orchestrator {
    /// Stable identifier used in logs.
    pub id: String,

    /// Human-readable name of this chat.
    pub name: String,

    roster: Roster,
    selection: Box<dyn SelectionStrategy>,
    termination: Option<Box<dyn TerminationStrategy>>,
    config: GroupChatConfig,
    history: Arc<ChatHistory>,
    event_handler: Option<Arc<dyn EventHandler>>,
    sinks: Vec<Arc<dyn MessageSink>>,
    state: watch::Sender<RunState>,
    stream: Option<mpsc::UnboundedSender<ChatMessage>>,
    outcome: Option<ConversationOutcome>,
}

impl Orchestrator {
    /// Creates an idle orchestrator with round-robin selection, no termination policy and the
    /// default configuration.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let config = GroupChatConfig::default();
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            id: id.into(),
            name: name.into(),
            roster: Roster::new(),
            selection: Box::new(RoundRobinSelection::new()),
            termination: None,
            history: Arc::new(ChatHistory::with_broadcast_capacity(
                config.broadcast_capacity,
            )),
            config,
            event_handler: None,
            sinks: Vec::new(),
            state,
            stream: None,
            outcome: None,
        }
    }

    pub fn with_selection(mut self, strategy: impl SelectionStrategy + 'static) -> Self {
        self.selection = Box::new(strategy);
        self
    }

    pub fn with_termination(mut self, strategy: impl TerminationStrategy + 'static) -> Self {
        self.termination = Some(Box::new(strategy));
        self
    }

    /// Replaces the configuration.
    ///
    /// This also allocates a fresh history sized for the configured broadcast capacity, so
    /// call it before taking subscriptions.
    pub fn with_config(mut self, config: GroupChatConfig) -> Self {
        self.history = Arc::new(ChatHistory::with_broadcast_capacity(
            config.broadcast_capacity,
        ));
        self.config = config;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.config.max_turns = max_turns;
        self
    }

    pub fn with_initial_speaker(mut self, agent: impl Into<String>) -> Self {
        self.config.initial_speaker = Some(agent.into());
        self
    }

    pub fn with_max_consecutive_turns(mut self, turns: usize) -> Self {
        self.config.max_consecutive_turns = Some(turns);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Registers a streaming callback. Several sinks may be registered.
    pub fn with_message_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Registers an agent. Insertion order is the round-robin order.
    pub fn add_agent(&mut self, agent: Arc<dyn ChatAgent>) -> Result<(), GroupChatError> {
        self.roster.add(agent)
    }

    pub fn add_inactive_agent(&mut self, agent: Arc<dyn ChatAgent>) -> Result<(), GroupChatError> {
        self.roster.add_inactive(agent)
    }

    pub fn set_agent_active(&mut self, name: &str, active: bool) -> Result<(), GroupChatError> {
        self.roster.set_active(name, active)
    }

    pub fn remove_agent(&mut self, name: &str) -> Result<Arc<dyn ChatAgent>, GroupChatError> {
        self.roster.remove(name)
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn config(&self) -> &GroupChatConfig {
        &self.config
    }

    pub fn selection_name(&self) -> &str {
        self.selection.name()
    }

    /// Shared handle on the live history, for snapshots and subscriptions.
    pub fn history(&self) -> Arc<ChatHistory> {
        Arc::clone(&self.history)
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.history.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Observes state transitions, including from another task.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Result of the last run, once it has finished.
    pub fn outcome(&self) -> Option<&ConversationOutcome> {
        self.outcome.as_ref()
    }

    pub fn final_result<P>(&self, predicate: P) -> Result<ChatMessage, GroupChatError>
    where
        P: Fn(&ChatMessage) -> bool,
    {
        self.finished()?.final_result(predicate)
    }

    pub fn final_result_with<P>(
        &self,
        predicate: P,
        policy: ResultPolicy,
    ) -> Result<ChatMessage, GroupChatError>
    where
        P: Fn(&ChatMessage) -> bool,
    {
        self.finished()?.final_result_with(predicate, policy)
    }

    fn finished(&self) -> Result<&ConversationOutcome, GroupChatError> {
        self.outcome.as_ref().ok_or(GroupChatError::NotTerminated)
    }

    /// Returns a finished orchestrator to `Idle` with an empty history.
    ///
    /// Existing subscriptions stay attached to the old history.
    pub fn reset(&mut self) -> Result<(), GroupChatError> {
        if self.state() == RunState::Running {
            return Err(GroupChatError::AlreadyStarted);
        }
        self.history = Arc::new(ChatHistory::with_broadcast_capacity(
            self.config.broadcast_capacity,
        ));
        self.outcome = None;
        self.state.send_replace(RunState::Idle);
        Ok(())
    }

    /// Checks everything that can be rejected before the seed is appended.
    pub fn ensure_ready(&self) -> Result<(), GroupChatError> {
        if self.state() != RunState::Idle {
            return Err(GroupChatError::AlreadyStarted);
        }
        if self.roster.is_empty() {
            return Err(GroupChatError::NoAgents);
        }
        self.config.validate()?;
        if let Some(first) = &self.config.initial_speaker {
            if self.roster.get(first).is_none() {
                return Err(GroupChatError::AgentNotFound(first.clone()));
            }
        }
        Ok(())
    }

    /// Runs the conversation in the current task until it terminates or fails.
    ///
    /// `Err` is returned only when the run could not start (see
    /// [`ensure_ready`](Orchestrator::ensure_ready)); failures during the run are reported in
    /// [`ConversationOutcome::error`] next to the history produced so far.
    pub async fn run_to_completion(
        &mut self,
        seed: &str,
    ) -> Result<ConversationOutcome, GroupChatError> {
        self.run_with_control(seed, &RunControl::new()).await
    }

    /// Like [`run_to_completion`](Orchestrator::run_to_completion), honouring stop and cancel
    /// requests made through `control`.
    pub async fn run_with_control(
        &mut self,
        seed: &str,
        control: &RunControl,
    ) -> Result<ConversationOutcome, GroupChatError> {
        self.ensure_ready()?;
        Ok(self.drive(seed, control).await)
    }

    pub(crate) fn attach_stream(&mut self, stream: mpsc::UnboundedSender<ChatMessage>) {
        self.stream = Some(stream);
    }

    /// Executes a run whose preconditions have already been checked.
    pub(crate) async fn drive(&mut self, seed: &str, control: &RunControl) -> ConversationOutcome {
        let run_id = Uuid::new_v4().to_string();
        log::info!(
            "Group chat '{}' ({}) starting run {} with {} agents",
            self.name,
            self.id,
            run_id,
            self.roster.len()
        );
        self.state.send_replace(RunState::Running);

        let mut progress = RunProgress::default();
        let result = self.turn_loop(&run_id, seed, control, &mut progress).await;

        let (reason, error) = match result {
            Ok(reason) => {
                self.emit(ChatEvent::RunCompleted {
                    run_id: run_id.clone(),
                    turns: progress.turns,
                    reason,
                    total_tokens: progress.total_tokens,
                })
                .await;
                (reason, None)
            }
            Err(err) => {
                log::warn!("Group chat '{}' run {} failed: {}", self.name, run_id, err);
                self.emit(ChatEvent::RunFailed {
                    run_id: run_id.clone(),
                    turns: progress.turns,
                    error: err.to_string(),
                })
                .await;
                (TerminationReason::Failed, Some(err))
            }
        };

        let outcome = ConversationOutcome {
            run_id,
            history: self.history.snapshot(),
            turns: progress.turns,
            reason,
            total_tokens_used: progress.total_tokens,
            error,
        };
        self.outcome = Some(outcome.clone());
        self.state.send_replace(outcome.state());
        // Closing the stream last means consumers that see its end also see the final state.
        self.stream = None;
        outcome
    }

    async fn turn_loop(
        &mut self,
        run_id: &str,
        seed: &str,
        control: &RunControl,
        progress: &mut RunProgress,
    ) -> Result<TerminationReason, GroupChatError> {
        self.history
            .append(ChatMessage::seed(self.history.next_sequence(), seed))?;

        self.emit(ChatEvent::RunStarted {
            run_id: run_id.to_string(),
            chat_name: self.name.clone(),
            agents: self.roster.names().into_iter().map(String::from).collect(),
            selection: self.selection.name().to_string(),
            termination: self.termination.as_ref().map(|t| t.name().to_string()),
            max_turns: self.config.max_turns,
        })
        .await;

        loop {
            if control.is_stop_requested() {
                log::info!(
                    "Group chat '{}' stopping before turn {}",
                    self.name,
                    progress.turns + 1
                );
                return Ok(TerminationReason::Cancelled);
            }

            let turn = progress.turns + 1;
            self.emit(ChatEvent::TurnStarted {
                run_id: run_id.to_string(),
                turn,
            })
            .await;

            // The snapshot must be gone before the append, or the append copies the history.
            let (selection, invocation) = {
                let snapshot = self.history.snapshot();
                let selected = tokio::select! {
                    biased;
                    _ = control.cancelled() => None,
                    selection = self.select_speaker(
                        &snapshot,
                        progress.previous_speaker.as_deref(),
                        turn,
                    ) => Some(selection),
                };
                let selection = match selected {
                    Some(selection) => selection?,
                    None => {
                        log::info!(
                            "Group chat '{}' cancelled while selecting the speaker of turn {}",
                            self.name,
                            turn
                        );
                        return Ok(TerminationReason::Cancelled);
                    }
                };
                progress.streak = match progress.previous_speaker.as_deref() {
                    Some(previous) if previous == selection.agent => progress.streak + 1,
                    _ => 1,
                };
                if let Some(limit) = self.config.max_consecutive_turns {
                    if progress.streak > limit {
                        return Err(GroupChatError::RepeatLimitExceeded {
                            agent: selection.agent,
                            turns: progress.streak,
                        });
                    }
                }
                let agent = self.eligible_agent(&selection.agent)?;

                log::debug!(
                    "Turn {}: '{}' selected ({})",
                    turn,
                    selection.agent,
                    selection.reason
                );
                self.emit(ChatEvent::AgentSelected {
                    run_id: run_id.to_string(),
                    turn,
                    agent: selection.agent.clone(),
                    reason: selection.reason.clone(),
                })
                .await;

                let invocation = tokio::select! {
                    biased;
                    _ = control.cancelled() => None,
                    result = AssertUnwindSafe(agent.invoke(&snapshot)).catch_unwind() => {
                        Some(match result {
                            Ok(reply) => reply.map_err(|e| e.to_string()),
                            Err(payload) => {
                                Err(format!("panicked: {}", panic_message(payload.as_ref())))
                            }
                        })
                    }
                };
                (selection, invocation)
            };

            let response = match invocation {
                None => {
                    log::info!(
                        "Group chat '{}' cancelled during turn {}; reply from '{}' discarded",
                        self.name,
                        turn,
                        selection.agent
                    );
                    return Ok(TerminationReason::Cancelled);
                }
                Some(Ok(response)) => response,
                Some(Err(message)) => {
                    self.emit(ChatEvent::AgentFailed {
                        run_id: run_id.to_string(),
                        turn,
                        agent: selection.agent.clone(),
                        error: message.clone(),
                    })
                    .await;
                    return Err(GroupChatError::AgentInvocation {
                        agent: selection.agent,
                        message,
                    });
                }
            };

            if let Some(usage) = &response.tokens_used {
                progress.total_tokens += usage.total_tokens;
            }
            let response_length = response.content.len();
            let mut message = ChatMessage::from_agent(
                self.history.next_sequence(),
                selection.agent.as_str(),
                response.content,
            )
            .with_metadata(TURN_METADATA_KEY, turn.to_string());
            message.metadata.extend(response.metadata);

            let sequence = self.history.append(message.clone())?;
            progress.turns = turn;
            progress.previous_speaker = Some(selection.agent.clone());

            self.emit(ChatEvent::AgentResponded {
                run_id: run_id.to_string(),
                turn,
                agent: selection.agent.clone(),
                sequence,
                tokens_used: response.tokens_used,
                response_length,
            })
            .await;
            self.publish(&message);

            let signal = self.check_termination(&self.history.snapshot(), &selection.agent, turn)?;
            self.emit(ChatEvent::TerminationChecked {
                run_id: run_id.to_string(),
                turn,
                strategy: self.termination.as_ref().map(|t| t.name().to_string()),
                terminate: signal.should_terminate(),
            })
            .await;
            if let TerminationSignal::Terminate(reason) = signal {
                log::info!(
                    "Group chat '{}' terminated after {} turns ({})",
                    self.name,
                    turn,
                    reason
                );
                return Ok(reason);
            }
        }
    }

    async fn select_speaker(
        &self,
        snapshot: &HistorySnapshot,
        previous_speaker: Option<&str>,
        turn: usize,
    ) -> Result<Selection, GroupChatError> {
        if turn == 1 {
            if let Some(first) = &self.config.initial_speaker {
                return Ok(Selection::new(first.as_str(), "configured initial speaker"));
            }
        }
        let ctx = SelectionContext {
            history: snapshot,
            roster: &self.roster,
            previous_speaker,
            turn,
        };
        Ok(self.selection.select_next(&ctx).await?)
    }

    fn eligible_agent(&self, name: &str) -> Result<Arc<dyn ChatAgent>, GroupChatError> {
        let entry = self.roster.get(name).ok_or_else(|| {
            GroupChatError::Strategy(format!(
                "{} selected '{}', which is not in the roster",
                self.selection.name(),
                name
            ))
        })?;
        if !entry.is_active() {
            return Err(GroupChatError::Strategy(format!(
                "'{}' was selected but is inactive",
                name
            )));
        }
        Ok(Arc::clone(entry.agent()))
    }

    /// Consults the termination strategy first, then the turn bound.
    fn check_termination(
        &self,
        history: &HistorySnapshot,
        last_speaker: &str,
        turn: usize,
    ) -> Result<TerminationSignal, GroupChatError> {
        if let Some(strategy) = &self.termination {
            let ctx = TerminationContext {
                history,
                last_speaker,
                turn,
            };
            if strategy.should_terminate(&ctx)? {
                return Ok(TerminationSignal::Terminate(
                    TerminationReason::PolicySatisfied,
                ));
            }
        }
        if turn >= self.config.max_turns {
            return Ok(TerminationSignal::Terminate(
                TerminationReason::MaxRoundsExhausted,
            ));
        }
        Ok(TerminationSignal::Continue)
    }

    /// Hands a committed message to every sink and to the attached stream.
    fn publish(&self, message: &ChatMessage) {
        for sink in &self.sinks {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.on_message(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Message sink failed on #{}: {}", message.sequence, e),
                Err(_) => log::warn!("Message sink panicked on #{}", message.sequence),
            }
        }
        if let Some(stream) = &self.stream {
            if stream.send(message.clone()).is_err() {
                log::debug!("Stream consumer for '{}' has gone away", self.name);
            }
        }
    }

    async fn emit(&self, event: ChatEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_chat_event(&event).await;
        }
    }
}

/// Text of a panic payload raised with a string literal or a formatted message.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

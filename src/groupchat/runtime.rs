//! Hosting conversations on the async runtime.
//!
//! [`Runtime`] binds to the ambient tokio runtime, spawns each [`Orchestrator`] as its own
//! tracked task and tears everything down on request:
//!
//! - [`Runtime::stop_when_idle`] lets every in-flight turn finish, starts no new turns and
//!   waits for all conversations to wind down.
//! - [`Runtime::stop_now`] additionally cancels in-flight agent invocations.
//! - [`Runtime::scoped`] wraps a block of work so `stop_when_idle` runs however the block
//!   exits.
//!
//! Each spawned conversation is represented by a [`ConversationRun`], a
//! [`Stream`](futures_util::Stream) of the messages agents produce. The stream ends when the
//! run terminates, fails or is cancelled; the final [`ConversationOutcome`] is then available
//! from [`ConversationRun::outcome`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use groupchat::agent::ScriptedAgent;
//! use groupchat::orchestration::Orchestrator;
//! use groupchat::runtime::Runtime;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut chat = Orchestrator::new("demo", "Demo").with_max_turns(3);
//! chat.add_agent(Arc::new(ScriptedAgent::new("A", ["a1", "a2"])))?;
//! chat.add_agent(Arc::new(ScriptedAgent::new("B", ["b1"])))?;
//!
//! let outcome = Runtime::scoped(|runtime| async move {
//!     let mut run = runtime.run(chat, "hello")?;
//!     while let Some(message) = run.next().await {
//!         println!("==== {} just responded ====", message.author);
//!     }
//!     run.outcome().await
//! })
//! .await??;
//!
//! assert_eq!(outcome.speakers(), vec!["A", "B", "A"]);
//! # Ok(())
//! # }
//! ```

use crate::groupchat::error::GroupChatError;
use crate::groupchat::history::{ChatHistory, HistorySnapshot};
use crate::groupchat::message::ChatMessage;
use crate::groupchat::orchestration::{ConversationOutcome, Orchestrator, RunControl, RunState};
use futures_util::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Owner of every conversation it starts.
///
/// Clones share the same tracker and tokens, so stopping any clone stops them all.
#[derive(Debug, Clone)]
pub struct Runtime {
    handle: Handle,
    tracker: TaskTracker,
    stop: CancellationToken,
    cancel: CancellationToken,
}

impl Runtime {
    /// Binds to the tokio runtime of the calling context.
    pub fn start() -> Result<Self, GroupChatError> {
        let handle =
            Handle::try_current().map_err(|e| GroupChatError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self::with_handle(handle))
    }

    /// Binds to an explicit tokio runtime.
    pub fn with_handle(handle: Handle) -> Self {
        log::debug!("Group chat runtime started");
        Self {
            handle,
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Runs `work` with a fresh runtime and always performs a graceful teardown afterwards.
    ///
    /// A panic inside `work` is re-raised once teardown has finished.
    pub async fn scoped<F, Fut, T>(work: F) -> Result<T, GroupChatError>
    where
        F: FnOnce(Runtime) -> Fut,
        Fut: Future<Output = T>,
    {
        let runtime = Runtime::start()?;
        let result = AssertUnwindSafe(work(runtime.clone())).catch_unwind().await;
        runtime.stop_when_idle().await;
        match result {
            Ok(value) => Ok(value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Spawns `orchestrator` with `seed` as its opening message.
    ///
    /// Precondition failures (no agents, already started, invalid configuration) are reported
    /// here, before anything is spawned.
    pub fn run(
        &self,
        mut orchestrator: Orchestrator,
        seed: impl Into<String>,
    ) -> Result<ConversationRun, GroupChatError> {
        if self.is_stopping() {
            return Err(GroupChatError::RuntimeClosed);
        }
        orchestrator.ensure_ready()?;

        let (tx, rx) = mpsc::unbounded_channel();
        orchestrator.attach_stream(tx);
        let control = RunControl::child_of(&self.stop, &self.cancel);
        let state = orchestrator.watch_state();
        let history = orchestrator.history();
        let seed = seed.into();

        let task_control = control.clone();
        let task = self.tracker.spawn_on(
            async move { orchestrator.drive(&seed, &task_control).await },
            &self.handle,
        );

        Ok(ConversationRun {
            messages: UnboundedReceiverStream::new(rx),
            state,
            history,
            control,
            task,
        })
    }

    /// Number of conversations still running.
    pub fn active_runs(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Graceful teardown: no new turns begin, in-flight turns complete, and the call returns
    /// once every conversation has finished.
    pub async fn stop_when_idle(&self) {
        log::debug!(
            "Stopping group chat runtime; waiting for {} run(s)",
            self.tracker.len()
        );
        self.stop.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Hard teardown: in-flight agent invocations are abandoned and nothing partial is
    /// committed.
    pub async fn stop_now(&self) {
        log::debug!("Cancelling {} group chat run(s)", self.tracker.len());
        self.cancel.cancel();
        self.stop.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Handle on one spawned conversation.
///
/// Iterating it as a [`Stream`] yields each agent message as soon as it is committed.
pub struct ConversationRun {
    messages: UnboundedReceiverStream<ChatMessage>,
    state: watch::Receiver<RunState>,
    history: Arc<ChatHistory>,
    control: RunControl,
    task: JoinHandle<ConversationOutcome>,
}

impl ConversationRun {
    /// Waits for the next agent message; `None` once the run has ended.
    pub async fn next_message(&mut self) -> Option<ChatMessage> {
        self.messages.next().await
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Resolves once the run has reached a terminal state.
    pub async fn wait_until_finished(&mut self) -> RunState {
        let finished = self
            .state
            .wait_for(RunState::is_terminal)
            .await
            .map(|state| *state)
            .ok();
        finished.unwrap_or_else(|| *self.state.borrow())
    }

    /// Consistent view of the history as it is right now.
    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    /// Every message appended from now on, seed excluded if already written.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.history.subscribe()
    }

    /// Finish the in-flight turn, then stop.
    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    /// Abandon the in-flight turn and stop.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Waits for the run to end and returns what it produced.
    pub async fn outcome(self) -> Result<ConversationOutcome, GroupChatError> {
        self.task
            .await
            .map_err(|e| GroupChatError::Join(e.to_string()))
    }
}

impl Stream for ConversationRun {
    type Item = ChatMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.messages.poll_next_unpin(cx)
    }
}

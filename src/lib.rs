//! # groupchat
//!
//! `groupchat` drives a roster of autonomous conversational agents through one shared,
//! ordered conversation. Turn by turn it decides who speaks next, invokes that agent, records
//! the reply and asks whether the conversation is done.
//!
//! The crate is layered, leaves first:
//!
//! * **Messages and history**: [`ChatMessage`] records live in an append-only [`ChatHistory`]
//!   with a single writer. Readers take copy-on-write [`HistorySnapshot`]s and can subscribe
//!   to appends.
//! * **Selection policies**: [`SelectionStrategy`] implementations pick the next speaker.
//!   [`RoundRobinSelection`] walks the roster, [`ContentRoutedSelection`] routes on message
//!   content and [`ModeratedSelection`] asks a moderator agent.
//! * **Termination policies**: [`TerminationStrategy`] implementations decide when to stop.
//!   The provided ones are [`MaxTurnsTermination`], [`KeywordTermination`] for approval
//!   markers, [`ConvergenceTermination`] and [`CompositeTermination`] combining the others.
//! * **Orchestration**: the [`Orchestrator`] runs the select → invoke → append → check loop
//!   under a hard `max_turns` safety net, with an optional loop guard and cooperative
//!   cancellation.
//! * **Runtime**: [`Runtime`] hosts conversations as tracked tasks, streams their messages
//!   through [`ConversationRun`] and tears everything down with a graceful or hard stop.
//! * **Capabilities**: [`CapabilityRegistry`] maps names to schema-described sync or async
//!   functions that agents can call.
//!
//! Language models are deliberately out of the picture: anything implementing [`ChatAgent`]
//! can take a turn. [`ScriptedAgent`] and [`FnAgent`] cover tests and glue code.
//!
//! The crate aims to provide documentation-quality examples for every public API. These
//! examples are written to compile under `cargo test --doc`.
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use groupchat::agent::ScriptedAgent;
//! use groupchat::orchestration::{Orchestrator, TerminationReason};
//! use groupchat::selection::{ContentRoutedSelection, RoutingRule};
//! use groupchat::termination::{CompositeTermination, KeywordTermination, MaxTurnsTermination};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     groupchat::init_logger();
//!
//!     let mut chat = Orchestrator::new("docs", "Documentation team")
//!         .with_selection(
//!             ContentRoutedSelection::new().with_rule(RoutingRule::on_code_block("Validator")),
//!         )
//!         .with_termination(
//!             CompositeTermination::any()
//!                 .with(KeywordTermination::new("User", "APPROVED"))
//!                 .with(MaxTurnsTermination::new(8)),
//!         );
//!
//!     chat.add_agent(Arc::new(ScriptedAgent::new(
//!         "Writer",
//!         ["Setup guide:\n```sh\ncargo build\n```"],
//!     )))?;
//!     chat.add_agent(Arc::new(ScriptedAgent::new("Validator", ["The snippet is valid."])))?;
//!     chat.add_agent(Arc::new(ScriptedAgent::new("User", ["APPROVED"])))?;
//!
//!     let outcome = chat.run_to_completion("Write a setup guide").await?;
//!     assert_eq!(outcome.reason, TerminationReason::PolicySatisfied);
//!     assert_eq!(outcome.speakers(), vec!["Writer", "Validator", "User"]);
//!
//!     let guide = outcome.final_result_from("Writer")?;
//!     println!("{}", guide.content);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding groupchat can opt in to simple `RUST_LOG` driven diagnostics
/// without choosing a logging backend upfront.
///
/// ```rust
/// groupchat::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `groupchat` module.
pub mod groupchat;

// Re-exporting key items for easier external access.
pub use groupchat::agent;
pub use groupchat::agent::{
    AgentResponse, AgentResult, ChatAgent, FnAgent, Roster, ScriptedAgent, TokenUsage,
};
pub use groupchat::config;
pub use groupchat::config::GroupChatConfig;
pub use groupchat::error;
pub use groupchat::error::{GroupChatError, StrategyError};
pub use groupchat::event;
pub use groupchat::event::{ChatEvent, EventHandler, LogEventHandler, MessageSink};
pub use groupchat::history;
pub use groupchat::history::{ChatHistory, HistorySnapshot};
pub use groupchat::message;
pub use groupchat::message::{ChatMessage, Role};
pub use groupchat::orchestration;
pub use groupchat::orchestration::{
    ConversationOutcome, Orchestrator, ResultPolicy, RunControl, RunState, TerminationReason,
    TerminationSignal,
};
pub use groupchat::registry;
pub use groupchat::registry::CapabilityRegistry;
pub use groupchat::runtime;
pub use groupchat::runtime::{ConversationRun, Runtime};
pub use groupchat::selection;
pub use groupchat::selection::{
    ContentRoutedSelection, ModeratedSelection, RoundRobinSelection, RoutingRule,
    SelectionStrategy,
};
pub use groupchat::termination;
pub use groupchat::termination::{
    CompositeTermination, ConvergenceTermination, KeywordTermination, MaxTurnsTermination,
    TerminationStrategy,
};

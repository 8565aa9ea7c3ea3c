//! Error types shared by the history, strategies, orchestrator and runtime.

use std::error::Error;
use std::fmt;

/// Failure reported by a selection or termination strategy.
///
/// # Examples
///
/// ```
/// use groupchat::error::{GroupChatError, StrategyError};
///
/// let err: GroupChatError = StrategyError::UnknownAgent("Ghost".into()).into();
/// assert_eq!(err.to_string(), "Strategy error: unknown agent: Ghost");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// The roster is empty or every entry is inactive.
    NoEligibleAgent,
    /// A rule or configuration names an agent that is not in the roster.
    UnknownAgent(String),
    /// The strategy was built with inconsistent settings.
    Misconfigured(String),
    /// A collaborator the strategy depends on (e.g. a moderator agent) failed.
    Failed(String),
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyError::NoEligibleAgent => write!(f, "no eligible agent"),
            StrategyError::UnknownAgent(name) => write!(f, "unknown agent: {}", name),
            StrategyError::Misconfigured(msg) => write!(f, "misconfigured: {}", msg),
            StrategyError::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

impl Error for StrategyError {}

/// Errors produced while building or running a group chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChatError {
    /// The selected agent returned an error from `invoke`.
    AgentInvocation { agent: String, message: String },

    /// A selection or termination strategy failed.
    Strategy(String),

    /// An append did not carry the next expected sequence number.
    OutOfOrderAppend { expected: u64, actual: u64 },

    /// No active agent could be selected.
    NoEligibleAgent,

    /// One agent was selected more times in a row than `max_consecutive_turns` allows.
    RepeatLimitExceeded { agent: String, turns: usize },

    /// `final_result` found no message matching the predicate.
    NoMatchingResult,

    /// `final_result` under [`ResultPolicy::Unique`](crate::groupchat::orchestration::ResultPolicy)
    /// found more than one match.
    AmbiguousResult(usize),

    /// A terminal-state operation was requested before the run finished.
    NotTerminated,

    /// The orchestrator was started with an empty roster.
    NoAgents,

    /// An agent with the same name is already in the roster.
    DuplicateAgent(String),

    /// A roster operation named an agent that is not registered.
    AgentNotFound(String),

    /// The orchestrator has already been started; call `reset` to reuse it.
    AlreadyStarted,

    /// The configuration failed validation.
    InvalidConfig(String),

    /// No async runtime is available to host conversations.
    RuntimeUnavailable(String),

    /// The runtime is stopping and accepts no new conversations.
    RuntimeClosed,

    /// The task driving a conversation panicked or was aborted.
    Join(String),
}

impl fmt::Display for GroupChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupChatError::AgentInvocation { agent, message } => {
                write!(f, "Agent '{}' failed: {}", agent, message)
            }
            GroupChatError::Strategy(msg) => write!(f, "Strategy error: {}", msg),
            GroupChatError::OutOfOrderAppend { expected, actual } => write!(
                f,
                "Out-of-order append: expected sequence {}, got {}",
                expected, actual
            ),
            GroupChatError::NoEligibleAgent => write!(f, "No eligible agent to select"),
            GroupChatError::RepeatLimitExceeded { agent, turns } => write!(
                f,
                "Agent '{}' was selected {} times in a row",
                agent, turns
            ),
            GroupChatError::NoMatchingResult => write!(f, "No message matches the result predicate"),
            GroupChatError::AmbiguousResult(count) => {
                write!(f, "{} messages match the result predicate", count)
            }
            GroupChatError::NotTerminated => write!(f, "Conversation has not terminated"),
            GroupChatError::NoAgents => write!(f, "No agents in group chat"),
            GroupChatError::DuplicateAgent(name) => write!(f, "Agent already registered: {}", name),
            GroupChatError::AgentNotFound(name) => write!(f, "Agent not found: {}", name),
            GroupChatError::AlreadyStarted => write!(f, "Group chat has already been started"),
            GroupChatError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            GroupChatError::RuntimeUnavailable(msg) => write!(f, "Runtime unavailable: {}", msg),
            GroupChatError::RuntimeClosed => write!(f, "Runtime is stopping"),
            GroupChatError::Join(msg) => write!(f, "Conversation task failed: {}", msg),
        }
    }
}

impl Error for GroupChatError {}

impl From<StrategyError> for GroupChatError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::NoEligibleAgent => GroupChatError::NoEligibleAgent,
            other => GroupChatError::Strategy(other.to_string()),
        }
    }
}

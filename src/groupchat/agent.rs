//! Agents and the roster they are registered in.
//!
//! The orchestrator treats agents as opaque: anything implementing [`ChatAgent`] can take a
//! turn. An agent receives a read-only [`HistorySnapshot`] and produces one
//! [`AgentResponse`]; the orchestrator turns that into a sequenced
//! [`ChatMessage`](crate::groupchat::message::ChatMessage) authored by the agent.
//!
//! Two ready-made agents cover tests, demos and glue code without a language model:
//! [`ScriptedAgent`] replays canned replies and [`FnAgent`] wraps a closure.

use crate::groupchat::error::GroupChatError;
use crate::groupchat::history::HistorySnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Token accounting reported by an agent for a single reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// What an agent hands back for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    pub tokens_used: Option<TokenUsage>,
    /// Copied onto the resulting message.
    pub metadata: HashMap<String, String>,
}

impl AgentResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tokens(mut self, usage: TokenUsage) -> Self {
        self.tokens_used = Some(usage);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<String> for AgentResponse {
    fn from(content: String) -> Self {
        AgentResponse::new(content)
    }
}

impl From<&str> for AgentResponse {
    fn from(content: &str) -> Self {
        AgentResponse::new(content)
    }
}

/// Result of a single agent invocation.
pub type AgentResult = Result<AgentResponse, Box<dyn Error + Send + Sync>>;

/// A participant in a group chat.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use groupchat::agent::{AgentResponse, AgentResult, ChatAgent};
/// use groupchat::history::HistorySnapshot;
///
/// struct Echo;
///
/// #[async_trait]
/// impl ChatAgent for Echo {
///     fn name(&self) -> &str {
///         "Echo"
///     }
///
///     async fn invoke(&self, history: &HistorySnapshot) -> AgentResult {
///         let last = history.last().map(|m| m.content.to_string()).unwrap_or_default();
///         Ok(AgentResponse::new(last))
///     }
/// }
/// ```
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Unique name within a roster; used as the author of the agent's messages.
    fn name(&self) -> &str;

    /// Short description, shown to moderators choosing the next speaker.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Produces exactly one reply to the conversation so far.
    async fn invoke(&self, history: &HistorySnapshot) -> AgentResult;
}

/// One agent plus its eligibility flag.
#[derive(Clone)]
pub struct RosterEntry {
    agent: Arc<dyn ChatAgent>,
    active: bool,
}

impl RosterEntry {
    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn agent(&self) -> &Arc<dyn ChatAgent> {
        &self.agent
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl fmt::Debug for RosterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RosterEntry")
            .field("name", &self.name())
            .field("active", &self.active)
            .finish()
    }
}

/// Ordered set of uniquely named agents.
///
/// Order matters: round-robin selection walks the roster in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active agent. Names must be unique.
    pub fn add(&mut self, agent: Arc<dyn ChatAgent>) -> Result<(), GroupChatError> {
        self.insert(agent, true)
    }

    /// Adds an agent that selection policies skip until it is activated.
    pub fn add_inactive(&mut self, agent: Arc<dyn ChatAgent>) -> Result<(), GroupChatError> {
        self.insert(agent, false)
    }

    fn insert(&mut self, agent: Arc<dyn ChatAgent>, active: bool) -> Result<(), GroupChatError> {
        if self.position(agent.name()).is_some() {
            return Err(GroupChatError::DuplicateAgent(agent.name().to_string()));
        }
        self.entries.push(RosterEntry { agent, active });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Arc<dyn ChatAgent>, GroupChatError> {
        let index = self
            .position(name)
            .ok_or_else(|| GroupChatError::AgentNotFound(name.to_string()))?;
        Ok(self.entries.remove(index).agent)
    }

    pub fn set_active(&mut self, name: &str, active: bool) -> Result<(), GroupChatError> {
        let index = self
            .position(name)
            .ok_or_else(|| GroupChatError::AgentNotFound(name.to_string()))?;
        self.entries[index].active = active;
        Ok(())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn entry(&self, index: usize) -> Option<&RosterEntry> {
        self.entries.get(index)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.get(name).map_or(false, RosterEntry::is_active)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RosterEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(RosterEntry::name).collect()
    }

    pub fn active_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.active)
            .map(RosterEntry::name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replays a fixed list of replies, one per invocation.
///
/// Once the script is exhausted the agent either starts over (see
/// [`ScriptedAgent::cycling`]) or returns an error.
///
/// ```
/// use groupchat::agent::{ChatAgent, ScriptedAgent};
/// use groupchat::history::HistorySnapshot;
///
/// # #[tokio::main]
/// # async fn main() {
/// let agent = ScriptedAgent::new("Writer", ["draft", "final"]);
/// let empty = HistorySnapshot::default();
/// assert_eq!(agent.invoke(&empty).await.unwrap().content, "draft");
/// assert_eq!(agent.invoke(&empty).await.unwrap().content, "final");
/// assert!(agent.invoke(&empty).await.is_err());
/// # }
/// ```
pub struct ScriptedAgent {
    name: String,
    description: Option<String>,
    replies: Vec<String>,
    cursor: AtomicUsize,
    cycle: bool,
    tokens_per_reply: Option<TokenUsage>,
}

impl ScriptedAgent {
    pub fn new<I, S>(name: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            replies: replies.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
            cycle: false,
            tokens_per_reply: None,
        }
    }

    /// Restart from the first reply when the script runs out.
    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Report `usage` with every reply.
    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.tokens_per_reply = Some(usage);
        self
    }

    /// How many replies have been handed out so far.
    pub fn invocations(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn invoke(&self, _history: &HistorySnapshot) -> AgentResult {
        let n = self.cursor.fetch_add(1, Ordering::SeqCst);
        let index = if self.cycle && !self.replies.is_empty() {
            n % self.replies.len()
        } else {
            n
        };
        let reply = self.replies.get(index).ok_or_else(|| {
            format!(
                "{} has no scripted reply left (used {})",
                self.name,
                self.replies.len()
            )
        })?;

        let mut response = AgentResponse::new(reply.clone());
        response.tokens_used = self.tokens_per_reply;
        Ok(response)
    }
}

/// Boxed future returned by an [`AgentFn`].
pub type AgentFuture = Pin<Box<dyn Future<Output = AgentResult> + Send>>;

/// Asynchronous agent body: receives a snapshot and resolves to one reply.
pub type AgentFn = Arc<dyn Fn(HistorySnapshot) -> AgentFuture + Send + Sync>;

/// Agent backed by a closure.
///
/// ```
/// use groupchat::agent::{AgentResponse, ChatAgent, FnAgent};
///
/// let counter = FnAgent::from_sync("Counter", |history| {
///     Ok(AgentResponse::new(format!("{} messages so far", history.len())))
/// });
/// assert_eq!(counter.name(), "Counter");
/// ```
pub struct FnAgent {
    name: String,
    description: Option<String>,
    func: AgentFn,
}

impl FnAgent {
    pub fn new(name: impl Into<String>, func: AgentFn) -> Self {
        Self {
            name: name.into(),
            description: None,
            func,
        }
    }

    /// Wraps a synchronous closure.
    pub fn from_sync<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&HistorySnapshot) -> AgentResult + Send + Sync + 'static,
    {
        let func: AgentFn = Arc::new(move |history: HistorySnapshot| -> AgentFuture {
            let result = func(&history);
            Box::pin(async move { result })
        });
        Self::new(name, func)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl ChatAgent for FnAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn invoke(&self, history: &HistorySnapshot) -> AgentResult {
        (self.func)(history.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(name: &str) -> Arc<dyn ChatAgent> {
        Arc::new(ScriptedAgent::new(name, ["ok"]))
    }

    #[test]
    fn roster_rejects_duplicate_names() {
        let mut roster = Roster::new();
        roster.add(scripted("A")).unwrap();
        let err = roster.add(scripted("A")).unwrap_err();
        assert_eq!(err, GroupChatError::DuplicateAgent("A".into()));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn roster_tracks_activity() {
        let mut roster = Roster::new();
        roster.add(scripted("A")).unwrap();
        roster.add_inactive(scripted("B")).unwrap();
        assert_eq!(roster.active_names(), vec!["A"]);

        roster.set_active("B", true).unwrap();
        roster.set_active("A", false).unwrap();
        assert_eq!(roster.active_names(), vec!["B"]);
        assert_eq!(
            roster.set_active("C", true),
            Err(GroupChatError::AgentNotFound("C".into()))
        );
    }

    #[test]
    fn removing_keeps_order_of_the_rest() {
        let mut roster = Roster::new();
        for name in ["A", "B", "C"] {
            roster.add(scripted(name)).unwrap();
        }
        roster.remove("B").unwrap();
        assert_eq!(roster.names(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn cycling_script_wraps_around() {
        let agent = ScriptedAgent::new("A", ["one", "two"]).cycling();
        let empty = HistorySnapshot::default();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(agent.invoke(&empty).await.unwrap().content);
        }
        assert_eq!(seen, vec!["one", "two", "one"]);
        assert_eq!(agent.invocations(), 3);
    }

    #[test]
    fn token_usage_totals_both_directions() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }
}

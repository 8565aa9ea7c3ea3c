//! Speaker selection policies.
//!
//! A [`SelectionStrategy`] looks at the conversation so far and names the agent that speaks
//! next. Strategies are read-only: they receive a [`SelectionContext`] of borrowed snapshot and
//! roster data and never touch the history. Apart from [`ModeratedSelection`], which asks an
//! agent for its opinion, every provided policy is deterministic for identical inputs.
//!
//! Built-in policies:
//!
//! * [`RoundRobinSelection`] walks the roster in order, skipping inactive agents.
//! * [`ContentRoutedSelection`] matches the latest message against ordered
//!   [`RoutingRule`]s and falls back to round-robin.
//! * [`ModeratedSelection`] lets a moderator agent outside the roster pick the speaker.

use crate::groupchat::agent::{ChatAgent, Roster};
use crate::groupchat::error::StrategyError;
use crate::groupchat::history::HistorySnapshot;
use crate::groupchat::message::{has_fenced_code_block, ChatMessage, Role};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Read-only inputs handed to a [`SelectionStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub history: &'a HistorySnapshot,
    pub roster: &'a Roster,
    /// Agent that spoke last; `None` before the first agent turn.
    pub previous_speaker: Option<&'a str>,
    /// 1-based number of the turn being selected for.
    pub turn: usize,
}

/// The chosen agent and why it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub agent: String,
    pub reason: String,
}

impl Selection {
    pub fn new(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            reason: reason.into(),
        }
    }
}

/// Decides which agent takes the next turn.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    async fn select_next(&self, ctx: &SelectionContext<'_>) -> Result<Selection, StrategyError>;

    fn name(&self) -> &str;
}

/// Deterministic cyclic order over the roster.
///
/// The policy keeps no state of its own: the next speaker is the first active agent after
/// the previous speaker's roster position, wrapping around. Before anyone has spoken it
/// starts at the configured first agent, or at the head of the roster.
///
/// # Examples
///
/// ```
/// use groupchat::selection::RoundRobinSelection;
///
/// let policy = RoundRobinSelection::new().starting_with("Reviewer");
/// assert_eq!(policy.first_speaker(), Some("Reviewer"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RoundRobinSelection {
    first_speaker: Option<String>,
}

impl RoundRobinSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_with(mut self, agent: impl Into<String>) -> Self {
        self.first_speaker = Some(agent.into());
        self
    }

    pub fn first_speaker(&self) -> Option<&str> {
        self.first_speaker.as_deref()
    }

    /// Index of the speaker that follows `previous` in `roster`.
    pub fn next_index(&self, roster: &Roster, previous: Option<&str>) -> Result<usize, StrategyError> {
        if roster.is_empty() {
            return Err(StrategyError::NoEligibleAgent);
        }
        let len = roster.len();

        let start = match previous.and_then(|name| roster.position(name)) {
            Some(index) => (index + 1) % len,
            None => match &self.first_speaker {
                Some(name) => roster
                    .position(name)
                    .ok_or_else(|| StrategyError::UnknownAgent(name.clone()))?,
                None => 0,
            },
        };

        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&index| roster.entry(index).map_or(false, |e| e.is_active()))
            .ok_or(StrategyError::NoEligibleAgent)
    }
}

#[async_trait]
impl SelectionStrategy for RoundRobinSelection {
    async fn select_next(&self, ctx: &SelectionContext<'_>) -> Result<Selection, StrategyError> {
        let index = self.next_index(ctx.roster, ctx.previous_speaker)?;
        let entry = ctx
            .roster
            .entry(index)
            .ok_or(StrategyError::NoEligibleAgent)?;
        Ok(Selection::new(
            entry.name(),
            format!("round-robin position {} of {}", index + 1, ctx.roster.len()),
        ))
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}

/// Custom routing predicate over the latest message.
pub type MessagePredicate = Arc<dyn Fn(&ChatMessage) -> bool + Send + Sync>;

/// When a [`RoutingRule`] fires.
#[derive(Clone)]
pub enum RouteCondition {
    /// The message contains a complete fenced code block.
    FencedCodeBlock,
    /// The message contains the substring.
    Contains(String),
    /// The message was written by the named agent.
    AuthoredBy(String),
    /// Arbitrary predicate; the label is used in selection reasons.
    Custom { label: String, predicate: MessagePredicate },
}

impl RouteCondition {
    pub fn matches(&self, message: &ChatMessage) -> bool {
        match self {
            RouteCondition::FencedCodeBlock => has_fenced_code_block(&message.content),
            RouteCondition::Contains(needle) => message.content.contains(needle.as_str()),
            RouteCondition::AuthoredBy(author) => message.is_authored_by(author),
            RouteCondition::Custom { predicate, .. } => predicate(message),
        }
    }
}

impl fmt::Display for RouteCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteCondition::FencedCodeBlock => write!(f, "fenced code block"),
            RouteCondition::Contains(needle) => write!(f, "contains {:?}", needle),
            RouteCondition::AuthoredBy(author) => write!(f, "authored by {}", author),
            RouteCondition::Custom { label, .. } => f.write_str(label),
        }
    }
}

impl fmt::Debug for RouteCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteCondition({})", self)
    }
}

/// Sends the conversation to `target` when `condition` matches the latest message.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub condition: RouteCondition,
    pub target: String,
}

impl RoutingRule {
    pub fn new(condition: RouteCondition, target: impl Into<String>) -> Self {
        Self {
            condition,
            target: target.into(),
        }
    }

    pub fn on_code_block(target: impl Into<String>) -> Self {
        Self::new(RouteCondition::FencedCodeBlock, target)
    }

    pub fn on_keyword(keyword: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(RouteCondition::Contains(keyword.into()), target)
    }

    pub fn after(author: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(RouteCondition::AuthoredBy(author.into()), target)
    }

    pub fn on_predicate<F>(label: impl Into<String>, predicate: F, target: impl Into<String>) -> Self
    where
        F: Fn(&ChatMessage) -> bool + Send + Sync + 'static,
    {
        Self::new(
            RouteCondition::Custom {
                label: label.into(),
                predicate: Arc::new(predicate),
            },
            target,
        )
    }
}

/// Routes on the content of the latest message; first matching rule wins.
///
/// A matching rule is skipped when its target is inactive or is the agent that produced the
/// latest message, so a rule can never hand the floor straight back to the speaker that
/// triggered it. A rule naming an agent outside the roster is reported as
/// [`StrategyError::UnknownAgent`]. With no usable match the fallback round-robin decides.
///
/// # Examples
///
/// ```
/// use groupchat::selection::{ContentRoutedSelection, RoutingRule};
///
/// let routing = ContentRoutedSelection::new()
///     .with_rule(RoutingRule::on_code_block("Validator"))
///     .with_rule(RoutingRule::on_keyword("REVISE", "Writer"));
/// assert_eq!(routing.rules().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContentRoutedSelection {
    rules: Vec<RoutingRule>,
    fallback: RoundRobinSelection,
}

impl ContentRoutedSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_fallback(mut self, fallback: RoundRobinSelection) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    fn route(&self, ctx: &SelectionContext<'_>) -> Result<Option<Selection>, StrategyError> {
        let latest = match ctx.history.last() {
            Some(message) => message,
            None => return Ok(None),
        };

        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.condition.matches(latest) {
                continue;
            }
            let entry = ctx
                .roster
                .get(&rule.target)
                .ok_or_else(|| StrategyError::UnknownAgent(rule.target.clone()))?;
            if !entry.is_active() || latest.is_authored_by(&rule.target) {
                continue;
            }
            return Ok(Some(Selection::new(
                rule.target.as_str(),
                format!("rule {} matched: {}", index + 1, rule.condition),
            )));
        }
        Ok(None)
    }
}

#[async_trait]
impl SelectionStrategy for ContentRoutedSelection {
    async fn select_next(&self, ctx: &SelectionContext<'_>) -> Result<Selection, StrategyError> {
        if let Some(selection) = self.route(ctx)? {
            return Ok(selection);
        }
        let mut selection = self.fallback.select_next(ctx).await?;
        selection.reason = format!("no rule matched, {}", selection.reason);
        Ok(selection)
    }

    fn name(&self) -> &str {
        "content-routed"
    }
}

/// A moderator agent names the next speaker.
///
/// The moderator sees the conversation plus a system message listing the active candidates.
/// Its reply is matched case-insensitively against candidate names; when several names
/// appear the longest one wins, so "Code Validator" beats "Validator". If nothing matches
/// the fallback round-robin decides. A failing moderator is a [`StrategyError::Failed`].
pub struct ModeratedSelection {
    moderator: Arc<dyn ChatAgent>,
    fallback: RoundRobinSelection,
}

impl ModeratedSelection {
    pub fn new(moderator: Arc<dyn ChatAgent>) -> Self {
        Self {
            moderator,
            fallback: RoundRobinSelection::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: RoundRobinSelection) -> Self {
        self.fallback = fallback;
        self
    }

    fn selection_prompt(roster: &Roster) -> String {
        let mut prompt = String::from("Choose the next speaker. Available agents:\n");
        for entry in roster.iter().filter(|e| e.is_active()) {
            match entry.agent().description() {
                Some(description) => {
                    prompt.push_str(&format!("- {}: {}\n", entry.name(), description))
                }
                None => prompt.push_str(&format!("- {}\n", entry.name())),
            }
        }
        prompt.push_str("Respond with ONLY the agent name.");
        prompt
    }

    fn match_candidate<'r>(reply: &str, roster: &'r Roster) -> Option<&'r str> {
        let reply = reply.to_lowercase();
        roster
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.name())
            .filter(|name| reply.contains(&name.to_lowercase()))
            .max_by_key(|name| name.len())
    }
}

#[async_trait]
impl SelectionStrategy for ModeratedSelection {
    async fn select_next(&self, ctx: &SelectionContext<'_>) -> Result<Selection, StrategyError> {
        if ctx.roster.active_names().is_empty() {
            return Err(StrategyError::NoEligibleAgent);
        }

        let prompt = ChatMessage::new(
            ctx.history.len() as u64 + 1,
            self.moderator.name(),
            Role::System,
            Self::selection_prompt(ctx.roster),
        );
        let view = ctx.history.with_appended(prompt);
        let reply = self
            .moderator
            .invoke(&view)
            .await
            .map_err(|e| StrategyError::Failed(format!("moderator {}: {}", self.moderator.name(), e)))?;

        if let Some(name) = Self::match_candidate(&reply.content, ctx.roster) {
            return Ok(Selection::new(
                name,
                format!("chosen by moderator {}", self.moderator.name()),
            ));
        }

        log::warn!(
            "Moderator '{}' named no known agent in {:?}; falling back to round-robin",
            self.moderator.name(),
            reply.content
        );
        let mut selection = self.fallback.select_next(ctx).await?;
        selection.reason = format!("moderator gave no usable name, {}", selection.reason);
        Ok(selection)
    }

    fn name(&self) -> &str {
        "moderated"
    }
}

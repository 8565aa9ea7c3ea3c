//! Termination policies.
//!
//! A [`TerminationStrategy`] is asked exactly once per turn, right after the turn's message
//! has been appended, whether the conversation is complete. It only reads the snapshot it is
//! given.
//!
//! Independently of any policy, the orchestrator stops after `max_turns` turns (see
//! [`GroupChatConfig`](crate::groupchat::config::GroupChatConfig)).

use crate::groupchat::error::StrategyError;
use crate::groupchat::history::HistorySnapshot;
use std::collections::HashSet;

/// Read-only inputs handed to a [`TerminationStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct TerminationContext<'a> {
    /// History including the message of the turn that just finished.
    pub history: &'a HistorySnapshot,
    pub last_speaker: &'a str,
    /// Number of agent turns taken so far, including the one that just finished.
    pub turn: usize,
}

/// Decides whether the conversation is finished.
pub trait TerminationStrategy: Send + Sync {
    fn should_terminate(&self, ctx: &TerminationContext<'_>) -> Result<bool, StrategyError>;

    fn name(&self) -> &str;
}

/// Stops once a fixed number of turns has been taken, whatever was said.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxTurnsTermination {
    max_turns: usize,
}

impl MaxTurnsTermination {
    pub fn new(max_turns: usize) -> Self {
        Self { max_turns }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}

impl TerminationStrategy for MaxTurnsTermination {
    fn should_terminate(&self, ctx: &TerminationContext<'_>) -> Result<bool, StrategyError> {
        Ok(ctx.turn >= self.max_turns)
    }

    fn name(&self) -> &str {
        "max-turns"
    }
}

/// Stops when a designated agent's latest message contains a marker such as `APPROVED`.
///
/// Matching is a plain substring test, case-sensitive unless
/// [`case_insensitive`](KeywordTermination::case_insensitive) is set. Messages from any other
/// author never terminate the conversation, even if they contain the marker.
///
/// # Examples
///
/// ```
/// use groupchat::history::HistorySnapshot;
/// use groupchat::message::ChatMessage;
/// use groupchat::termination::{KeywordTermination, TerminationContext, TerminationStrategy};
///
/// let approval = KeywordTermination::new("User", "APPROVED");
/// let history = HistorySnapshot::from_messages(vec![
///     ChatMessage::seed(1, "Write a guide"),
///     ChatMessage::from_agent(2, "User", "APPROVED, ship it"),
/// ]);
/// let ctx = TerminationContext { history: &history, last_speaker: "User", turn: 1 };
/// assert!(approval.should_terminate(&ctx).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTermination {
    agent: String,
    marker: String,
    case_sensitive: bool,
}

impl KeywordTermination {
    pub fn new(agent: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            marker: marker.into(),
            case_sensitive: true,
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl TerminationStrategy for KeywordTermination {
    fn should_terminate(&self, ctx: &TerminationContext<'_>) -> Result<bool, StrategyError> {
        if self.marker.is_empty() {
            return Err(StrategyError::Misconfigured(
                "keyword termination needs a non-empty marker".into(),
            ));
        }
        let latest = match ctx.history.last() {
            Some(message) if message.is_authored_by(&self.agent) => message,
            _ => return Ok(false),
        };
        let found = if self.case_sensitive {
            latest.content.contains(self.marker.as_str())
        } else {
            latest
                .content
                .to_lowercase()
                .contains(&self.marker.to_lowercase())
        };
        Ok(found)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// How a [`CompositeTermination`] combines its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Stop when any part says stop.
    Any,
    /// Stop only when every part says stop.
    All,
}

/// Combines several policies, evaluated left to right with short-circuiting.
///
/// An empty composite never terminates; the orchestrator's turn bound still applies.
pub struct CompositeTermination {
    mode: CompositeMode,
    strategies: Vec<Box<dyn TerminationStrategy>>,
}

impl CompositeTermination {
    pub fn new(mode: CompositeMode) -> Self {
        Self {
            mode,
            strategies: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self::new(CompositeMode::Any)
    }

    pub fn all() -> Self {
        Self::new(CompositeMode::All)
    }

    pub fn with(mut self, strategy: impl TerminationStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl TerminationStrategy for CompositeTermination {
    fn should_terminate(&self, ctx: &TerminationContext<'_>) -> Result<bool, StrategyError> {
        if self.strategies.is_empty() {
            return Ok(false);
        }
        for strategy in &self.strategies {
            let stop = strategy.should_terminate(ctx)?;
            match self.mode {
                CompositeMode::Any if stop => return Ok(true),
                CompositeMode::All if !stop => return Ok(false),
                _ => {}
            }
        }
        Ok(self.mode == CompositeMode::All)
    }

    fn name(&self) -> &str {
        match self.mode {
            CompositeMode::Any => "composite-any",
            CompositeMode::All => "composite-all",
        }
    }
}

pub const DEFAULT_CONVERGENCE_THRESHOLD: f32 = 0.75;

/// Stops when an agent starts repeating itself.
///
/// Compares the latest message with the previous message by the same author using Jaccard
/// similarity over lowercase word sets, and stops once the score reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceTermination {
    threshold: f32,
}

impl ConvergenceTermination {
    /// Clamps `threshold` into `[0, 1]`; NaN falls back to the default threshold.
    pub fn new(threshold: f32) -> Self {
        if threshold.is_nan() {
            log::warn!(
                "Convergence threshold is NaN; using {}",
                DEFAULT_CONVERGENCE_THRESHOLD
            );
            return Self {
                threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            };
        }
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for ConvergenceTermination {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERGENCE_THRESHOLD)
    }
}

impl TerminationStrategy for ConvergenceTermination {
    fn should_terminate(&self, ctx: &TerminationContext<'_>) -> Result<bool, StrategyError> {
        let mut by_speaker = ctx
            .history
            .iter()
            .rev()
            .filter(|m| m.is_authored_by(ctx.last_speaker));
        let (latest, previous) = match (by_speaker.next(), by_speaker.next()) {
            (Some(latest), Some(previous)) => (latest, previous),
            _ => return Ok(false),
        };
        let score = jaccard_similarity(&latest.content, &previous.content);
        log::debug!(
            "Convergence check for '{}': similarity {:.3} (threshold {:.3})",
            ctx.last_speaker,
            score,
            self.threshold
        );
        Ok(score >= self.threshold)
    }

    fn name(&self) -> &str {
        "convergence"
    }
}

/// Jaccard similarity of the lowercase word sets of `a` and `b`, in `[0.0, 1.0]`.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f32 / union as f32
}

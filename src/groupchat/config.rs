//! Orchestrator configuration.

use crate::groupchat::error::GroupChatError;
use crate::groupchat::history::DEFAULT_BROADCAST_CAPACITY;
use serde::{Deserialize, Serialize};

/// Hard upper bound on agent turns when none is configured.
pub const DEFAULT_MAX_TURNS: usize = 99;

/// Tunables for a group chat run.
///
/// Policies (selection and termination) are strategy objects set on the orchestrator; this
/// struct only carries plain values, so it can be loaded from JSON.
///
/// # Examples
///
/// ```
/// use groupchat::config::GroupChatConfig;
///
/// let config = GroupChatConfig::from_json_str(r#"{ "max_turns": 6, "initial_speaker": "Writer" }"#)
///     .unwrap();
/// assert_eq!(config.max_turns, 6);
/// assert_eq!(config.initial_speaker.as_deref(), Some("Writer"));
/// assert_eq!(config.max_consecutive_turns, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupChatConfig {
    /// Safety net: the run stops with `max-rounds-exhausted` after this many agent turns,
    /// whatever the termination policy says.
    pub max_turns: usize,

    /// Agent that takes the first turn; overrides the selection policy for turn 1 only.
    pub initial_speaker: Option<String>,

    /// How many turns in a row one agent may take before the run fails. `None` disables the
    /// guard.
    pub max_consecutive_turns: Option<usize>,

    /// How far a history subscriber may lag before it starts missing messages.
    pub broadcast_capacity: usize,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            initial_speaker: None,
            max_consecutive_turns: None,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

impl GroupChatConfig {
    pub fn from_json_str(json: &str) -> Result<Self, GroupChatError> {
        let config: GroupChatConfig = serde_json::from_str(json)
            .map_err(|e| GroupChatError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_initial_speaker(mut self, agent: impl Into<String>) -> Self {
        self.initial_speaker = Some(agent.into());
        self
    }

    pub fn with_max_consecutive_turns(mut self, turns: usize) -> Self {
        self.max_consecutive_turns = Some(turns);
        self
    }

    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), GroupChatError> {
        if self.max_turns == 0 {
            return Err(GroupChatError::InvalidConfig(
                "max_turns must be at least 1".into(),
            ));
        }
        if self.max_consecutive_turns == Some(0) {
            return Err(GroupChatError::InvalidConfig(
                "max_consecutive_turns must be at least 1".into(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(GroupChatError::InvalidConfig(
                "broadcast_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GroupChatConfig::default();
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_turn_bound_is_rejected() {
        let err = GroupChatConfig::from_json_str(r#"{ "max_turns": 0 }"#).unwrap_err();
        assert!(matches!(err, GroupChatError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_json_is_an_invalid_config() {
        let err = GroupChatConfig::from_json_str("{ max_turns: ").unwrap_err();
        assert!(matches!(err, GroupChatError::InvalidConfig(_)));
    }

    #[test]
    fn round_trips_through_json() {
        let config = GroupChatConfig::default()
            .with_max_turns(5)
            .with_max_consecutive_turns(2);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(GroupChatConfig::from_json_str(&json).unwrap(), config);
    }
}

use async_trait::async_trait;
use groupchat::agent::{AgentResponse, AgentResult, ChatAgent, Roster, ScriptedAgent};
use groupchat::history::HistorySnapshot;
use groupchat::message::{ChatMessage, Role};
use groupchat::selection::{
    ContentRoutedSelection, ModeratedSelection, RoundRobinSelection, RoutingRule,
    SelectionContext, SelectionStrategy,
};
use groupchat::StrategyError;
use std::sync::{Arc, Mutex};

fn roster(names: &[&str]) -> Roster {
    let mut roster = Roster::new();
    for name in names {
        roster
            .add(Arc::new(ScriptedAgent::new(*name, ["ok"])))
            .unwrap();
    }
    roster
}

fn history(messages: &[(&str, &str)]) -> HistorySnapshot {
    let mut all = vec![ChatMessage::seed(1, "Write a guide")];
    for (i, (author, content)) in messages.iter().enumerate() {
        all.push(ChatMessage::from_agent(i as u64 + 2, *author, *content));
    }
    HistorySnapshot::from_messages(all)
}

async fn pick(
    strategy: &dyn SelectionStrategy,
    roster: &Roster,
    history: &HistorySnapshot,
    previous: Option<&str>,
) -> Result<String, StrategyError> {
    let ctx = SelectionContext {
        history,
        roster,
        previous_speaker: previous,
        turn: history.turns() + 1,
    };
    strategy.select_next(&ctx).await.map(|s| s.agent)
}

#[tokio::test]
async fn round_robin_cycles_in_roster_order() {
    let roster = roster(&["A", "B", "C"]);
    let policy = RoundRobinSelection::new();
    let empty = history(&[]);

    let mut previous: Option<String> = None;
    let mut order = Vec::new();
    for _ in 0..7 {
        let next = pick(&policy, &roster, &empty, previous.as_deref())
            .await
            .unwrap();
        order.push(next.clone());
        previous = Some(next);
    }
    assert_eq!(order, vec!["A", "B", "C", "A", "B", "C", "A"]);
}

#[tokio::test]
async fn round_robin_is_deterministic() {
    let roster = roster(&["A", "B", "C"]);
    let policy = RoundRobinSelection::new();
    let h = history(&[("A", "hi")]);
    for _ in 0..5 {
        assert_eq!(pick(&policy, &roster, &h, Some("A")).await.unwrap(), "B");
    }
}

#[tokio::test]
async fn round_robin_honours_configured_first_agent() {
    let roster = roster(&["A", "B", "C"]);
    let policy = RoundRobinSelection::new().starting_with("C");
    let h = history(&[]);
    assert_eq!(pick(&policy, &roster, &h, None).await.unwrap(), "C");
    assert_eq!(pick(&policy, &roster, &h, Some("C")).await.unwrap(), "A");
}

#[tokio::test]
async fn round_robin_skips_inactive_agents_and_wraps() {
    let mut roster = roster(&["A", "B", "C"]);
    roster.set_active("B", false).unwrap();
    roster.set_active("A", false).unwrap();
    let policy = RoundRobinSelection::new();
    let h = history(&[]);

    assert_eq!(pick(&policy, &roster, &h, None).await.unwrap(), "C");
    assert_eq!(pick(&policy, &roster, &h, Some("C")).await.unwrap(), "C");
}

#[tokio::test]
async fn no_active_agents_means_no_eligible_agent() {
    let mut roster = roster(&["A", "B"]);
    roster.set_active("A", false).unwrap();
    roster.set_active("B", false).unwrap();
    let h = history(&[]);

    assert_eq!(
        pick(&RoundRobinSelection::new(), &roster, &h, None).await,
        Err(StrategyError::NoEligibleAgent)
    );
    assert_eq!(
        pick(&RoundRobinSelection::new(), &Roster::new(), &h, None).await,
        Err(StrategyError::NoEligibleAgent)
    );
}

#[tokio::test]
async fn code_block_routes_to_validator() {
    let roster = roster(&["Drafter", "Validator", "Reviewer"]);
    let routing = ContentRoutedSelection::new().with_rule(RoutingRule::on_code_block("Validator"));

    let h = history(&[("Drafter", "Example:\n```python\nprint('hi')\n```")]);
    let ctx = SelectionContext {
        history: &h,
        roster: &roster,
        previous_speaker: Some("Drafter"),
        turn: 2,
    };
    let selection = routing.select_next(&ctx).await.unwrap();
    assert_eq!(selection.agent, "Validator");
    assert!(selection.reason.contains("fenced code block"));
}

#[tokio::test]
async fn first_matching_rule_wins() {
    let roster = roster(&["A", "B", "C"]);
    let routing = ContentRoutedSelection::new()
        .with_rule(RoutingRule::on_keyword("urgent", "C"))
        .with_rule(RoutingRule::after("A", "B"));

    let h = history(&[("A", "this is urgent")]);
    assert_eq!(pick(&routing, &roster, &h, Some("A")).await.unwrap(), "C");

    let h = history(&[("A", "routine update")]);
    assert_eq!(pick(&routing, &roster, &h, Some("A")).await.unwrap(), "B");
}

#[tokio::test]
async fn unmatched_content_falls_back_to_round_robin() {
    let roster = roster(&["A", "B", "C"]);
    let routing = ContentRoutedSelection::new().with_rule(RoutingRule::on_code_block("C"));

    let h = history(&[("A", "prose only")]);
    let ctx = SelectionContext {
        history: &h,
        roster: &roster,
        previous_speaker: Some("A"),
        turn: 2,
    };
    let selection = routing.select_next(&ctx).await.unwrap();
    assert_eq!(selection.agent, "B");
    assert!(selection.reason.starts_with("no rule matched"));
}

#[tokio::test]
async fn rules_targeting_inactive_or_current_speaker_are_skipped() {
    let mut roster = roster(&["A", "B", "C"]);
    roster.set_active("C", false).unwrap();
    let routing = ContentRoutedSelection::new()
        .with_rule(RoutingRule::on_code_block("C"))
        .with_rule(RoutingRule::on_code_block("B"));

    let h = history(&[("A", "```\ncode\n```")]);
    assert_eq!(pick(&routing, &roster, &h, Some("A")).await.unwrap(), "B");

    // B echoing code must not route back to B.
    let h = history(&[("B", "```\ncode\n```")]);
    assert_eq!(pick(&routing, &roster, &h, Some("B")).await.unwrap(), "A");
}

#[tokio::test]
async fn rule_with_unknown_target_is_an_error() {
    let roster = roster(&["A", "B"]);
    let routing = ContentRoutedSelection::new().with_rule(RoutingRule::on_keyword("x", "Ghost"));
    let h = history(&[("A", "x marks the spot")]);
    assert_eq!(
        pick(&routing, &roster, &h, Some("A")).await,
        Err(StrategyError::UnknownAgent("Ghost".into()))
    );
}

#[tokio::test]
async fn custom_predicate_rules_route() {
    let roster = roster(&["A", "B", "C"]);
    let routing = ContentRoutedSelection::new().with_rule(RoutingRule::on_predicate(
        "question",
        |m| m.content.trim_end().ends_with('?'),
        "C",
    ));
    let h = history(&[("A", "Should we ship?")]);
    assert_eq!(pick(&routing, &roster, &h, Some("A")).await.unwrap(), "C");
}

/// Moderator that records the prompt it saw and answers with a fixed reply.
struct RecordingModerator {
    reply: String,
    seen: Mutex<Vec<ChatMessage>>,
}

#[async_trait]
impl ChatAgent for RecordingModerator {
    fn name(&self) -> &str {
        "Moderator"
    }

    async fn invoke(&self, history: &HistorySnapshot) -> AgentResult {
        if let Some(last) = history.last() {
            self.seen.lock().unwrap().push(last.clone());
        }
        Ok(AgentResponse::new(self.reply.clone()))
    }
}

#[tokio::test]
async fn moderator_names_the_next_speaker() {
    let mut roster = roster(&["Writer", "Reviewer", "Editor"]);
    roster.set_active("Editor", false).unwrap();
    let moderator = Arc::new(RecordingModerator {
        reply: "Next should be the reviewer.".into(),
        seen: Mutex::new(Vec::new()),
    });
    let policy = ModeratedSelection::new(moderator.clone());

    let h = history(&[("Writer", "draft")]);
    assert_eq!(pick(&policy, &roster, &h, Some("Writer")).await.unwrap(), "Reviewer");

    let seen = moderator.seen.lock().unwrap();
    let prompt = &seen[0];
    assert_eq!(prompt.role, Role::System);
    assert!(prompt.content.contains("- Writer"));
    assert!(!prompt.content.contains("Editor"));
    // The moderator's view is detached from the real history.
    assert_eq!(h.len(), 2);
}

#[tokio::test]
async fn moderator_gibberish_falls_back_to_round_robin() {
    let roster = roster(&["Writer", "Reviewer"]);
    let moderator = Arc::new(ScriptedAgent::new("Moderator", ["no idea"]));
    let policy = ModeratedSelection::new(moderator);
    let h = history(&[("Writer", "draft")]);
    assert_eq!(pick(&policy, &roster, &h, Some("Writer")).await.unwrap(), "Reviewer");
}

#[tokio::test]
async fn failing_moderator_is_a_strategy_failure() {
    let roster = roster(&["Writer"]);
    let moderator = Arc::new(ScriptedAgent::new("Moderator", Vec::<String>::new()));
    let policy = ModeratedSelection::new(moderator);
    let h = history(&[]);
    assert!(matches!(
        pick(&policy, &roster, &h, None).await,
        Err(StrategyError::Failed(_))
    ));
}

use groupchat::history::HistorySnapshot;
use groupchat::message::ChatMessage;
use groupchat::termination::{
    CompositeTermination, ConvergenceTermination, KeywordTermination, MaxTurnsTermination,
    TerminationContext, TerminationStrategy,
};
use groupchat::StrategyError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn history(messages: &[(&str, &str)]) -> HistorySnapshot {
    let mut all = vec![ChatMessage::seed(1, "task")];
    for (i, (author, content)) in messages.iter().enumerate() {
        all.push(ChatMessage::from_agent(i as u64 + 2, *author, *content));
    }
    HistorySnapshot::from_messages(all)
}

fn decide(strategy: &dyn TerminationStrategy, h: &HistorySnapshot) -> Result<bool, StrategyError> {
    let last_speaker = h.last().map(|m| m.author.as_str()).unwrap_or("user");
    strategy.should_terminate(&TerminationContext {
        history: h,
        last_speaker,
        turn: h.turns(),
    })
}

/// Counts evaluations and answers with a fixed verdict.
struct Fixed {
    verdict: bool,
    calls: Arc<AtomicUsize>,
}

impl TerminationStrategy for Fixed {
    fn should_terminate(&self, _ctx: &TerminationContext<'_>) -> Result<bool, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

struct Broken;

impl TerminationStrategy for Broken {
    fn should_terminate(&self, _ctx: &TerminationContext<'_>) -> Result<bool, StrategyError> {
        Err(StrategyError::Misconfigured("broken on purpose".into()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn fixed(verdict: bool) -> (Fixed, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        Fixed {
            verdict,
            calls: Arc::clone(&calls),
        },
        calls,
    )
}

#[test]
fn max_turns_stops_exactly_at_the_bound() {
    let policy = MaxTurnsTermination::new(3);
    assert!(!decide(&policy, &history(&[("A", "1"), ("B", "2")])).unwrap());
    assert!(decide(&policy, &history(&[("A", "1"), ("B", "2"), ("A", "3")])).unwrap());
}

#[test]
fn keyword_only_counts_for_the_designated_agent() {
    let policy = KeywordTermination::new("User", "APPROVED");

    let h = history(&[("Writer", "I think this will be APPROVED")]);
    assert!(!decide(&policy, &h).unwrap());

    let h = history(&[("User", "Looks good. APPROVED")]);
    assert!(decide(&policy, &h).unwrap());
}

#[test]
fn keyword_looks_only_at_the_latest_message() {
    let policy = KeywordTermination::new("User", "APPROVED");
    let h = history(&[("User", "APPROVED"), ("Writer", "one more tweak")]);
    assert!(!decide(&policy, &h).unwrap());
}

#[test]
fn keyword_is_case_sensitive_by_default() {
    let h = history(&[("User", "approved!")]);
    assert!(!decide(&KeywordTermination::new("User", "APPROVED"), &h).unwrap());
    assert!(decide(&KeywordTermination::new("User", "APPROVED").case_insensitive(), &h).unwrap());
}

#[test]
fn empty_marker_is_misconfigured() {
    let h = history(&[("User", "anything")]);
    assert!(matches!(
        decide(&KeywordTermination::new("User", ""), &h),
        Err(StrategyError::Misconfigured(_))
    ));
}

#[test]
fn composite_any_short_circuits_on_first_stop() {
    let (yes, yes_calls) = fixed(true);
    let (later, later_calls) = fixed(false);
    let policy = CompositeTermination::any().with(yes).with(later);

    assert!(decide(&policy, &history(&[("A", "x")])).unwrap());
    assert_eq!(yes_calls.load(Ordering::SeqCst), 1);
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn composite_all_short_circuits_on_first_continue() {
    let (no, no_calls) = fixed(false);
    let (later, later_calls) = fixed(true);
    let policy = CompositeTermination::all().with(no).with(later);

    assert!(!decide(&policy, &history(&[("A", "x")])).unwrap());
    assert_eq!(no_calls.load(Ordering::SeqCst), 1);
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn composite_all_stops_when_every_part_agrees() {
    let policy = CompositeTermination::all()
        .with(MaxTurnsTermination::new(1))
        .with(KeywordTermination::new("User", "APPROVED"));
    assert!(decide(&policy, &history(&[("User", "APPROVED")])).unwrap());
    assert!(!decide(&policy, &history(&[("User", "not yet")])).unwrap());
}

#[test]
fn composite_propagates_errors_in_evaluation_order() {
    let (first, _) = fixed(false);
    let policy = CompositeTermination::any().with(first).with(Broken);
    assert!(decide(&policy, &history(&[("A", "x")])).is_err());

    let (stop, _) = fixed(true);
    let policy = CompositeTermination::any().with(stop).with(Broken);
    assert!(decide(&policy, &history(&[("A", "x")])).unwrap());
}

#[test]
fn empty_composite_never_terminates() {
    assert!(!decide(&CompositeTermination::any(), &history(&[("A", "x")])).unwrap());
    assert!(!decide(&CompositeTermination::all(), &history(&[("A", "x")])).unwrap());
}

#[test]
fn convergence_compares_an_agent_with_itself() {
    let policy = ConvergenceTermination::new(0.8);

    let h = history(&[
        ("A", "the plan is to ship on friday"),
        ("B", "completely different words here"),
        ("A", "the plan is to ship on friday"),
    ]);
    assert!(decide(&policy, &h).unwrap());

    let h = history(&[
        ("A", "the plan is to ship on friday"),
        ("A", "actually we should wait for the audit"),
    ]);
    assert!(!decide(&policy, &h).unwrap());

    let h = history(&[("A", "only one message so far")]);
    assert!(!decide(&policy, &h).unwrap());
}

#[test]
fn nan_threshold_still_detects_repetition() {
    let policy = ConvergenceTermination::new(f32::NAN);

    let h = history(&[
        ("A", "the plan is to ship on friday"),
        ("A", "the plan is to ship on friday"),
    ]);
    assert!(decide(&policy, &h).unwrap());

    let h = history(&[("A", "ship it"), ("A", "wait for the audit")]);
    assert!(!decide(&policy, &h).unwrap());
}

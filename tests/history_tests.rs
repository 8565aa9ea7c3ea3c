use groupchat::history::ChatHistory;
use groupchat::message::ChatMessage;
use groupchat::GroupChatError;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

fn seeded() -> ChatHistory {
    let history = ChatHistory::new();
    history.append(ChatMessage::seed(1, "task")).unwrap();
    history
}

#[test]
fn append_accepts_only_the_next_sequence_number() {
    let history = seeded();

    let err = history
        .append(ChatMessage::from_agent(3, "A", "skipped one"))
        .unwrap_err();
    assert_eq!(
        err,
        GroupChatError::OutOfOrderAppend {
            expected: 2,
            actual: 3
        }
    );

    let err = history
        .append(ChatMessage::from_agent(1, "A", "replay"))
        .unwrap_err();
    assert!(matches!(err, GroupChatError::OutOfOrderAppend { expected: 2, .. }));

    assert_eq!(history.append(ChatMessage::from_agent(2, "A", "ok")).unwrap(), 2);
    assert_eq!(history.len(), 2);
    assert_eq!(history.next_sequence(), 3);
}

#[test]
fn rejected_append_leaves_history_untouched() {
    let history = seeded();
    let before = history.snapshot();
    let _ = history.append(ChatMessage::from_agent(9, "A", "nope"));
    assert_eq!(history.snapshot().messages(), before.messages());
}

#[test]
fn snapshots_do_not_see_later_appends() {
    let history = seeded();
    let snapshot = history.snapshot();

    history.append(ChatMessage::from_agent(2, "A", "one")).unwrap();
    history.append(ChatMessage::from_agent(3, "B", "two")).unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(history.snapshot().len(), 3);
    assert_eq!(&*snapshot.last().unwrap().content, "task");
}

#[test]
fn filter_is_restartable_and_frozen_at_creation() {
    let history = seeded();
    history.append(ChatMessage::from_agent(2, "Writer", "draft 1")).unwrap();
    history.append(ChatMessage::from_agent(3, "Critic", "meh")).unwrap();
    history.append(ChatMessage::from_agent(4, "Writer", "draft 2")).unwrap();

    let drafts = history.filter(|m| m.is_authored_by("Writer"));
    let first: Vec<_> = drafts.iter().map(|m| m.sequence).collect();
    let second: Vec<_> = drafts.iter().map(|m| m.sequence).collect();
    assert_eq!(first, vec![2, 4]);
    assert_eq!(first, second);

    history.append(ChatMessage::from_agent(5, "Writer", "draft 3")).unwrap();
    assert_eq!(drafts.count(), 2);
    assert_eq!(drafts.last().map(|m| m.sequence), Some(4));
}

#[test]
fn subscribers_receive_appends_in_order() {
    let history = ChatHistory::new();
    let mut early = history.subscribe();

    history.append(ChatMessage::seed(1, "task")).unwrap();
    let mut late = history.subscribe();
    history.append(ChatMessage::from_agent(2, "A", "one")).unwrap();

    assert_eq!(early.try_recv().unwrap().sequence, 1);
    assert_eq!(early.try_recv().unwrap().sequence, 2);
    assert_eq!(late.try_recv().unwrap().sequence, 2);
    assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn lagging_subscriber_does_not_block_the_writer() {
    let history = ChatHistory::with_broadcast_capacity(2);
    let mut slow = history.subscribe();

    history.append(ChatMessage::seed(1, "task")).unwrap();
    for seq in 2..=6 {
        history
            .append(ChatMessage::from_agent(seq, "A", format!("msg {}", seq)))
            .unwrap();
    }

    assert_eq!(history.len(), 6);
    assert!(matches!(slow.try_recv(), Err(TryRecvError::Lagged(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_snapshots_always_see_a_consistent_prefix() {
    let history = Arc::new(seeded());
    const APPENDS: u64 = 500;

    let mut readers = Vec::new();
    for _ in 0..4 {
        let history = Arc::clone(&history);
        readers.push(tokio::spawn(async move {
            let mut observed = 0;
            while observed < APPENDS as usize + 1 {
                let snapshot = history.snapshot();
                for (index, message) in snapshot.iter().enumerate() {
                    assert_eq!(message.sequence, index as u64 + 1);
                }
                assert!(snapshot.len() >= observed, "history went backwards");
                observed = snapshot.len();
                tokio::task::yield_now().await;
            }
        }));
    }

    for seq in 2..=APPENDS + 1 {
        history
            .append(ChatMessage::from_agent(seq, "A", "x"))
            .unwrap();
        if seq % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(history.len() as u64, APPENDS + 1);
}

//! The append-only conversation log shared by every participant of a group chat.
//!
//! [`ChatHistory`] has a single logical writer (the orchestrator's turn loop) and any number
//! of readers. Readers never borrow the live log: [`ChatHistory::snapshot`] hands out a
//! [`HistorySnapshot`], a reference-counted copy-on-write view that stays valid and unchanged
//! while later appends proceed. A snapshot therefore always shows a consistent prefix of the
//! conversation.
//!
//! Every successful append is also broadcast, in order, to subscribers obtained from
//! [`ChatHistory::subscribe`]. Broadcasting never blocks the writer; a subscriber that falls
//! behind observes `RecvError::Lagged` on its own receiver.
//!
//! # Examples
//!
//! ```
//! use groupchat::history::ChatHistory;
//! use groupchat::message::ChatMessage;
//!
//! let history = ChatHistory::new();
//! history.append(ChatMessage::seed(1, "Write a guide")).unwrap();
//!
//! let before = history.snapshot();
//! history
//!     .append(ChatMessage::from_agent(2, "Writer", "Draft v1"))
//!     .unwrap();
//!
//! assert_eq!(before.len(), 1);
//! assert_eq!(history.len(), 2);
//!
//! let by_writer = history.filter(|m| m.author == "Writer");
//! assert_eq!(by_writer.iter().count(), 1);
//! ```

use crate::groupchat::error::GroupChatError;
use crate::groupchat::message::ChatMessage;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Default number of messages a lagging subscriber may fall behind before losing some.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Append-only, totally ordered log of [`ChatMessage`]s.
#[derive(Debug)]
pub struct ChatHistory {
    entries: RwLock<Arc<Vec<ChatMessage>>>,
    broadcaster: broadcast::Sender<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::with_broadcast_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Creates an empty history whose subscribers may lag by up to `capacity` messages.
    ///
    /// A capacity of zero is raised to one.
    pub fn with_broadcast_capacity(capacity: usize) -> Self {
        let (broadcaster, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            broadcaster,
        }
    }

    /// Appends `message`, which must carry sequence number `len() + 1`.
    ///
    /// Returns the accepted sequence number. Existing snapshots are unaffected: if any are
    /// outstanding the backing vector is cloned before the push.
    pub fn append(&self, message: ChatMessage) -> Result<u64, GroupChatError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let expected = entries.len() as u64 + 1;
        if message.sequence != expected {
            return Err(GroupChatError::OutOfOrderAppend {
                expected,
                actual: message.sequence,
            });
        }

        let sequence = message.sequence;
        Arc::make_mut(&mut *entries).push(message.clone());
        // Sent under the write lock so subscribers see appends in sequence order.
        let _ = self.broadcaster.send(message);
        Ok(sequence)
    }

    /// Point-in-time view of the log.
    pub fn snapshot(&self) -> HistorySnapshot {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        HistorySnapshot {
            messages: Arc::clone(&*entries),
        }
    }

    /// Lazily filters the current contents. The returned view can be iterated any number of
    /// times and does not observe later appends.
    pub fn filter<P>(&self, predicate: P) -> FilteredMessages<P>
    where
        P: Fn(&ChatMessage) -> bool,
    {
        self.snapshot().filter(predicate)
    }

    /// Receives every message appended after this call, in sequence order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.broadcaster.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sequence number the next append must carry.
    pub fn next_sequence(&self) -> u64 {
        self.len() as u64 + 1
    }

    /// True while a snapshot still shares the committed messages, so the next append copies them.
    #[cfg(test)]
    pub(crate) fn is_shared(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Arc::strong_count(&*entries) > 1
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, cheaply cloneable view of a [`ChatHistory`] at one point in time.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    messages: Arc<Vec<ChatMessage>>,
}

impl HistorySnapshot {
    /// Builds a detached snapshot from already-sequenced messages.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Arc::new(messages),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first(&self) -> Option<&ChatMessage> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Looks a message up by its sequence number.
    pub fn get(&self, sequence: u64) -> Option<&ChatMessage> {
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.messages.get(index)
    }

    /// Number of agent turns recorded, i.e. every message after the seed.
    pub fn turns(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }

    /// Most recent message written by `author`.
    pub fn last_by(&self, author: &str) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.is_authored_by(author))
    }

    /// A copy of this snapshot with `message` appended, leaving `self` untouched.
    pub fn with_appended(&self, message: ChatMessage) -> HistorySnapshot {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.extend(self.messages.iter().cloned());
        messages.push(message);
        HistorySnapshot::from_messages(messages)
    }

    pub fn filter<P>(&self, predicate: P) -> FilteredMessages<P>
    where
        P: Fn(&ChatMessage) -> bool,
    {
        FilteredMessages {
            snapshot: self.clone(),
            predicate,
        }
    }
}

impl<'a> IntoIterator for &'a HistorySnapshot {
    type Item = &'a ChatMessage;
    type IntoIter = std::slice::Iter<'a, ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Restartable, lazily evaluated subset of a snapshot.
pub struct FilteredMessages<P> {
    snapshot: HistorySnapshot,
    predicate: P,
}

impl<P> FilteredMessages<P>
where
    P: Fn(&ChatMessage) -> bool,
{
    /// Starts a fresh pass over the matching messages, oldest first.
    pub fn iter(&self) -> FilteredIter<'_, P> {
        FilteredIter {
            inner: self.snapshot.iter(),
            predicate: &self.predicate,
        }
    }

    /// Most recent matching message.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.iter().next_back()
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a, P> IntoIterator for &'a FilteredMessages<P>
where
    P: Fn(&ChatMessage) -> bool,
{
    type Item = &'a ChatMessage;
    type IntoIter = FilteredIter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`FilteredMessages::iter`].
pub struct FilteredIter<'a, P> {
    inner: std::slice::Iter<'a, ChatMessage>,
    predicate: &'a P,
}

impl<'a, P> Iterator for FilteredIter<'a, P>
where
    P: Fn(&ChatMessage) -> bool,
{
    type Item = &'a ChatMessage;

    fn next(&mut self) -> Option<Self::Item> {
        let predicate = self.predicate;
        self.inner.find(|m| predicate(*m))
    }
}

impl<'a, P> DoubleEndedIterator for FilteredIter<'a, P>
where
    P: Fn(&ChatMessage) -> bool,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        let predicate = self.predicate;
        self.inner.rfind(|m| predicate(*m))
    }
}

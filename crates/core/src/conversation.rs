//! Conversation-related types.

use rewind_model::ModelMessage;

/// The ordered message history of an agent.
///
/// The first message is always the system message. Outside of this crate
/// the history is read-only; it only grows while a turn runs, and only
/// shrinks through [`Conversation::restore`] or [`Conversation::reset`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

/// A marker of the message count at some point of a conversation.
///
/// Always at least 1, since the system message is never rolled back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snapshot(pub(crate) usize);

impl Snapshot {
    /// Returns the message count this snapshot was taken at.
    #[inline]
    pub fn message_count(&self) -> usize {
        self.0
    }
}

impl Conversation {
    /// Creates a conversation that only holds the system message.
    #[inline]
    pub fn new<S: Into<String>>(system_prompt: S) -> Self {
        Self {
            messages: vec![ModelMessage::system(system_prompt)],
        }
    }

    /// Returns all messages, oldest first.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the number of messages, including the system message.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always `false`, a conversation has at least the system message.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, message: ModelMessage) {
        self.messages.push(message);
    }

    /// Takes a snapshot of the current length.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.messages.len())
    }

    /// Truncates the history back to `snapshot`.
    ///
    /// A snapshot larger than the current history is ignored.
    pub fn restore(&mut self, snapshot: Snapshot) {
        let len = snapshot.0.max(1);
        if len > self.messages.len() {
            warn!(
                "ignoring snapshot at {len}, history only has {} messages",
                self.messages.len()
            );
            return;
        }
        self.messages.truncate(len);
    }

    /// Drops everything but the system message.
    #[inline]
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }
}

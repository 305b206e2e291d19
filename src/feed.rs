use std::collections::VecDeque;

use crate::Message;

/// Transient display buffer of received messages, newest first.
///
/// Clearing it leaves the message store untouched.
#[derive(Debug)]
pub struct MessageFeed {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for MessageFeed {
    fn default() -> Self {
        MessageFeed::with_capacity(256)
    }
}

impl MessageFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds a message at the front, dropping the oldest one once full.
    pub fn push(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        if self.messages.len() == self.capacity {
            self.messages.pop_back();
        }
        self.messages.push_front(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

//! Send-side action queue.
//!
//! Local edits accumulate here between samples as minimally encoded actions.
//! `pre_action_text` is the text the peer already has, `post_action_text` is
//! the text after every queued action.

use crate::action::{Action, QueuedAction};
use crate::clock::{SharedClock, Timestamp};
use crate::diff::string_diff;
use crate::text::TextBuffer;

/// Called after every queued action.
pub type ActivityListener = Box<dyn FnMut() + Send>;

pub struct SendQueue {
    clock: SharedClock,
    actions: Vec<QueuedAction>,
    pre_action_text: TextBuffer,
    post_action_text: TextBuffer,
    last_action: Timestamp,
    new_message: bool,
    activity_listeners: Vec<ActivityListener>,
}

impl SendQueue {
    pub fn new(clock: SharedClock) -> Self {
        let last_action = clock.now();
        Self {
            clock,
            actions: Vec::new(),
            pre_action_text: TextBuffer::new(),
            post_action_text: TextBuffer::new(),
            last_action,
            new_message: true,
            activity_listeners: Vec::new(),
        }
    }

    pub fn add_activity_listener<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.activity_listeners.push(Box::new(listener));
        self
    }

    /// Queue an insert of `text` before `pos` (end of text when `None`).
    pub fn insert(&mut self, pos: Option<usize>, text: &str) -> &mut Self {
        let chars: Vec<char> = text.chars().collect();
        self.insert_chars(pos, &chars)
    }

    fn insert_chars(&mut self, pos: Option<usize>, chars: &[char]) -> &mut Self {
        let len = self.post_action_text.len();
        let insert_pos = pos.unwrap_or(len);
        if !chars.is_empty() {
            self.post_action_text.insert(insert_pos, chars);
        }
        self.push(Action::Insert {
            pos: if insert_pos == len { None } else { pos },
            text: chars.iter().collect(),
        })
    }

    /// Queue an erase of `count` code points ending at `pos`.
    pub fn erase(&mut self, pos: Option<usize>, count: Option<usize>) -> &mut Self {
        let len = self.post_action_text.len();
        let count = count.unwrap_or(1);
        let erase_pos = pos.unwrap_or(len);
        self.post_action_text
            .remove(erase_pos.saturating_sub(count), count);
        self.push(Action::Erase {
            pos: (erase_pos != len).then_some(erase_pos),
            count: (count != 1).then_some(count),
        })
    }

    /// Queue whatever erase and insert turn the current text into `target`.
    pub fn edit(&mut self, target: &str) -> &mut Self {
        let target = TextBuffer::from(target);
        let diff = string_diff(self.post_action_text.as_slice(), target.as_slice());
        if let Some(erase) = diff.erase {
            self.erase(Some(erase.pos), Some(erase.count));
        }
        if let Some(insert) = diff.insert {
            self.insert_chars(Some(insert.pos), &insert.text);
        }
        self
    }

    /// Commit the queued actions: the peer now has `post_action_text`.
    pub fn flush(&mut self) -> &mut Self {
        self.actions.clear();
        self.new_message = false;
        self.pre_action_text = self.post_action_text.clone();
        self
    }

    /// Drop everything and start a fresh message.
    pub fn clear(&mut self) -> &mut Self {
        self.actions.clear();
        self.pre_action_text.clear();
        self.post_action_text.clear();
        self.new_message = true;
        self
    }

    pub fn actions(&self) -> &[QueuedAction] {
        &self.actions
    }

    pub fn pre_action_text(&self) -> &TextBuffer {
        &self.pre_action_text
    }

    pub fn post_action_text(&self) -> &TextBuffer {
        &self.post_action_text
    }

    pub fn last_action_timestamp(&self) -> Timestamp {
        self.last_action
    }

    /// True until the first flush after construction or `clear`.
    pub fn is_new_message(&self) -> bool {
        self.new_message
    }

    fn push(&mut self, action: Action) -> &mut Self {
        let timestamp = self.clock.now();
        self.actions.push(QueuedAction { action, timestamp });
        self.last_action = timestamp;
        for listener in self.activity_listeners.iter_mut() {
            listener();
        }
        self
    }
}

impl std::fmt::Debug for SendQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendQueue")
            .field("actions", &self.actions)
            .field("pre_action_text", &self.pre_action_text.to_string())
            .field("post_action_text", &self.post_action_text.to_string())
            .field("last_action", &self.last_action)
            .field("new_message", &self.new_message)
            .finish()
    }
}

//! Message stream
//!
//! One chronologically ordered view per agreement, merging fetched history,
//! optimistic local sends and remote broadcasts. Reconciliation is exact:
//! every outbound message carries a client key, and the server's
//! confirmation or echo replaces the pending entry it matches. Entries are
//! rendered in local append order (receive order); the backend's persisted
//! history remains the only total order.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::model::{ChatMessage, DeliveryState};

/// Idle window after which an outbound typing-stop fires
pub const TYPING_IDLE_WINDOW: Duration = Duration::from_secs(3);

/// Remote typing announcements older than this are dropped from the roster
const TYPING_STALE_AFTER: Duration = Duration::from_secs(8);

/// Chronological chat view for one agreement
#[derive(Debug, Default)]
pub struct MessageStream {
    messages: Vec<ChatMessage>,
    unread: u32,
    panel_open: bool,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the fetched history, oldest first. Called once per session.
    pub fn load_history(&mut self, history: Vec<ChatMessage>) {
        self.messages = history;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn is_panel_open(&self) -> bool {
        self.panel_open
    }

    /// Optimistically append an outbound message before the durable write.
    pub fn stage(&mut self, message: ChatMessage) {
        debug_assert_eq!(message.delivery, DeliveryState::Sending);
        self.messages.push(message);
    }

    /// Replace the pending entry with the server-confirmed message,
    /// matched by client key.
    pub fn confirm(&mut self, confirmed: ChatMessage) {
        if let Some(entry) = self
            .messages
            .iter_mut()
            .find(|m| m.client_key == confirmed.client_key)
        {
            *entry = ChatMessage {
                delivery: DeliveryState::Delivered,
                ..confirmed
            };
        }
    }

    /// Mark a pending entry failed. The entry is kept and marked, never
    /// silently dropped.
    pub fn mark_failed(&mut self, client_key: uuid::Uuid) {
        if let Some(entry) = self.messages.iter_mut().find(|m| m.client_key == client_key) {
            entry.delivery = DeliveryState::Failed;
        }
    }

    /// Apply a broadcast message. The echo of a message this client sent
    /// (same client key) reconciles with the existing entry instead of
    /// inserting a duplicate, so a send plus its echo yields exactly one
    /// visible entry. Counterpart messages append; the unread counter
    /// moves only when the panel is closed.
    pub fn receive(&mut self, message: ChatMessage, local_user_id: &str) {
        if self.messages.iter().any(|m| m.client_key == message.client_key) {
            self.confirm(message);
            return;
        }
        let self_originated = message.sender_id == local_user_id;
        self.messages.push(ChatMessage {
            delivery: DeliveryState::Delivered,
            ..message
        });
        if !self.panel_open && !self_originated {
            self.unread += 1;
        }
    }

    /// Open the message panel; resets the unread counter.
    pub fn open_panel(&mut self) {
        self.panel_open = true;
        self.unread = 0;
    }

    pub fn close_panel(&mut self) {
        self.panel_open = false;
    }

    /// Beginning to type also clears the unread counter.
    pub fn note_local_typing(&mut self) {
        self.unread = 0;
    }
}

/// Outbound typing signal produced by the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Debounce for outbound typing announcements.
///
/// `typing-start` fires on the first keystroke after idle; `typing-stop`
/// fires once the idle window passes with no further keystrokes. Time is
/// injected so the debounce is testable without sleeping.
#[derive(Debug, Default)]
pub struct TypingDebounce {
    last_keystroke: Option<Instant>,
}

impl TypingDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a keystroke; returns `Start` when transitioning out of idle.
    pub fn on_keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let was_idle = match self.last_keystroke {
            None => true,
            Some(prev) => now.duration_since(prev) >= TYPING_IDLE_WINDOW,
        };
        self.last_keystroke = Some(now);
        was_idle.then_some(TypingSignal::Start)
    }

    /// Poll for the idle transition; returns `Stop` once, when the window
    /// has elapsed since the last keystroke.
    pub fn poll_idle(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.last_keystroke {
            Some(prev) if now.duration_since(prev) >= TYPING_IDLE_WINDOW => {
                self.last_keystroke = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }
}

/// Deduplicated who-is-typing roster for remote users
#[derive(Debug, Default)]
pub struct TypingRoster {
    // user id -> (display name, last announcement)
    typists: DashMap<String, (String, Instant)>,
}

impl TypingRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `user-typing` announcement. Re-announcements refresh the
    /// entry rather than duplicating it.
    pub fn note_typing(&self, user_id: &str, display_name: &str, now: Instant) {
        self.typists
            .insert(user_id.to_string(), (display_name.to_string(), now));
    }

    /// Record a `user-stopped-typing` announcement.
    pub fn note_stopped(&self, user_id: &str) {
        self.typists.remove(user_id);
    }

    /// Current typists' display names, stale entries expired. Sorted for a
    /// stable display.
    pub fn who_is_typing(&self, now: Instant) -> Vec<String> {
        self.typists
            .retain(|_, (_, seen)| now.duration_since(*seen) < TYPING_STALE_AFTER);
        let mut names: Vec<String> = self
            .typists
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect();
        names.sort();
        names
    }
}

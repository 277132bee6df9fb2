//! Lightweight non-verbal signals between actors.
//!
//! The router keeps two independent bounded collections: a history per
//! (sender, recipient) pair and an inbox per recipient. Acknowledging a
//! signal only removes it from the inbox.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::presence::{PresenceState, SocialContext};
use crate::types::{ActorId, BoundedLog};

/// Kind of signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// "Thinking of you."
    Nudge,
    /// A steady ambient glow.
    Glow,
    /// A heartbeat-like pulse.
    Pulse,
    /// A brief wave hello.
    Wave,
}

/// How visibly the recipient's device should render a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlowHint {
    /// Full visibility.
    Full,
    /// Reduced intensity; the recipient is busy.
    Dimmed,
    /// Most discreet rendering; safe mode requested.
    Discreet,
}

/// Pick the rendering for a signal.
///
/// Safe mode wins over everything; a busy recipient gets a dimmed
/// rendering; otherwise the signal is fully visible. An unknown recipient
/// presence is treated as not busy.
pub fn glow_hint(recipient: Option<&PresenceState>, partner_safe: bool) -> GlowHint {
    if partner_safe {
        GlowHint::Discreet
    } else if recipient.is_some_and(|p| p.social == SocialContext::Busy) {
        GlowHint::Dimmed
    } else {
        GlowHint::Full
    }
}

/// A routed signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal id.
    pub id: Uuid,
    /// Sender.
    pub sender: ActorId,
    /// Recipient.
    pub recipient: ActorId,
    /// Kind.
    pub kind: SignalKind,
    /// Optional short payload (emoji, colour, pattern name).
    pub payload: Option<String>,
    /// Rendering hint.
    pub glow: GlowHint,
    /// Send time.
    pub sent_at: DateTime<Utc>,
}

/// A signal about to be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingSignal {
    /// Sender.
    pub sender: ActorId,
    /// Recipient.
    pub recipient: ActorId,
    /// Kind.
    pub kind: SignalKind,
    /// Optional short payload.
    pub payload: Option<String>,
    /// Whether the sender asked for the most discreet rendering.
    pub partner_safe: bool,
}

impl OutgoingSignal {
    /// A signal with no payload and safe mode off.
    pub fn new(sender: ActorId, recipient: ActorId, kind: SignalKind) -> Self {
        Self {
            sender,
            recipient,
            kind,
            payload: None,
            partner_safe: false,
        }
    }
}

#[derive(Debug, Default)]
struct RouterState {
    history: HashMap<(ActorId, ActorId), BoundedLog<Signal>>,
    inboxes: HashMap<ActorId, BoundedLog<Signal>>,
}

/// Routes signals and keeps bounded history and inboxes.
#[derive(Debug)]
pub struct SignalRouter {
    state: Mutex<RouterState>,
    history_capacity: usize,
    inbox_capacity: usize,
}

impl SignalRouter {
    /// Create a router with the given per-pair history and per-inbox caps.
    pub fn new(history_capacity: usize, inbox_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
            history_capacity,
            inbox_capacity,
        }
    }

    /// Route a signal. `recipient_presence` drives the glow hint.
    pub fn send(
        &self,
        outgoing: OutgoingSignal,
        recipient_presence: Option<&PresenceState>,
        now: DateTime<Utc>,
    ) -> Signal {
        let signal = Signal {
            id: Uuid::new_v4(),
            glow: glow_hint(recipient_presence, outgoing.partner_safe),
            sender: outgoing.sender,
            recipient: outgoing.recipient,
            kind: outgoing.kind,
            payload: outgoing.payload,
            sent_at: now,
        };
        let (sender, recipient) = (&signal.sender, &signal.recipient);
        if let Ok(mut state) = self.state.lock() {
            let (history_cap, inbox_cap) = (self.history_capacity, self.inbox_capacity);
            state
                .history
                .entry((sender.clone(), recipient.clone()))
                .or_insert_with(|| BoundedLog::new(history_cap))
                .push(signal.clone());
            state
                .inboxes
                .entry(recipient.clone())
                .or_insert_with(|| BoundedLog::new(inbox_cap))
                .push(signal.clone());
        }
        tracing::debug!(
            sender = %sender,
            recipient = %recipient,
            kind = ?signal.kind,
            glow = ?signal.glow,
            "signal routed"
        );
        signal
    }

    /// Remove a signal from the recipient's inbox. History is untouched.
    ///
    /// Returns whether the signal was in the inbox.
    pub fn acknowledge(&self, recipient: &ActorId, signal_id: Uuid) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(inbox) = state.inboxes.get_mut(recipient) else {
            return false;
        };
        let before = inbox.len();
        inbox.retain(|s| s.id != signal_id);
        inbox.len() != before
    }

    /// Unacknowledged signals for `recipient`, oldest first.
    pub fn inbox(&self, recipient: &ActorId) -> Vec<Signal> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.inboxes.get(recipient).map(|i| i.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Signals sent from `sender` to `recipient`, oldest first.
    pub fn history(&self, sender: &ActorId, recipient: &ActorId) -> Vec<Signal> {
        self.state
            .lock()
            .ok()
            .and_then(|s| {
                s.history
                    .get(&(sender.clone(), recipient.clone()))
                    .map(|h| h.iter().cloned().collect())
            })
            .unwrap_or_default()
    }
}

//! Presence model: multi-dimensional availability snapshots and the
//! comparisons the access gates run against them.
//!
//! Two comparisons exist and they are deliberately different:
//! - [`matches`] is a directional requirement check (candidate vs required).
//! - [`resonance`] is a symmetric similarity score in `[0, 1]`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActorId, BoundedLog};

/// Number of dimensions contributing to [`resonance`].
const RESONANCE_DIMENSIONS: u8 = 5;

/// Current cognitive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveMode {
    /// Deep, single-task concentration.
    Focused,
    /// Open, wandering attention.
    Exploratory,
    /// Looking back, processing.
    Reflective,
    /// Generative, making things.
    Creative,
    /// Low engagement, recovering.
    Resting,
}

/// Current emotional tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTone {
    /// Settled and even.
    Calm,
    /// High energy, upbeat.
    Energized,
    /// Soft, open, vulnerable.
    Tender,
    /// Under strain.
    Tense,
    /// Light, joking.
    Playful,
}

/// Social context ordinal. Higher means more socially available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialContext {
    /// Occupied with others, interruptions unwelcome.
    Busy,
    /// Available only to close contacts.
    Reserved,
    /// Generally available.
    Available,
    /// Actively looking for contact.
    Inviting,
}

/// Communication bandwidth ordinal. Higher means more capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// Glances and signals only.
    Minimal,
    /// Short text.
    Low,
    /// Conversation.
    Medium,
    /// Full attention, calls and media.
    High,
}

/// What the actor intends to do. The three named flags take part in
/// matching; `extensions` is carried for collaborators but never compared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVector {
    /// Wants to work on something together.
    pub collaboration: bool,
    /// Wants to hear rather than talk.
    pub listening: bool,
    /// Wants to argue a point.
    pub debate: bool,
    /// Open extension flags.
    #[serde(default)]
    pub extensions: BTreeMap<String, bool>,
}

impl IntentVector {
    /// Whether the two vectors share at least one of the matched flags.
    pub fn intersects(&self, other: &IntentVector) -> bool {
        (self.collaboration && other.collaboration)
            || (self.listening && other.listening)
            || (self.debate && other.debate)
    }
}

/// A snapshot of an actor's availability at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    /// Cognitive mode.
    pub cognitive: CognitiveMode,
    /// Emotional tone.
    pub emotional: EmotionalTone,
    /// Intent flags.
    pub intent: IntentVector,
    /// Social context ordinal.
    pub social: SocialContext,
    /// Bandwidth ordinal.
    pub bandwidth: Bandwidth,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Whether `candidate` satisfies `required`.
///
/// Cognitive mode and emotional tone must be equal, intent must share a
/// matched flag, and social context and bandwidth must be at least the
/// required ordinal. Not symmetric.
pub fn matches(candidate: &PresenceState, required: &PresenceState) -> bool {
    candidate.cognitive == required.cognitive
        && candidate.emotional == required.emotional
        && candidate.intent.intersects(&required.intent)
        && candidate.social >= required.social
        && candidate.bandwidth >= required.bandwidth
}

/// Unweighted similarity: 0.2 per agreeing dimension, capped at 1.0.
pub fn resonance(a: &PresenceState, b: &PresenceState) -> f64 {
    let agreeing = [
        a.cognitive == b.cognitive,
        a.emotional == b.emotional,
        a.intent.intersects(&b.intent),
        a.social == b.social,
        a.bandwidth == b.bandwidth,
    ]
    .into_iter()
    .filter(|agrees| *agrees)
    .fold(0u8, |acc, _| acc.saturating_add(1));
    (f64::from(agreeing) / f64::from(RESONANCE_DIMENSIONS)).min(1.0)
}

#[derive(Debug)]
struct ActorPresence {
    current: PresenceState,
    history: BoundedLog<PresenceState>,
}

/// Per-actor presence table: the current state plus a capped history.
///
/// Each write replaces the current state outright and archives it.
#[derive(Debug)]
pub struct PresenceTable {
    actors: Mutex<HashMap<ActorId, ActorPresence>>,
    history_capacity: usize,
}

impl PresenceTable {
    /// Create an empty table retaining `history_capacity` snapshots per actor.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            actors: Mutex::new(HashMap::new()),
            history_capacity,
        }
    }

    /// Replace the actor's presence and archive the new snapshot.
    pub fn update(&self, actor: &ActorId, state: PresenceState) {
        let Ok(mut actors) = self.actors.lock() else {
            tracing::error!(actor = %actor, "presence table lock poisoned, update dropped");
            return;
        };
        let capacity = self.history_capacity;
        let entry = actors
            .entry(actor.clone())
            .or_insert_with(|| ActorPresence {
                current: state.clone(),
                history: BoundedLog::new(capacity),
            });
        entry.history.push(state.clone());
        entry.current = state;
    }

    /// The actor's current presence, if any has been recorded.
    pub fn current(&self, actor: &ActorId) -> Option<PresenceState> {
        let actors = self.actors.lock().ok()?;
        actors.get(actor).map(|p| p.current.clone())
    }

    /// Archived snapshots for the actor, oldest first.
    pub fn history(&self, actor: &ActorId) -> Vec<PresenceState> {
        let Ok(actors) = self.actors.lock() else {
            return Vec::new();
        };
        actors
            .get(actor)
            .map(|p| p.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resonance between two actors' current states, if both are known.
    pub fn resonance_between(&self, a: &ActorId, b: &ActorId) -> Option<f64> {
        let actors = self.actors.lock().ok()?;
        let left = actors.get(a)?;
        let right = actors.get(b)?;
        Some(resonance(&left.current, &right.current))
    }
}

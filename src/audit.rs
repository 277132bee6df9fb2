//! Audit trail for security-relevant events.
//!
//! Entries are kept in a bounded in-memory ring so recording never touches
//! disk inside the decision path. The host drains the ring and persists it
//! with [`AuditTrail::write_jsonl`] on its own schedule.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::BoundedLog;

/// Audit event type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A resource was registered.
    ResourceProtected,
    /// An access decision was made.
    AccessDecision,
    /// A resource was destroyed on expiry or revoke.
    ResourcePurged,
    /// The seal was engaged or released.
    SealTransition,
    /// A ritual session resolved.
    RitualResolved,
    /// A key bundle was issued or re-issued.
    BundleIssued,
}

/// A single structured audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the event happened, in engine time.
    pub timestamp: DateTime<Utc>,
    /// Event type.
    pub event_type: AuditEventType,
    /// Event-specific fields.
    pub details: serde_json::Value,
}

/// Bounded audit ring.
#[derive(Debug)]
pub struct AuditTrail {
    entries: Mutex<BoundedLog<AuditEntry>>,
}

impl AuditTrail {
    /// Create a trail retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BoundedLog::new(capacity)),
        }
    }

    /// Record an event. Never fails; a poisoned ring drops the entry.
    pub fn record(&self, event_type: AuditEventType, at: DateTime<Utc>, details: serde_json::Value) {
        let entry = AuditEntry {
            timestamp: at,
            event_type,
            details,
        };
        match self.entries.lock() {
            Ok(mut entries) => {
                if entries.push(entry).is_some() {
                    tracing::trace!("audit ring full, oldest entry evicted");
                }
            }
            Err(_) => tracing::error!(?event_type, "audit ring poisoned, entry dropped"),
        }
    }

    /// Copy of the retained entries, oldest first.
    pub fn recent(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every retained entry.
    pub fn drain(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|mut e| e.drain()).unwrap_or_default()
    }

    /// Write entries as JSON lines.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_jsonl(entries: &[AuditEntry], writer: &mut dyn Write) -> anyhow::Result<()> {
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }
}

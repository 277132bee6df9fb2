//! Configuration loading and validation.
//!
//! Every section of `config.toml` is optional. Missing sections and fields
//! fall back to the defaults below, so an empty file is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::vault::keys::KeyMixing;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Presence table settings.
    pub presence: PresenceConfig,
    /// Key vault settings.
    pub vault: VaultConfig,
    /// Security lockdown settings.
    pub lockdown: LockdownConfig,
    /// Ritual unlock settings.
    pub ritual: RitualConfig,
    /// Signal router settings.
    pub signals: SignalsConfig,
    /// Temporal gate and sweeper settings.
    pub temporal: TemporalConfig,
    /// Audit trail settings.
    pub audit: AuditConfig,
}

/// Presence table settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Presence snapshots retained per actor.
    pub history_capacity: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_presence_history(),
        }
    }
}

/// Key vault settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VaultConfig {
    /// How two keys are mixed when a shard is bound to both.
    pub key_mixing: KeyMixing,
}

/// Security lockdown settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockdownConfig {
    /// Failed attempts that trigger an automatic seal.
    pub failure_threshold: u32,
    /// Seconds a seal stays active before auto-release.
    pub seal_duration_secs: u64,
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            seal_duration_secs: default_seal_duration(),
        }
    }
}

impl LockdownConfig {
    /// Seal duration as a chrono duration.
    pub fn seal_duration(&self) -> chrono::Duration {
        secs_to_chrono(self.seal_duration_secs)
    }
}

/// Ritual unlock settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RitualConfig {
    /// Minimum sensor confidence needed to move from listening to processing.
    pub confidence_threshold: f64,
    /// Seconds a listening session waits for a sensor reading.
    pub listen_timeout_secs: u64,
    /// Unlock sessions retained in the session log.
    pub session_capacity: usize,
    /// Seconds a granted ritual satisfies a ritual shard.
    pub grant_ttl_secs: u64,
}

impl Default for RitualConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            listen_timeout_secs: default_listen_timeout(),
            session_capacity: default_session_capacity(),
            grant_ttl_secs: default_grant_ttl(),
        }
    }
}

impl RitualConfig {
    /// Listening timeout as a std duration.
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    /// Grant lifetime as a chrono duration.
    pub fn grant_ttl(&self) -> chrono::Duration {
        secs_to_chrono(self.grant_ttl_secs)
    }
}

/// Signal router settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// Signals retained per (sender, recipient) pair.
    pub history_capacity: usize,
    /// Unacknowledged signals retained per recipient.
    pub inbox_capacity: usize,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_signal_history(),
            inbox_capacity: default_signal_history(),
        }
    }
}

/// Temporal gate and sweeper settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Window used by the "expiring soon" query.
    pub expiring_soon_secs: u64,
    /// Seconds between background expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Purged resource ids remembered for denial reporting.
    pub tombstone_capacity: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            expiring_soon_secs: default_expiring_soon(),
            sweep_interval_secs: default_sweep_interval(),
            tombstone_capacity: default_tombstone_capacity(),
        }
    }
}

impl TemporalConfig {
    /// Sweep interval as a std duration. Never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Expiring-soon window as a chrono duration.
    pub fn expiring_soon(&self) -> chrono::Duration {
        secs_to_chrono(self.expiring_soon_secs)
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Audit events retained before the oldest is evicted.
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
        }
    }
}

// Default value functions for serde

fn default_presence_history() -> usize {
    100
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_seal_duration() -> u64 {
    300
}
fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_listen_timeout() -> u64 {
    30
}
fn default_session_capacity() -> usize {
    256
}
fn default_grant_ttl() -> u64 {
    120
}
fn default_signal_history() -> usize {
    200
}
fn default_expiring_soon() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_tombstone_capacity() -> usize {
    1024
}
fn default_audit_capacity() -> usize {
    1000
}

fn secs_to_chrono(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl Config {
    /// Reject values that would make the engine unsound.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lockdown.failure_threshold == 0 {
            anyhow::bail!("lockdown.failure_threshold must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.ritual.confidence_threshold) {
            anyhow::bail!(
                "ritual.confidence_threshold must be within [0, 1], got {}",
                self.ritual.confidence_threshold
            );
        }
        let capacities = [
            ("presence.history_capacity", self.presence.history_capacity),
            ("ritual.session_capacity", self.ritual.session_capacity),
            ("signals.history_capacity", self.signals.history_capacity),
            ("signals.inbox_capacity", self.signals.inbox_capacity),
            ("temporal.tombstone_capacity", self.temporal.tombstone_capacity),
            ("audit.capacity", self.audit.capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                anyhow::bail!("{name} must be at least 1");
            }
        }
        Ok(())
    }

    /// Render the config as TOML, used by `quietkey init`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).map_err(|e| anyhow::anyhow!("failed to render config: {e}"))
    }
}

/// Load and validate the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the default config directory (`~/.quietkey/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".quietkey"))
}

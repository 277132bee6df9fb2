//! quietkey host CLI.
//!
//! `init` writes a default config, `check` validates one, `issue` prints a
//! key bundle summary, `demo` walks the expiry and seal scenarios, and
//! `start` runs the expiry sweeper until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use quietkey::audit::AuditTrail;
use quietkey::config::{config_dir, load_config, Config};
use quietkey::lockdown::SealTrigger;
use quietkey::policy::{
    AccessPolicyEngine, AccessRequest, GatingEnvelope, ResourceKind, ResourceRecord, ShardProofs,
};
use quietkey::repository::{InMemoryRepository, Repository};
use quietkey::ritual::{RitualCredential, RitualSensor, SensorError, SensorReading};
use quietkey::sweeper::ExpirySweeper;
use quietkey::types::{ActorId, RitualKind};
use quietkey::vault::shard::ShardRequirement;

#[derive(Parser)]
#[command(name = "quietkey", version, about = "Presence-gated access control engine")]
struct Cli {
    /// Config file. Defaults to ~/.quietkey/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Validate a config file.
    Check,
    /// Issue a key bundle and print its public summary.
    Issue {
        /// Identity to issue the bundle for.
        #[arg(long)]
        identity: String,
    },
    /// Run the expiry and seal scenarios against a fresh engine.
    Demo,
    /// Run the expiry sweeper until Ctrl-C.
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.toml"),
    };

    match cli.command {
        Command::Init { force } => {
            quietkey::logging::init_cli();
            cmd_init(&config_path, force)
        }
        Command::Check => {
            quietkey::logging::init_cli();
            cmd_check(&config_path)
        }
        Command::Issue { identity } => {
            quietkey::logging::init_cli();
            cmd_issue(resolve_config(&config_path)?, &identity)
        }
        Command::Demo => {
            quietkey::logging::init_cli();
            cmd_demo(resolve_config(&config_path)?).await
        }
        Command::Start => cmd_start(resolve_config(&config_path)?).await,
    }
}

/// Load the config if the file exists, otherwise fall back to defaults.
fn resolve_config(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = Config::default().to_toml()?;
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("config ok: {}", path.display());
    println!(
        "  seal after {} failures for {}s",
        config.lockdown.failure_threshold, config.lockdown.seal_duration_secs
    );
    println!(
        "  ritual threshold {} listen timeout {}s",
        config.ritual.confidence_threshold, config.ritual.listen_timeout_secs
    );
    println!("  key mixing {:?}", config.vault.key_mixing);
    Ok(())
}

fn cmd_issue(config: Config, identity: &str) -> Result<()> {
    let engine = AccessPolicyEngine::new(config);
    let bundle = engine.issue_bundle(identity)?;
    println!("identity:   {}", bundle.identity);
    println!("alias:      {}", bundle.alias);
    println!("generation: {}", bundle.generation);
    for shard in bundle.shards() {
        println!("  shard {} -> {}", shard.index, shard.requirement);
    }
    Ok(())
}

fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    Duration::try_seconds(secs)
        .and_then(|d| base.checked_add_signed(d))
        .unwrap_or(base)
}

/// Sensor that always hears something, but never confidently.
struct MumblingSensor;

#[async_trait]
impl RitualSensor for MumblingSensor {
    async fn capture(&self, _kind: RitualKind) -> Result<SensorReading, SensorError> {
        Ok(SensorReading {
            confidence: 0.4,
            is_match: true,
            timestamp: Utc::now(),
        })
    }
}

async fn cmd_demo(config: Config) -> Result<()> {
    let seal_secs = i64::try_from(config.lockdown.seal_duration_secs).unwrap_or(i64::MAX);
    let engine = AccessPolicyEngine::new(config);
    let alice = ActorId::new("alice");
    engine.issue_bundle(alice.as_str())?;
    let t0 = Utc::now();

    println!("-- expiry --");
    let note = engine.protect(
        &alice,
        ResourceKind::Message {
            thread: "demo".to_owned(),
        },
        b"this message self-destructs",
        GatingEnvelope::new(vec![ShardRequirement::Device]).expires_at(at(t0, 60)),
        t0,
    )?;
    for offset in [30, 61, 90] {
        let req = AccessRequest::new(alice.clone(), note.id, at(t0, offset))
            .with_proofs(ShardProofs::all());
        println!("t+{offset}s: {:?}", engine.can_access(&req));
    }

    println!("-- seal --");
    let room = engine.protect(
        &alice,
        ResourceKind::Room {
            name: "den".to_owned(),
        },
        b"welcome in",
        GatingEnvelope::new(vec![ShardRequirement::Device]),
        t0,
    )?;
    engine.enroll_ritual(room.id, RitualKind::Whisper, &RitualCredential::new("hush"))?;
    for attempt in 1..=3 {
        let outcome = engine
            .listen_for_ritual(
                room.id,
                RitualKind::Whisper,
                &MumblingSensor,
                Some(RitualCredential::new("hush")),
                std::future::pending(),
            )
            .await?;
        println!("ritual attempt {attempt}: {outcome:?}");
    }
    let sealed_at = engine
        .seal_status(Utc::now())
        .active
        .then(Utc::now)
        .unwrap_or(t0);
    let req = |when| {
        AccessRequest::new(alice.clone(), room.id, when).with_proofs(ShardProofs::all())
    };
    println!("sealed: {:?}", engine.can_access(&req(sealed_at)));
    match engine.unseal(sealed_at) {
        Ok(_) => println!("unseal: accepted"),
        Err(e) => println!("unseal: {e}"),
    }
    let released = at(sealed_at, seal_secs.saturating_add(1));
    println!("after seal window: {:?}", engine.can_access(&req(released)));

    engine.seal(SealTrigger::Manual, released)?;
    println!(
        "manual seal: {:?}",
        engine.seal_status(released).reason.unwrap_or_default()
    );
    Ok(())
}

async fn cmd_start(config: Config) -> Result<()> {
    let logs_dir = quietkey::logging::default_logs_dir()?;
    let _guard = quietkey::logging::init_production(&logs_dir)?;

    let engine = Arc::new(AccessPolicyEngine::new(config));
    let records: Arc<dyn Repository<ResourceRecord>> = Arc::new(InMemoryRepository::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(Arc::clone(&engine))
        .with_repository(records)
        .spawn(shutdown_rx);

    info!("quietkey started -- press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    sweeper.await.context("sweeper task failed")?;

    let audit = engine.audit().drain();
    let audit_path = logs_dir.join("audit.jsonl");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&audit_path)
        .with_context(|| format!("failed to open {}", audit_path.display()))?;
    AuditTrail::write_jsonl(&audit, &mut file)?;
    info!(entries = audit.len(), path = %audit_path.display(), "audit trail flushed");
    Ok(())
}

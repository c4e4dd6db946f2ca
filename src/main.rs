//! wdl-bot: binary entrypoint.
//! Reads JSON-lines platform events on stdin, runs them through the
//! moderation engine and writes the resulting platform actions to stdout.
//! Logs go to stderr.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wdl_bot::decision::anon_id;
use wdl_bot::error::DeliveryError;
use wdl_bot::state::persist::{save_logged, spawn_periodic, FileSink, Slot};
use wdl_bot::{dispatch, BotConfig, InboundEvent, ModerationEngine, Platform, StateStore};

/// `LOG_FORMAT=json` switches to structured logs; compact text otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().compact().with_writer(std::io::stderr)))
        .init();
}

/// Emits each platform action as one JSON line for the platform adapter.
struct StdoutPlatform;

impl StdoutPlatform {
    fn emit(&self, action: serde_json::Value) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(&action).map_err(|e| DeliveryError::Transport(e.to_string()))?;
        println!("{line}");
        Ok(())
    }
}

#[async_trait]
impl Platform for StdoutPlatform {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError> {
        self.emit(json!({"action": "send", "channel_id": channel_id, "text": text}))
    }

    async fn ban(&self, actor_id: &str, purge_secs: i64, reason: &str) -> Result<(), DeliveryError> {
        self.emit(json!({"action": "ban", "actor_id": actor_id, "purge_secs": purge_secs, "reason": reason}))
    }

    async fn kick(&self, actor_id: &str, reason: &str) -> Result<(), DeliveryError> {
        self.emit(json!({"action": "kick", "actor_id": actor_id, "reason": reason}))
    }

    async fn audit(&self, text: &str) -> Result<(), DeliveryError> {
        self.emit(json!({"action": "audit", "text": text}))
    }
}

async fn handle_line(engine: &ModerationEngine, platform: &StdoutPlatform, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let event: InboundEvent = match serde_json::from_str(line) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(target: "ingest", line_id = %anon_id(line), error = %e, "skipping malformed event");
            return;
        }
    };
    if let Some(outcome) = engine.handle_event(&event) {
        if !outcome.is_empty() {
            dispatch(platform, &outcome).await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Some(addr) = wdl_bot::metrics::init_from_env()? {
        info!(%addr, "prometheus exporter listening");
    }

    let cfg = BotConfig::load_default().context("loading bot config")?;
    let paths = cfg.state_paths();
    let (store, source) = StateStore::load(&paths);
    let store = Arc::new(store);
    info!(?source, actors = store.read(|s| s.actors.len()), "state loaded");

    let engine = Arc::new(ModerationEngine::from_config(&cfg, store.clone()).context("loading rules")?);

    let sink = Arc::new(FileSink::new(paths));
    let p = &cfg.persistence;
    let tasks = [
        spawn_periodic(store.clone(), sink.clone(), Slot::Primary, Duration::from_secs(p.save_interval_secs)),
        spawn_periodic(store.clone(), sink.clone(), Slot::Backup, Duration::from_secs(p.backup_interval_secs)),
        engine.clone().spawn_prune_task(Duration::from_secs(p.prune_interval_secs)),
    ];

    let platform = StdoutPlatform;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => handle_line(&engine, &platform, &line).await,
                None => {
                    info!("input closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    for task in &tasks {
        task.abort();
    }
    save_logged(&store, sink.as_ref(), Slot::Primary).await;
    save_logged(&store, sink.as_ref(), Slot::Backup).await;
    info!("final state written");
    Ok(())
}

//! musterd — Muster presence daemon.
//!
//! ```text
//! musterd [type]          advertise, then log peers as they come and go
//! musterd find <type>     wait for the first peer of <type>, print it, exit
//! ```
//!
//! Identity comes from the config file and `MUSTER_*` overrides. A missing id
//! is replaced with a random one for the lifetime of the process.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::RngCore;
use tokio::sync::mpsc;

use muster_core::filter::TypeFilter;
use muster_core::MusterConfig;
use muster_presence::{MulticastTransport, PresenceEvent, PresenceService};

const DEFAULT_TYPE: &str = "musterd";

enum Mode {
    Run,
    Find(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MusterConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MusterConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MusterConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let mode = match args.next().as_deref() {
        Some("find") => Mode::Find(args.next().context("usage: musterd find <type>")?),
        Some(kind) => {
            config.identity.kind = kind.to_string();
            Mode::Run
        }
        None => Mode::Run,
    };
    if config.identity.id.is_empty() {
        config.identity.id = random_id();
    }
    if config.identity.kind.is_empty() {
        config.identity.kind = DEFAULT_TYPE.to_string();
    }

    let service = PresenceService::new(&config, Arc::new(MulticastTransport))
        .context("invalid configuration")?;
    let settings = service.settings();
    tracing::info!(
        id = %settings.identity.id,
        kind = %settings.identity.kind,
        group = %settings.endpoint.address,
        port = settings.endpoint.port,
        period_ms = settings.timing.period.as_millis() as u64,
        timeout_ms = settings.timing.timeout.as_millis() as u64,
        "musterd starting"
    );

    let result = match mode {
        Mode::Run => run(&service).await,
        Mode::Find(kind) => find(&service, kind).await,
    };
    service.close();
    result
}

/// Advertise until ctrl-c, writing one JSON line per lifecycle event.
async fn run(service: &PresenceService) -> Result<()> {
    let (event_tx, mut events) = mpsc::unbounded_channel::<PresenceEvent>();
    service.add_listener(Arc::new(event_tx));

    service
        .open()
        .await
        .context("failed to open presence service")?;

    let mut snapshot = tokio::time::interval(service.settings().timing.timeout);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                return Ok(());
            }
            Some(event) = events.recv() => {
                println!("{}", event_line(&event)?);
            }
            _ = snapshot.tick() => {
                let peers = service.peers();
                tracing::info!(count = peers.len(), "peer table snapshot");
                for peer in &peers {
                    tracing::info!(peer = %peer, "  peer");
                }
            }
        }
    }
}

/// Wait for the first peer of `kind` and print it as JSON.
async fn find(service: &PresenceService, kind: String) -> Result<()> {
    service
        .open()
        .await
        .context("failed to open presence service")?;

    let pending = service.find_peer(TypeFilter::new(kind.clone()));
    tracing::info!(kind = %kind, "waiting for peer");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted before a peer was found");
            Ok(())
        }
        found = pending => {
            let peer = found.context("lookup abandoned")?;
            println!("{}", serde_json::to_string_pretty(&peer)?);
            Ok(())
        }
    }
}

fn event_line(event: &PresenceEvent) -> Result<String> {
    let name = match event {
        PresenceEvent::Connected(_) => "connected",
        PresenceEvent::Active(_) => "active",
        PresenceEvent::Inactive(_) => "inactive",
        PresenceEvent::Disconnected(_) => "disconnected",
    };
    let line = serde_json::json!({ "event": name, "peer": event.peer() });
    Ok(serde_json::to_string(&line)?)
}

fn random_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

//! Muster integration test harness.
//!
//! Whole presence services talking to each other. Everything except the
//! multicast module runs over an in-process [`MemoryHub`] on Tokio's paused
//! clock, so timeouts elapse instantly and deterministically:
//!
//!   cargo test --test integration
//!
//! The multicast tests are ignored by default; they need a host that routes
//! multicast on loopback:
//!
//!   cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use muster_core::{Descriptor, MusterConfig, Status};
use muster_presence::{MemoryHub, PresenceEvent, PresenceService};
use tokio::sync::mpsc;

mod discovery;
mod lifecycle;
mod lookup;
mod multicast;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Heartbeat period used by every in-process test.
pub const PERIOD: Duration = Duration::from_millis(10);
/// Presence timeout used by every in-process test.
pub const TIMEOUT: Duration = Duration::from_millis(50);

pub fn config(id: &str, kind: &str) -> MusterConfig {
    let mut config = MusterConfig::default();
    config.presence.period_ms = PERIOD.as_millis() as u64;
    config.presence.timeout_ms = TIMEOUT.as_millis() as u64;
    config.identity = Descriptor::new(id, kind);
    config
}

/// A closed service of `kind` on `hub`.
pub fn service(hub: &MemoryHub, id: &str, kind: &str) -> PresenceService {
    PresenceService::new(&config(id, kind), Arc::new(hub.clone())).unwrap()
}

/// Subscribe to `service`'s lifecycle events.
pub fn events(service: &PresenceService) -> mpsc::UnboundedReceiver<PresenceEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    service.add_listener(Arc::new(tx));
    rx
}

/// Everything received so far as `(peer id, status)` pairs.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<PresenceEvent>) -> Vec<(String, Status)> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| (e.peer().id().to_string(), e.peer().status()))
        .collect()
}

pub fn ids(service: &PresenceService) -> Vec<String> {
    service.peers().iter().map(|p| p.id().to_string()).collect()
}

/// Let the paused clock run for `d`, then wait for every registry to catch up.
pub async fn settle(d: Duration, services: &[&PresenceService]) {
    tokio::time::sleep(d).await;
    for s in services {
        s.registry().sync().await;
    }
}

//! Presence registry — the per-peer lifecycle state machine.
//!
//! Heartbeats and timer firings are funnelled through one executor task, so
//! transitions for a given id are applied strictly in queue order:
//!
//! | current  | trigger          | next         | emitted            |
//! |----------|------------------|--------------|--------------------|
//! | (none)   | heartbeat        | Active       | Connected, Active  |
//! | Active   | heartbeat        | Active       | —                  |
//! | Active   | deactivate timer | Inactive     | Inactive           |
//! | Inactive | heartbeat        | Active       | Active             |
//! | Inactive | disconnect timer | (removed)    | Disconnected       |
//!
//! Every transition bumps a generation stored on the entry. A timer carries
//! the generation it was armed with; one that reaches the queue after its
//! entry moved on is stale and does nothing. Whichever of a heartbeat and a
//! timer reaches the queue first wins.
//!
//! [`PresenceRegistry::clear`] also discards heartbeats queued before it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use muster_core::wire::{decode_heartbeat, WireError, HEARTBEAT_CHANNEL};
use muster_core::{Descriptor, DescriptorError, Peer, Status};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::listener::{ListenerId, PresenceEvent, PresenceListener};

/// A message that should never have reached the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message on unexpected channel {0:?}")]
    UnexpectedChannel(String),
    #[error("undecodable heartbeat: {0}")]
    Malformed(#[from] WireError),
}

/// Shared handle to one registry. Cheap to clone.
///
/// Must be created inside a Tokio runtime: construction spawns the executor.
#[derive(Clone)]
pub struct PresenceRegistry {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

struct Shared {
    self_id: String,
    timeout: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    table: PresenceTable,
    listeners: Vec<(ListenerId, Arc<dyn PresenceListener>)>,
    next_listener: u64,
    /// Bumped by `clear`.
    epoch: u64,
}

enum Command {
    Heartbeat { descriptor: Descriptor, epoch: u64 },
    Expire { id: String, generation: u64 },
    Sync(oneshot::Sender<()>),
}

impl PresenceRegistry {
    /// `self_id` heartbeats are ignored. `timeout` is the silence allowed
    /// before each of the two downward transitions.
    pub fn new(self_id: impl Into<String>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            self_id: self_id.into(),
            timeout,
            state: Mutex::new(State::default()),
        });

        tokio::spawn(run_executor(shared.clone(), rx, tx.downgrade()));

        Self {
            shared,
            commands: tx,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.shared.self_id
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Queue a heartbeat for the executor. Self-originated ones are dropped here.
    pub fn on_heartbeat(&self, descriptor: Descriptor) {
        if descriptor.id == self.shared.self_id {
            tracing::trace!("ignoring own heartbeat");
            return;
        }
        let epoch = self.lock().epoch;
        self.send(Command::Heartbeat { descriptor, epoch });
    }

    /// Check the channel, decode the payload and queue the heartbeat.
    pub fn handle_message(&self, channel: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        if channel != HEARTBEAT_CHANNEL {
            return Err(ProtocolError::UnexpectedChannel(channel.to_string()));
        }
        let descriptor = decode_heartbeat(payload)?;
        self.on_heartbeat(descriptor);
        Ok(())
    }

    /// Snapshot of every tracked peer, ordered by id. Never contains a
    /// disconnected peer.
    pub fn peers(&self) -> Vec<Peer> {
        self.lock().table.snapshot()
    }

    pub fn peer(&self, id: &str) -> Option<Peer> {
        self.lock().table.entries.get(id).map(|e| e.peer.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_listener(&self, listener: Arc<dyn PresenceListener>) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, listener));
        id
    }

    /// Returns false if `id` was not registered. Safe to call from inside a
    /// callback; the current fan-out still completes with its snapshot.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(lid, _)| *lid != id);
        before != state.listeners.len()
    }

    /// Forget every peer and cancel every timer. No events are emitted.
    pub fn clear(&self) {
        let removed = {
            let mut state = self.lock();
            state.epoch += 1;
            state.table.clear()
        };
        tracing::debug!(removed, "presence registry cleared");
    }

    /// Resolves once every command queued before this call has been applied
    /// and its events delivered.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Sync(tx));
        let _ = rx.await;
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("presence executor is gone, dropping command");
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking listener never runs under this lock, so poisoning only
        // means a panic mid-mutation elsewhere; the table is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

/// Apply commands one at a time until every registry handle is dropped.
async fn run_executor(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    timers: mpsc::WeakUnboundedSender<Command>,
) {
    while let Some(command) = commands.recv().await {
        let (events, listeners) = {
            let mut state = shared.lock();
            let step = match command {
                Command::Heartbeat { epoch, .. } if epoch != state.epoch => {
                    tracing::trace!("dropping heartbeat queued before clear");
                    continue;
                }
                Command::Heartbeat { descriptor, .. } => match state.table.heartbeat(descriptor) {
                    Ok(step) => step,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping invalid heartbeat");
                        continue;
                    }
                },
                Command::Expire { id, generation } => state.table.expire(&id, generation),
                Command::Sync(done) => {
                    let _ = done.send(());
                    continue;
                }
            };

            if let Some(generation) = step.arm {
                let handle = spawn_timer(&timers, step.id.clone(), generation, shared.timeout);
                state.table.set_timer(&step.id, handle);
            }

            if step.events.is_empty() {
                continue;
            }
            let listeners: Vec<_> = state.listeners.iter().map(|(_, l)| l.clone()).collect();
            (step.events, listeners)
        };

        for event in &events {
            log_event(event);
            for listener in &listeners {
                event.dispatch(listener.as_ref());
            }
        }
    }

    tracing::debug!("presence executor stopped");
}

fn spawn_timer(
    commands: &mpsc::WeakUnboundedSender<Command>,
    id: String,
    generation: u64,
    delay: Duration,
) -> JoinHandle<()> {
    let commands = commands.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(tx) = commands.upgrade() {
            let _ = tx.send(Command::Expire { id, generation });
        }
    })
}

fn log_event(event: &PresenceEvent) {
    let peer = event.peer();
    match event {
        PresenceEvent::Connected(_) => {
            tracing::info!(peer = %peer.id(), kind = %peer.kind(), "peer connected")
        }
        PresenceEvent::Active(_) => tracing::debug!(peer = %peer.id(), "peer active"),
        PresenceEvent::Inactive(_) => tracing::info!(peer = %peer.id(), "peer inactive"),
        PresenceEvent::Disconnected(_) => tracing::info!(peer = %peer.id(), "peer disconnected"),
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

struct Entry {
    /// Latest snapshot; status is Active or Inactive.
    peer: Peer,
    generation: u64,
    /// Deactivate timer while Active, disconnect timer while Inactive.
    timer: Option<JoinHandle<()>>,
}

/// Outcome of one command: events to fan out, and the generation of the
/// timer to arm for `id`, if any.
#[derive(Debug, Default)]
struct Step {
    id: String,
    events: Vec<PresenceEvent>,
    arm: Option<u64>,
}

#[derive(Default)]
struct PresenceTable {
    entries: HashMap<String, Entry>,
    generation: u64,
}

impl PresenceTable {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn heartbeat(&mut self, descriptor: Descriptor) -> Result<Step, DescriptorError> {
        let peer = Peer::new(descriptor, Status::Active)?;
        let id = peer.id().to_string();
        let generation = self.next_generation();

        let events = match self.entries.get_mut(&id) {
            None => {
                let events = vec![
                    PresenceEvent::Connected(peer.with_status(Status::Connected)),
                    PresenceEvent::Active(peer.clone()),
                ];
                self.entries.insert(
                    id.clone(),
                    Entry {
                        peer,
                        generation,
                        timer: None,
                    },
                );
                events
            }
            Some(entry) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                let was_active = entry.peer.status() == Status::Active;
                entry.peer = peer.clone();
                entry.generation = generation;
                if was_active {
                    Vec::new()
                } else {
                    vec![PresenceEvent::Active(peer)]
                }
            }
        };

        Ok(Step {
            id,
            events,
            arm: Some(generation),
        })
    }

    fn expire(&mut self, id: &str, generation: u64) -> Step {
        let current = self.entries.get(id).map(|e| (e.generation, e.peer.status()));
        let step = Step {
            id: id.to_string(),
            ..Step::default()
        };

        match current {
            Some((g, Status::Active)) if g == generation => {
                let next = self.next_generation();
                let Some(entry) = self.entries.get_mut(id) else {
                    return step;
                };
                entry.peer = entry.peer.with_status(Status::Inactive);
                entry.generation = next;
                entry.timer = None;
                Step {
                    events: vec![PresenceEvent::Inactive(entry.peer.clone())],
                    arm: Some(next),
                    ..step
                }
            }
            Some((g, Status::Inactive)) if g == generation => {
                let Some(entry) = self.entries.remove(id) else {
                    return step;
                };
                Step {
                    events: vec![PresenceEvent::Disconnected(
                        entry.peer.with_status(Status::Disconnected),
                    )],
                    ..step
                }
            }
            _ => {
                tracing::debug!(peer = id, generation, "stale presence timer");
                step
            }
        }
    }

    fn set_timer(&mut self, id: &str, handle: JoinHandle<()>) {
        match self.entries.get_mut(id) {
            Some(entry) => {
                if let Some(old) = entry.timer.replace(handle) {
                    old.abort();
                }
            }
            None => handle.abort(),
        }
    }

    fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.entries.values().map(|e| e.peer.clone()).collect();
        peers.sort_by(|a, b| a.id().cmp(b.id()));
        peers
    }

    fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        for (_, entry) in self.entries.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
        removed
    }
}

impl Drop for PresenceTable {
    fn drop(&mut self) {
        self.clear();
    }
}

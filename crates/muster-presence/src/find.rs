//! One-shot lookup: wait for the first peer matching a filter.
//!
//! The listener is registered before the current peers are read, so a peer
//! that starts matching in between is still caught. The snapshot scan and
//! every listener callback race for one slot under one lock; the first match
//! wins and everything after it is ignored.
//!
//! The filter sees each delivery as-is: a filter that ignores status will
//! resolve on a new peer's Connected delivery, before its Active one.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use muster_core::{Filter, Peer};
use tokio::sync::oneshot;

use crate::listener::{ListenerId, PresenceListener};
use crate::registry::PresenceRegistry;
use crate::service::PresenceError;

/// Anything peers can be looked up on.
pub trait PeerSource: Clone + Unpin + Send + Sync + 'static {
    fn add_listener(&self, listener: Arc<dyn PresenceListener>) -> ListenerId;
    fn remove_listener(&self, id: ListenerId) -> bool;
    fn peers(&self) -> Vec<Peer>;
}

impl PeerSource for PresenceRegistry {
    fn add_listener(&self, listener: Arc<dyn PresenceListener>) -> ListenerId {
        PresenceRegistry::add_listener(self, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        PresenceRegistry::remove_listener(self, id)
    }

    fn peers(&self) -> Vec<Peer> {
        PresenceRegistry::peers(self)
    }
}

/// Resolve to the first peer on `source` that passes `filter`, whether it is
/// already known or shows up later.
pub fn find_peer<S, F>(source: &S, filter: F) -> PendingPeer<S>
where
    S: PeerSource,
    F: Filter + 'static,
{
    let filter: Arc<dyn Filter> = Arc::new(filter);
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Slot {
        result: Some(tx),
        listener: None,
    }));

    let listener = FilteredListener {
        filter: filter.clone(),
        slot: slot.clone(),
        source: source.clone(),
    };
    let id = source.add_listener(Arc::new(listener));

    {
        let mut guard = lock(&slot);
        if guard.result.is_none() {
            // A callback won before we learned our id and could not deregister.
            source.remove_listener(id);
        } else if let Some(peer) = source.peers().into_iter().find(|p| filter.matches(p)) {
            guard.resolve(peer);
            source.remove_listener(id);
        } else {
            guard.listener = Some(id);
        }
    }

    PendingPeer {
        rx,
        slot,
        source: source.clone(),
    }
}

/// Pending result of [`find_peer`].
///
/// Await it, or poll without blocking via [`try_take`](Self::try_take).
/// Dropping an unresolved wait removes its listener.
pub struct PendingPeer<S: PeerSource> {
    rx: oneshot::Receiver<Peer>,
    slot: Arc<Mutex<Slot>>,
    source: S,
}

impl<S: PeerSource> PendingPeer<S> {
    /// The result, if it has been decided. Do not await after this returned
    /// `Some`.
    pub fn try_take(&mut self) -> Option<Peer> {
        self.rx.try_recv().ok()
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.slot).result.is_none()
    }
}

impl<S: PeerSource> Future for PendingPeer<S> {
    type Output = Result<Peer, PresenceError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| PresenceError::Closed))
    }
}

impl<S: PeerSource> Drop for PendingPeer<S> {
    fn drop(&mut self) {
        let mut guard = lock(&self.slot);
        if guard.result.take().is_some() {
            if let Some(id) = guard.listener.take() {
                self.source.remove_listener(id);
            }
        }
    }
}

struct Slot {
    /// `None` once resolved.
    result: Option<oneshot::Sender<Peer>>,
    /// Set once registration finished and the snapshot found nothing.
    listener: Option<ListenerId>,
}

impl Slot {
    fn resolve(&mut self, peer: Peer) {
        if let Some(tx) = self.result.take() {
            let _ = tx.send(peer);
        }
    }
}

struct FilteredListener<S: PeerSource> {
    filter: Arc<dyn Filter>,
    slot: Arc<Mutex<Slot>>,
    source: S,
}

impl<S: PeerSource> FilteredListener<S> {
    fn check(&self, peer: &Peer) {
        let mut guard = lock(&self.slot);
        if guard.result.is_none() || !self.filter.matches(peer) {
            return;
        }
        guard.resolve(peer.clone());
        if let Some(id) = guard.listener.take() {
            self.source.remove_listener(id);
        }
    }
}

impl<S: PeerSource> PresenceListener for FilteredListener<S> {
    fn on_connected(&self, peer: &Peer) {
        self.check(peer);
    }

    fn on_active(&self, peer: &Peer) {
        self.check(peer);
    }

    fn on_inactive(&self, peer: &Peer) {
        self.check(peer);
    }

    fn on_disconnected(&self, peer: &Peer) {
        self.check(peer);
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

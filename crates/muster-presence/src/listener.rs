//! Lifecycle observers.
//!
//! The registry notifies every registered [`PresenceListener`] of each
//! transition, sequentially and in order, from its executor task. A slow
//! listener delays every later event.

use std::fmt;

use muster_core::Peer;
use tokio::sync::mpsc;

/// Callbacks for peer lifecycle transitions. All four are required; use
/// [`ListenerAdapter`] when only some of them matter.
pub trait PresenceListener: Send + Sync {
    /// A previously unseen peer sent its first heartbeat. Always followed by
    /// [`on_active`](Self::on_active) for the same peer.
    fn on_connected(&self, peer: &Peer);

    /// A peer became active, either because it just connected or because it
    /// was inactive and heartbeated again.
    fn on_active(&self, peer: &Peer);

    /// A peer was silent for one timeout period.
    fn on_inactive(&self, peer: &Peer);

    /// A peer was silent for two timeout periods and has been forgotten.
    fn on_disconnected(&self, peer: &Peer);
}

/// Handle returned by `add_listener`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// One lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Connected(Peer),
    Active(Peer),
    Inactive(Peer),
    Disconnected(Peer),
}

impl PresenceEvent {
    pub fn peer(&self) -> &Peer {
        match self {
            PresenceEvent::Connected(p)
            | PresenceEvent::Active(p)
            | PresenceEvent::Inactive(p)
            | PresenceEvent::Disconnected(p) => p,
        }
    }

    /// Invoke the matching callback on `listener`.
    pub fn dispatch(&self, listener: &dyn PresenceListener) {
        match self {
            PresenceEvent::Connected(p) => listener.on_connected(p),
            PresenceEvent::Active(p) => listener.on_active(p),
            PresenceEvent::Inactive(p) => listener.on_inactive(p),
            PresenceEvent::Disconnected(p) => listener.on_disconnected(p),
        }
    }
}

/// Forwards every event into a channel. A closed receiver is ignored.
impl PresenceListener for mpsc::UnboundedSender<PresenceEvent> {
    fn on_connected(&self, peer: &Peer) {
        let _ = self.send(PresenceEvent::Connected(peer.clone()));
    }

    fn on_active(&self, peer: &Peer) {
        let _ = self.send(PresenceEvent::Active(peer.clone()));
    }

    fn on_inactive(&self, peer: &Peer) {
        let _ = self.send(PresenceEvent::Inactive(peer.clone()));
    }

    fn on_disconnected(&self, peer: &Peer) {
        let _ = self.send(PresenceEvent::Disconnected(peer.clone()));
    }
}

type Callback = Box<dyn Fn(&Peer) + Send + Sync>;

/// A listener assembled from closures. Unset callbacks do nothing.
///
/// ```ignore
/// let listener = ListenerAdapter::new()
///     .inactive(|peer| tracing::warn!(peer = %peer.id(), "went quiet"));
/// ```
#[derive(Default)]
pub struct ListenerAdapter {
    connected: Option<Callback>,
    active: Option<Callback>,
    inactive: Option<Callback>,
    disconnected: Option<Callback>,
}

impl ListenerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(mut self, f: impl Fn(&Peer) + Send + Sync + 'static) -> Self {
        self.connected = Some(Box::new(f));
        self
    }

    pub fn active(mut self, f: impl Fn(&Peer) + Send + Sync + 'static) -> Self {
        self.active = Some(Box::new(f));
        self
    }

    pub fn inactive(mut self, f: impl Fn(&Peer) + Send + Sync + 'static) -> Self {
        self.inactive = Some(Box::new(f));
        self
    }

    pub fn disconnected(mut self, f: impl Fn(&Peer) + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for ListenerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerAdapter")
            .field("connected", &self.connected.is_some())
            .field("active", &self.active.is_some())
            .field("inactive", &self.inactive.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .finish()
    }
}

impl PresenceListener for ListenerAdapter {
    fn on_connected(&self, peer: &Peer) {
        if let Some(f) = &self.connected {
            f(peer);
        }
    }

    fn on_active(&self, peer: &Peer) {
        if let Some(f) = &self.active {
            f(peer);
        }
    }

    fn on_inactive(&self, peer: &Peer) {
        if let Some(f) = &self.inactive {
            f(peer);
        }
    }

    fn on_disconnected(&self, peer: &Peer) {
        if let Some(f) = &self.disconnected {
            f(peer);
        }
    }
}

//! Presence service — registry, publisher and transport wired together.
//!
//! Construction validates everything and acquires nothing. `open` connects,
//! then subscribes the registry to the heartbeat channel and starts the
//! publisher; `close` undoes all three and forgets every peer.

use std::sync::{Arc, Mutex, MutexGuard};

use muster_core::wire::HEARTBEAT_CHANNEL;
use muster_core::{ConfigError, Descriptor, Filter, MusterConfig, Peer, Settings};

use crate::find::{find_peer, PeerSource, PendingPeer};
use crate::listener::{ListenerId, PresenceListener};
use crate::publisher::{HeartbeatPublisher, PublisherHandle};
use crate::registry::PresenceRegistry;
use crate::transport::{Channel, MessageHandler, SubscriptionId, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("presence service is already open")]
    AlreadyOpen,
    #[error("peer source went away before a match was found")]
    Closed,
}

pub struct PresenceService {
    settings: Settings,
    registry: PresenceRegistry,
    publisher: HeartbeatPublisher,
    transport: Arc<dyn Transport>,
    link: Mutex<Option<Link>>,
}

/// Everything `open` acquired.
struct Link {
    channel: Arc<dyn Channel>,
    subscription: SubscriptionId,
    publisher: PublisherHandle,
    /// Lowered by `close`. A delivery already past unsubscribe checks it and
    /// queues its heartbeat under the same lock.
    gate: Arc<Mutex<bool>>,
}

impl PresenceService {
    /// Validate `config` and prepare a closed service. Must be called inside a
    /// Tokio runtime; nothing touches the network until [`open`](Self::open).
    pub fn new(config: &MusterConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        Ok(Self::with_settings(settings, transport))
    }

    pub fn with_settings(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        let registry = PresenceRegistry::new(settings.identity.id.clone(), settings.timing.timeout);
        let publisher = HeartbeatPublisher::new(&settings.identity, settings.timing.period);
        Self {
            settings,
            registry,
            publisher,
            transport,
            link: Mutex::new(None),
        }
    }

    /// Connect, subscribe the registry and start heartbeating.
    pub async fn open(&self) -> Result<(), PresenceError> {
        if self.is_open() {
            return Err(PresenceError::AlreadyOpen);
        }

        let channel = self.transport.connect(self.settings.endpoint).await?;

        let gate = Arc::new(Mutex::new(true));
        let registry = self.registry.clone();
        let handler_gate = gate.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            let open = handler_gate.lock().unwrap_or_else(|e| e.into_inner());
            if !*open {
                tracing::trace!(topic, "dropping message delivered after close");
                return;
            }
            if let Err(e) = registry.handle_message(topic, payload) {
                tracing::warn!(topic, error = %e, "dropping malformed heartbeat");
            }
        });
        let subscription = channel.subscribe(HEARTBEAT_CHANNEL, handler);
        let publisher = self.publisher.start(channel.clone());

        let mut link = self.lock();
        if link.is_some() {
            // Lost a race with a concurrent open.
            channel.unsubscribe(HEARTBEAT_CHANNEL, subscription);
            publisher.stop();
            return Err(PresenceError::AlreadyOpen);
        }
        *link = Some(Link {
            channel,
            subscription,
            publisher,
            gate,
        });

        tracing::info!(
            id = %self.settings.identity.id,
            kind = %self.settings.identity.kind,
            "presence service open"
        );
        Ok(())
    }

    /// Unsubscribe, forget every peer and stop heartbeating. Safe to call on a
    /// closed service.
    pub fn close(&self) {
        let link = self.lock().take();
        if let Some(link) = &link {
            *link.gate.lock().unwrap_or_else(|e| e.into_inner()) = false;
            link.channel.unsubscribe(HEARTBEAT_CHANNEL, link.subscription);
        }
        self.registry.clear();
        if let Some(link) = link {
            link.publisher.stop();
            tracing::info!(id = %self.settings.identity.id, "presence service closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn self_descriptor(&self) -> &Descriptor {
        &self.settings.identity
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn add_listener(&self, listener: Arc<dyn PresenceListener>) -> ListenerId {
        self.registry.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.remove_listener(id)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.peers()
    }

    pub fn peer(&self, id: &str) -> Option<Peer> {
        self.registry.peer(id)
    }

    /// See [`find_peer`].
    pub fn find_peer<F: Filter + 'static>(&self, filter: F) -> PendingPeer<PresenceRegistry> {
        find_peer(&self.registry, filter)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PeerSource for Arc<PresenceService> {
    fn add_listener(&self, listener: Arc<dyn PresenceListener>) -> ListenerId {
        PresenceService::add_listener(self, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        PresenceService::remove_listener(self, id)
    }

    fn peers(&self) -> Vec<Peer> {
        PresenceService::peers(self)
    }
}

impl Drop for PresenceService {
    fn drop(&mut self) {
        self.close();
    }
}

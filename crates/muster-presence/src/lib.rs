//! muster-presence — decentralized peer presence over a shared channel.
//!
//! Every participant broadcasts its descriptor on a fixed cadence and watches
//! everyone else's. Liveness is inferred from heartbeat recency alone:
//!
//! ```text
//!   (unseen) ──hb──▶ Active ──T silent──▶ Inactive ──T silent──▶ Disconnected
//!                      ▲                      │
//!                      └─────────hb───────────┘
//! ```

pub mod find;
pub mod listener;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod transport;

pub use find::{find_peer, PeerSource, PendingPeer};
pub use listener::{ListenerAdapter, ListenerId, PresenceEvent, PresenceListener};
pub use publisher::{HeartbeatPublisher, PublisherHandle};
pub use registry::{PresenceRegistry, ProtocolError};
pub use service::{PresenceError, PresenceService};
pub use transport::{
    memory::MemoryHub, multicast::MulticastTransport, Channel, MessageHandler, SubscriptionId,
    Transport, TransportError,
};

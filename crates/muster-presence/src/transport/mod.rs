//! Pub/sub transport the presence layer runs on.
//!
//! A [`Transport`] establishes a [`Channel`] for an [`Endpoint`]. Channels
//! deliver `(channel name, payload)` pairs to every handler subscribed to that
//! name. Delivery is best-effort: no acknowledgement, no retry.

use std::sync::Arc;

use futures::future::BoxFuture;
use muster_core::wire::WireError;
use muster_core::Endpoint;

pub mod memory;
pub mod multicast;

/// Called with the channel name and payload of each received message.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// An established pub/sub binding.
pub trait Channel: Send + Sync {
    /// Send `payload` to every subscriber of `topic`, including local ones.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> SubscriptionId;

    /// Returns false if `id` was not subscribed to `topic`.
    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool;
}

/// Establishes channels. Connecting is asynchronous and may fail.
pub trait Transport: Send + Sync {
    fn connect(&self, endpoint: Endpoint) -> BoxFuture<'static, Result<Arc<dyn Channel>, TransportError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl TransportError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| TransportError::Io { context, source }
    }
}

/// Subscriber table shared by the transports. Handlers are cloned out before
/// being invoked so no map lock is held during a callback.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: std::sync::atomic::AtomicU64,
    by_topic: dashmap::DashMap<String, Vec<(SubscriptionId, MessageHandler)>>,
}

impl Subscriptions {
    pub(crate) fn add(&self, topic: &str, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId(
            self.next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        );
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let Some(mut handlers) = self.by_topic.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        before != handlers.len()
    }

    pub(crate) fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers: Vec<MessageHandler> = match self.by_topic.get(topic) {
            Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(topic, payload);
        }
        handlers.len()
    }
}

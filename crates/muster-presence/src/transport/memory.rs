//! In-process transport.
//!
//! Every channel connected to the same hub and endpoint sees every message
//! published on it, including its own, mirroring multicast loopback. Used by
//! tests and by embedders running several participants in one process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use muster_core::Endpoint;

use super::{Channel, MessageHandler, SubscriptionId, Subscriptions, Transport, TransportError};

#[derive(Clone, Default)]
pub struct MemoryHub {
    groups: Arc<DashMap<(std::net::Ipv4Addr, u16), Arc<Subscriptions>>>,
    refuse: Arc<AtomicBool>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect` calls fail, as an unreachable network would.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Transport for MemoryHub {
    fn connect(&self, endpoint: Endpoint) -> BoxFuture<'static, Result<Arc<dyn Channel>, TransportError>> {
        if self.refuse.load(Ordering::SeqCst) {
            let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "hub refused");
            return future::ready(Err(TransportError::io("connect")(err))).boxed();
        }
        let group = self
            .groups
            .entry((endpoint.address, endpoint.port))
            .or_default()
            .clone();
        let channel: Arc<dyn Channel> = Arc::new(MemoryChannel { group });
        future::ready(Ok(channel)).boxed()
    }
}

struct MemoryChannel {
    group: Arc<Subscriptions>,
}

impl Channel for MemoryChannel {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let delivered = self.group.deliver(topic, payload);
        tracing::trace!(topic, bytes = payload.len(), delivered, "memory publish");
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> SubscriptionId {
        self.group.add(topic, handler)
    }

    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.group.remove(topic, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            address: Ipv4Addr::new(239, 255, 76, 67),
            port,
            ttl: 0,
        }
    }

    fn recorder() -> (MessageHandler, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_on_same_endpoint() {
        let hub = MemoryHub::new();
        let a = hub.connect(endpoint(1)).await.unwrap();
        let b = hub.connect(endpoint(1)).await.unwrap();
        let elsewhere = hub.connect(endpoint(2)).await.unwrap();

        let (handler, seen) = recorder();
        b.subscribe("peers", handler.clone());
        elsewhere.subscribe("peers", handler);

        a.publish("peers", b"hi").unwrap();
        a.publish("other", b"ignored").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![("peers".to_string(), b"hi".to_vec())]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = MemoryHub::new();
        let channel = hub.connect(endpoint(1)).await.unwrap();
        let (handler, seen) = recorder();

        let id = channel.subscribe("peers", handler);
        assert!(channel.unsubscribe("peers", id));
        assert!(!channel.unsubscribe("peers", id));
        channel.publish("peers", b"hi").unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refused_connect_fails() {
        let hub = MemoryHub::new();
        hub.refuse_connections(true);
        assert!(hub.connect(endpoint(1)).await.is_err());
    }
}

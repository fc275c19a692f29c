//! UDP multicast transport.
//!
//! Joins the configured IPv4 group, publishes framed datagrams to it and runs
//! one receive task per channel that hands decoded messages to subscribers.
//! Loopback is enabled so participants on the same host see each other.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use muster_core::wire::{decode_datagram, encode_datagram, MAX_DATAGRAM};
use muster_core::Endpoint;

use super::{Channel, MessageHandler, SubscriptionId, Subscriptions, Transport, TransportError};

/// Connects to IPv4 multicast groups. Must be used inside a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct MulticastTransport;

impl Transport for MulticastTransport {
    fn connect(&self, endpoint: Endpoint) -> BoxFuture<'static, Result<Arc<dyn Channel>, TransportError>> {
        async move {
            let socket = make_multicast_socket(&endpoint)?;
            let socket = Arc::new(
                UdpSocket::from_std(socket).map_err(TransportError::io("tokio UdpSocket"))?,
            );
            let subscriptions = Arc::new(Subscriptions::default());

            let recv_task = tokio::spawn(receive_loop(socket.clone(), subscriptions.clone()));

            tracing::info!(
                group = %endpoint.address,
                port = endpoint.port,
                ttl = endpoint.ttl,
                "multicast channel ready"
            );

            let channel: Arc<dyn Channel> = Arc::new(MulticastChannel {
                socket,
                dest: SocketAddrV4::new(endpoint.address, endpoint.port).into(),
                subscriptions,
                sequence: AtomicU32::new(0),
                recv_task,
            });
            Ok(channel)
        }
        .boxed()
    }
}

struct MulticastChannel {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    subscriptions: Arc<Subscriptions>,
    sequence: AtomicU32,
    recv_task: JoinHandle<()>,
}

impl Channel for MulticastChannel {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = encode_datagram(sequence, topic, payload)?;
        let n = self
            .socket
            .try_send_to(&frame, self.dest)
            .map_err(TransportError::io("send_to"))?;
        tracing::trace!(topic, bytes = n, sequence, "datagram sent");
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: MessageHandler) -> SubscriptionId {
        self.subscriptions.add(topic, handler)
    }

    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.subscriptions.remove(topic, id)
    }
}

impl Drop for MulticastChannel {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Receive datagrams until the task is aborted.
async fn receive_loop(socket: Arc<UdpSocket>, subscriptions: Arc<Subscriptions>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        match decode_datagram(&buf[..len]) {
            Ok(datagram) => {
                subscriptions.deliver(datagram.channel, datagram.payload);
            }
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping unframed datagram");
            }
        }
    }
}

/// Create a UDP socket bound to the group port and joined to the group.
fn make_multicast_socket(endpoint: &Endpoint) -> Result<std::net::UdpSocket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(TransportError::io("socket()"))?;

    socket
        .set_reuse_address(true)
        .map_err(TransportError::io("SO_REUSEADDR"))?;
    socket
        .set_nonblocking(true)
        .map_err(TransportError::io("set_nonblocking"))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, endpoint.port);
    socket
        .bind(&bind_addr.into())
        .map_err(TransportError::io("bind()"))?;

    socket
        .join_multicast_v4(&endpoint.address, &Ipv4Addr::UNSPECIFIED)
        .map_err(TransportError::io("IP_ADD_MEMBERSHIP"))?;
    socket
        .set_multicast_ttl_v4(endpoint.ttl)
        .map_err(TransportError::io("IP_MULTICAST_TTL"))?;
    socket
        .set_multicast_loop_v4(true)
        .map_err(TransportError::io("IP_MULTICAST_LOOP"))?;

    Ok(socket.into())
}

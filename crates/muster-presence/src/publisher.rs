//! Heartbeat publisher.
//!
//! Broadcasts the local descriptor on [`HEARTBEAT_CHANNEL`] immediately and
//! then at a fixed rate. Heartbeats are best-effort: a failed send is logged
//! and the next tick simply tries again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use muster_core::wire::{encode_heartbeat, HEARTBEAT_CHANNEL};
use muster_core::Descriptor;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::transport::{Channel, TransportError};

#[derive(Debug, Clone)]
pub struct HeartbeatPublisher {
    payload: Bytes,
    period: Duration,
}

impl HeartbeatPublisher {
    /// The payload is encoded once, here.
    pub fn new(descriptor: &Descriptor, period: Duration) -> Self {
        Self {
            payload: encode_heartbeat(descriptor),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Send one heartbeat now.
    pub fn publish(&self, channel: &dyn Channel) -> Result<(), TransportError> {
        channel.publish(HEARTBEAT_CHANNEL, &self.payload)
    }

    /// Start publishing on `channel`. The first heartbeat goes out immediately;
    /// later ones keep to the original schedule even if a send runs late.
    pub fn start(&self, channel: Arc<dyn Channel>) -> PublisherHandle {
        let publisher = self.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

            tracing::info!(period_ms = period.as_millis() as u64, "heartbeat publisher starting");

            loop {
                interval.tick().await;
                match publisher.publish(channel.as_ref()) {
                    Ok(()) => tracing::trace!(bytes = publisher.payload.len(), "heartbeat sent"),
                    Err(e) => tracing::warn!(error = %e, "heartbeat send failed"),
                }
            }
        });

        PublisherHandle { task }
    }
}

/// Running publisher. Dropping the handle leaves the task running; call
/// [`stop`](Self::stop).
#[derive(Debug)]
pub struct PublisherHandle {
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Cancel future ticks. A send already in progress may still complete.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

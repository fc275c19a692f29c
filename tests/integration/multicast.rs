use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use muster_core::filter::TypeFilter;
use muster_presence::{MulticastTransport, PresenceService};

use crate::*;

/// Two services on real sockets find each other over multicast loopback.
#[tokio::test]
#[ignore = "needs a multicast route on this host"]
async fn multicast_loopback_discovery() -> Result<()> {
    let mut config_a = config("mc-a", "mc-left");
    let mut config_b = config("mc-b", "mc-right");
    for c in [&mut config_a, &mut config_b] {
        c.network.port = 17667;
        c.presence.period_ms = 50;
        c.presence.timeout_ms = 500;
    }

    let a = PresenceService::new(&config_a, Arc::new(MulticastTransport))?;
    let b = PresenceService::new(&config_b, Arc::new(MulticastTransport))?;
    a.open().await?;
    b.open().await?;

    let from_a = tokio::time::timeout(Duration::from_secs(3), a.find_peer(TypeFilter::new("mc-right"))).await??;
    let from_b = tokio::time::timeout(Duration::from_secs(3), b.find_peer(TypeFilter::new("mc-left"))).await??;

    assert_eq!(from_a.id(), "mc-b");
    assert_eq!(from_b.id(), "mc-a");
    Ok(())
}

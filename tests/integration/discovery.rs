use muster_core::Status;
use muster_presence::MemoryHub;

use crate::*;

/// Every participant learns about every other one, and never about itself.
#[tokio::test(start_paused = true)]
async fn three_services_see_each_other() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let b = service(&hub, "b", "node");
    let c = service(&hub, "c", "gateway");
    for s in [&a, &b, &c] {
        s.open().await.unwrap();
    }

    settle(PERIOD * 3, &[&a, &b, &c]).await;

    assert_eq!(ids(&a), ["b", "c"]);
    assert_eq!(ids(&b), ["a", "c"]);
    assert_eq!(ids(&c), ["a", "b"]);
    assert!(a.peers().iter().all(|p| p.status() == Status::Active));
    assert_eq!(a.peer("c").unwrap().kind(), "gateway");
}

/// Each new peer is reported as Connected then Active, exactly once.
#[tokio::test(start_paused = true)]
async fn first_heartbeat_reports_connected_then_active() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let mut rx = events(&a);
    a.open().await.unwrap();

    let b = service(&hub, "b", "node");
    b.open().await.unwrap();
    settle(PERIOD * 5, &[&a]).await;

    assert_eq!(
        drain(&mut rx),
        [("b".into(), Status::Connected), ("b".into(), Status::Active)]
    );
}

/// Participants on different ports share nothing.
#[tokio::test(start_paused = true)]
async fn separate_endpoints_are_isolated() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let mut other = config("b", "node");
    other.network.port = 7668;
    let b = PresenceService::new(&other, Arc::new(hub.clone())).unwrap();
    a.open().await.unwrap();
    b.open().await.unwrap();

    settle(PERIOD * 3, &[&a, &b]).await;

    assert!(a.peers().is_empty());
    assert!(b.peers().is_empty());
}

/// A heartbeat from an already active peer refreshes what we know about it
/// without telling anyone.
#[tokio::test(start_paused = true)]
async fn active_peer_snapshot_follows_latest_heartbeat() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    a.open().await.unwrap();

    let mut first = config("x", "node");
    first.identity.description = "v1".into();
    let v1 = PresenceService::new(&first, Arc::new(hub.clone())).unwrap();
    v1.open().await.unwrap();
    settle(PERIOD * 2, &[&a]).await;
    assert_eq!(a.peer("x").unwrap().description(), "v1");

    let mut rx = events(&a);
    v1.close();
    let mut second = first.clone();
    second.identity.description = "v2".into();
    second.identity = second.identity.with_protocol("http", "10.0.0.2:80");
    let v2 = PresenceService::new(&second, Arc::new(hub.clone())).unwrap();
    v2.open().await.unwrap();
    settle(PERIOD * 2, &[&a]).await;

    let x = a.peer("x").unwrap();
    assert_eq!(x.description(), "v2");
    assert_eq!(x.address("http"), Some("10.0.0.2:80"));
    assert_eq!(x.status(), Status::Active);
    assert!(drain(&mut rx).is_empty());
}

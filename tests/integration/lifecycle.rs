use muster_core::Status;
use muster_presence::MemoryHub;

use crate::*;

/// A participant that goes quiet is marked inactive after one timeout and
/// forgotten after two.
#[tokio::test(start_paused = true)]
async fn silent_peer_goes_inactive_then_disconnected() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let b = service(&hub, "b", "node");
    a.open().await.unwrap();
    b.open().await.unwrap();
    settle(PERIOD * 2 + PERIOD / 2, &[&a]).await;

    let mut rx = events(&a);
    b.close();

    settle(TIMEOUT + PERIOD, &[&a]).await;
    assert_eq!(drain(&mut rx), [("b".into(), Status::Inactive)]);
    assert_eq!(a.peer("b").unwrap().status(), Status::Inactive);

    settle(TIMEOUT, &[&a]).await;
    assert_eq!(drain(&mut rx), [("b".into(), Status::Disconnected)]);
    assert!(a.peers().is_empty());
}

/// An inactive peer that heartbeats again is reactivated, not reconnected.
#[tokio::test(start_paused = true)]
async fn inactive_peer_comes_back_active() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let b = service(&hub, "b", "node");
    a.open().await.unwrap();
    b.open().await.unwrap();
    settle(PERIOD * 2 + PERIOD / 2, &[&a]).await;

    let mut rx = events(&a);
    b.close();
    settle(TIMEOUT + PERIOD, &[&a]).await;
    b.open().await.unwrap();
    settle(PERIOD, &[&a, &b]).await;

    assert_eq!(
        drain(&mut rx),
        [("b".into(), Status::Inactive), ("b".into(), Status::Active)]
    );
    assert_eq!(a.peer("b").unwrap().status(), Status::Active);
    // b forgot everything on close and rediscovered a from scratch.
    assert_eq!(ids(&b), ["a"]);

    // The reactivated peer keeps living past the old deadline.
    settle(TIMEOUT * 3, &[&a]).await;
    assert!(drain(&mut rx).is_empty());
}

/// Closing forgets peers without emitting Disconnected for them.
#[tokio::test(start_paused = true)]
async fn close_is_silent_locally() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let b = service(&hub, "b", "node");
    a.open().await.unwrap();
    b.open().await.unwrap();
    settle(PERIOD * 2, &[&a]).await;

    let mut rx = events(&a);
    a.close();
    settle(TIMEOUT * 3, &[&a]).await;

    assert!(a.peers().is_empty());
    assert!(drain(&mut rx).is_empty());
    assert!(!a.is_open());
}

/// Dropping a service stops its heartbeats like an explicit close.
#[tokio::test(start_paused = true)]
async fn dropped_service_stops_heartbeating() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "node");
    let mut rx = events(&a);
    a.open().await.unwrap();
    {
        let b = service(&hub, "b", "node");
        b.open().await.unwrap();
        settle(PERIOD * 2, &[&a]).await;
    }

    settle(TIMEOUT * 3, &[&a]).await;
    let statuses: Vec<Status> = drain(&mut rx).into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        statuses,
        [Status::Connected, Status::Active, Status::Inactive, Status::Disconnected]
    );
}

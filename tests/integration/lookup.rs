use std::sync::Arc;

use muster_core::filter::{ConjunctiveFilter, Filter, ProtocolFilter, StatusFilter, TypeFilter};
use muster_core::{Descriptor, Status};
use muster_presence::{find_peer, MemoryHub, PresenceService};

use crate::*;

fn advertising(hub: &MemoryHub, id: &str, kind: &str, protocol: &str) -> PresenceService {
    let mut config = config(id, kind);
    config.identity = Descriptor::new(id, kind).with_protocol(protocol, format!("{id}.local:9000"));
    PresenceService::new(&config, Arc::new(hub.clone())).unwrap()
}

/// A lookup started before the target exists resolves once it appears.
#[tokio::test(start_paused = true)]
async fn waits_for_a_peer_that_appears_later() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "client");
    a.open().await.unwrap();

    let mut pending = a.find_peer(TypeFilter::new("printer"));
    let other = service(&hub, "b", "scanner");
    other.open().await.unwrap();
    settle(PERIOD * 3, &[&a]).await;
    assert!(pending.try_take().is_none());

    let printer = service(&hub, "p", "printer");
    printer.open().await.unwrap();

    let found = pending.await.unwrap();
    assert_eq!(found.id(), "p");
}

/// Composite filters pick the one peer that satisfies every condition.
#[tokio::test(start_paused = true)]
async fn composite_filter_across_services() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "client");
    let wrong_proto = advertising(&hub, "s1", "storage", "ftp");
    let wrong_type = advertising(&hub, "s2", "cache", "s3");
    let right = advertising(&hub, "s3", "storage", "s3");
    for s in [&a, &wrong_proto, &wrong_type, &right] {
        s.open().await.unwrap();
    }
    settle(PERIOD * 3, &[&a]).await;

    let children: Vec<Box<dyn Filter>> = vec![
        Box::new(TypeFilter::new("storage")),
        Box::new(ProtocolFilter::new("s3")),
        Box::new(StatusFilter::new(Status::Active)),
    ];
    let mut pending = a.find_peer(ConjunctiveFilter::new(children).unwrap());

    let found = pending.try_take().expect("already known");
    assert_eq!(found.id(), "s3");
    assert_eq!(found.address("s3"), Some("s3.local:9000"));
}

/// Waiting on an inactive status resolves when a known peer goes quiet.
#[tokio::test(start_paused = true)]
async fn waits_for_a_status_change() {
    let hub = MemoryHub::new();
    let a = Arc::new(service(&hub, "a", "client"));
    let b = service(&hub, "b", "node");
    a.open().await.unwrap();
    b.open().await.unwrap();
    settle(PERIOD * 2, &[&*a]).await;

    let pending = find_peer(&a, StatusFilter::new(Status::Inactive));
    b.close();

    let found = pending.await.unwrap();
    assert_eq!(found.id(), "b");
    assert_eq!(found.status(), Status::Inactive);
}

/// Abandoned lookups leave nothing behind on the registry.
#[tokio::test(start_paused = true)]
async fn abandoned_lookup_is_deregistered() {
    let hub = MemoryHub::new();
    let a = service(&hub, "a", "client");
    a.open().await.unwrap();

    let pending = a.find_peer(TypeFilter::new("nothing"));
    assert!(!pending.is_resolved());
    drop(pending);

    let b = service(&hub, "b", "nothing");
    b.open().await.unwrap();
    settle(PERIOD * 2, &[&a]).await;
    assert_eq!(ids(&a), ["b"]);
}

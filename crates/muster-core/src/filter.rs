//! Composable predicates over observed peers.

use crate::peer::{Peer, Status};

/// Passes or rejects a [`Peer`].
pub trait Filter: Send + Sync {
    fn matches(&self, peer: &Peer) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("a composite filter needs at least one child filter")]
    NoChildren,
}

/// Always passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pass;

impl Filter for Pass {
    fn matches(&self, _peer: &Peer) -> bool {
        true
    }
}

/// Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fail;

impl Filter for Fail {
    fn matches(&self, _peer: &Peer) -> bool {
        false
    }
}

/// Passes peers that advertise an address for the given protocol.
#[derive(Debug, Clone)]
pub struct ProtocolFilter {
    protocol: String,
}

impl ProtocolFilter {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }
}

impl Filter for ProtocolFilter {
    fn matches(&self, peer: &Peer) -> bool {
        peer.supports(&self.protocol)
    }
}

/// Passes peers whose status equals the given one.
#[derive(Debug, Clone, Copy)]
pub struct StatusFilter {
    status: Status,
}

impl StatusFilter {
    pub fn new(status: Status) -> Self {
        Self { status }
    }
}

impl Filter for StatusFilter {
    fn matches(&self, peer: &Peer) -> bool {
        peer.status() == self.status
    }
}

/// Passes peers whose type equals the given one.
#[derive(Debug, Clone)]
pub struct TypeFilter {
    kind: String,
}

impl TypeFilter {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl Filter for TypeFilter {
    fn matches(&self, peer: &Peer) -> bool {
        peer.kind() == self.kind
    }
}

/// Passes only if every child passes. Short-circuits on the first rejection.
pub struct ConjunctiveFilter {
    children: Vec<Box<dyn Filter>>,
}

impl ConjunctiveFilter {
    pub fn new(children: Vec<Box<dyn Filter>>) -> Result<Self, FilterError> {
        if children.is_empty() {
            return Err(FilterError::NoChildren);
        }
        Ok(Self { children })
    }
}

impl Filter for ConjunctiveFilter {
    fn matches(&self, peer: &Peer) -> bool {
        self.children.iter().all(|f| f.matches(peer))
    }
}

/// Passes if any child passes. Short-circuits on the first acceptance.
pub struct DisjunctiveFilter {
    children: Vec<Box<dyn Filter>>,
}

impl DisjunctiveFilter {
    pub fn new(children: Vec<Box<dyn Filter>>) -> Result<Self, FilterError> {
        if children.is_empty() {
            return Err(FilterError::NoChildren);
        }
        Ok(Self { children })
    }
}

impl Filter for DisjunctiveFilter {
    fn matches(&self, peer: &Peer) -> bool {
        self.children.iter().any(|f| f.matches(peer))
    }
}

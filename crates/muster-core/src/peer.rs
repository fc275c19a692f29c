//! Peer descriptors — what a participant advertises, and what we observe.
//!
//! A [`Descriptor`] is the status-less data a participant broadcasts in its
//! heartbeat. A [`Peer`] is an immutable snapshot of a remote descriptor
//! together with the lifecycle status we currently assign to it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an observed peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Transient marker delivered once when a peer is first seen. Never stored.
    Connected,
    /// Heartbeats are arriving within the presence timeout.
    Active,
    /// No heartbeat for one timeout period.
    Inactive,
    /// No heartbeat for two timeout periods. The peer has been forgotten.
    Disconnected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Connected => "connected",
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor id must not be empty")]
    EmptyId,
    #[error("descriptor type must not be empty")]
    EmptyType,
}

/// The data a participant advertises about itself.
///
/// Appears verbatim as the `[identity]` section of the config file and is the
/// body of every heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Descriptor {
    /// Stable unique identity. Primary key in every registry.
    pub id: String,
    /// Application-defined category.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free text. Empty when absent.
    pub description: String,
    /// Protocol name → address.
    pub protocols: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            description: String::new(),
            protocols: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add or replace the address advertised for `protocol`.
    pub fn with_protocol(mut self, protocol: impl Into<String>, address: impl Into<String>) -> Self {
        self.protocols.insert(protocol.into(), address.into());
        self
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.is_empty() {
            return Err(DescriptorError::EmptyId);
        }
        if self.kind.is_empty() {
            return Err(DescriptorError::EmptyType);
        }
        Ok(())
    }
}

/// Immutable snapshot of an observed participant.
///
/// Equality and hashing are structural over all five fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Peer {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    status: Status,
    description: String,
    protocols: BTreeMap<String, String>,
}

impl Peer {
    /// Build a peer from a validated descriptor.
    pub fn new(descriptor: Descriptor, status: Status) -> Result<Self, DescriptorError> {
        descriptor.validate()?;
        let Descriptor {
            id,
            kind,
            description,
            protocols,
        } = descriptor;
        Ok(Self {
            id,
            kind,
            status,
            description,
            protocols,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn protocols(&self) -> &BTreeMap<String, String> {
        &self.protocols
    }

    pub fn supports(&self, protocol: &str) -> bool {
        self.protocols.contains_key(protocol)
    }

    /// Address advertised for `protocol`, if any.
    pub fn address(&self, protocol: &str) -> Option<&str> {
        self.protocols.get(protocol).map(String::as_str)
    }

    /// A copy of this snapshot carrying a different status.
    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// The advertised part of this snapshot, without status.
    pub fn to_descriptor(&self) -> Descriptor {
        Descriptor {
            id: self.id.clone(),
            kind: self.kind.clone(),
            description: self.description.clone(),
            protocols: self.protocols.clone(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}: {{",
            self.id, self.kind, self.status, self.description
        )?;
        for (i, (protocol, address)) in self.protocols.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "({protocol}, {address})")?;
        }
        f.write_str("}")
    }
}

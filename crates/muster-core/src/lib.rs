//! muster-core — peer descriptors, filters, wire format and configuration.
//! The runtime crates depend on this one; it has no async runtime of its own.

pub mod config;
pub mod filter;
pub mod peer;
pub mod wire;

pub use config::{ConfigError, Endpoint, MusterConfig, Settings, Timing};
pub use filter::{Filter, FilterError};
pub use peer::{Descriptor, DescriptorError, Peer, Status};

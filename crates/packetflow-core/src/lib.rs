//! Connection state machine, environment abstraction, and supporting types
//! for a packet-oriented TCP application server.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod connection;
mod env;
mod error;
mod id;
mod metadata;
mod permission;
mod transport_cache;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent, ConnectionState};
pub use env::{Environment, SystemEnvironment};
pub use error::ConnectionError;
pub use id::ConnectionId;
pub use metadata::{Metadata, MetadataValue, DISCONNECT_REASON_KEY};
pub use permission::PermissionLevel;
pub use transport_cache::{fingerprint, Fingerprint, IncomingFifo, OutgoingCache, DEFAULT_CAPACITY};

//! peerwire-core: shared value types, the UDP envelope, and configuration.
//! All other peerwire crates depend on this one.

pub mod address;
pub mod config;
pub mod crypto;
pub mod error;
pub mod message;
pub mod urn;
pub mod wire;

pub use address::PeerAddress;
pub use error::ErrorKind;
pub use message::{Message, MessageKind, PacketError, RawAddress, SourceRecord};
pub use urn::ContentHash;

/// Wall-clock time as unix milliseconds. Used for `last_seen` stamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

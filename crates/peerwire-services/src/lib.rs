//! peerwire-services: the source discovery and peer-routing core.
//!
//! Registries here are shared across the UDP receive path, maintenance
//! tasks, and the local API. All of them are safe to use concurrently.

pub mod altloc;
pub mod collector;
pub mod connection;
pub mod events;
pub mod filter;
pub mod handlers;
pub mod hashing;
pub mod hosts;
pub mod push;
pub mod push_proxy;
pub mod reply_cache;
pub mod router;
pub mod spam_services;
pub mod udp;
pub mod uploads;

pub use altloc::{AddOutcome, AltLocError, AlternateLocation, AlternateLocationCollection};
pub use collector::{AltLocManager, AlternateLocationCollector, HttpHeaderValue, SourceSet};
pub use connection::{ConnectError, ConnectType, Connection, ConnectionFactory, ConnectionState};
pub use events::{CoreEvent, EventReceiver, EventSink, FileEvent};
pub use filter::{IpRangeSet, SpamFilter};
pub use handlers::DefaultBinder;
pub use hashing::SharedFiles;
pub use hosts::HostPool;
pub use push::PushRequester;
pub use push_proxy::{PushError, PushFailures, PushProxyEntry, PushProxyRegistry, ProxyError};
pub use reply_cache::{FilterSet, OutboundRx, OutboundTx, UdpReplyHandler, UdpReplyHandlerCache};
pub use router::{
    MessageHandler, MessageHandlerBinder, MessageRouter, RouteOutcome, RouterError,
    RouterStatsSnapshot,
};
pub use spam_services::{FilterError, ReloadReport, SpamServices};
pub use udp::{UdpReceiver, UdpSender};
pub use uploads::{UploadError, UploadSlot, UploadSlots};

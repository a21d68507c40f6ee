//! The node's UDP message handlers and the binder that installs them.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use parking_lot::RwLock;

use peerwire_core::crypto::MacKeyRing;
use peerwire_core::{Message, MessageKind, PeerAddress, RawAddress};

use crate::altloc::AlternateLocation;
use crate::collector::{AltLocManager, AlternateLocationCollector};
use crate::hosts::HostPool;
use crate::push_proxy::{PushProxyEntry, PushProxyRegistry};
use crate::reply_cache::UdpReplyHandler;
use crate::router::{MessageHandler, MessageHandlerBinder, MessageRouter, RouterError};

fn send(reply: &UdpReplyHandler, message: &Message) -> anyhow::Result<()> {
    let bytes = message
        .encode()
        .with_context(|| format!("encoding {} reply", message.kind()))?;
    if !reply.reply(Bytes::from(bytes)) {
        tracing::debug!(peer = %reply.address(), "reply not sent, send worker stopped");
    }
    Ok(())
}

/// Answers a ping with a pong carrying our advertised address.
pub struct PingHandler {
    advertised: RawAddress,
}

impl PingHandler {
    /// Only IPv4 addresses can be advertised in a pong.
    pub fn new(advertised: PeerAddress) -> Option<Self> {
        RawAddress::from_peer(&advertised).map(|advertised| Self { advertised })
    }
}

impl MessageHandler for PingHandler {
    fn handle_message(&self, _: &Message, _: PeerAddress, reply: &UdpReplyHandler) -> anyhow::Result<()> {
        send(reply, &Message::Pong { host: self.advertised })
    }
}

/// Feeds hosts from pongs into the host pool.
pub struct PongHandler {
    hosts: Arc<HostPool>,
}

impl PongHandler {
    pub fn new(hosts: Arc<HostPool>) -> Self {
        Self { hosts }
    }
}

impl MessageHandler for PongHandler {
    fn handle_message(&self, message: &Message, from: PeerAddress, _: &UdpReplyHandler) -> anyhow::Result<()> {
        if let Message::Pong { host } = message {
            if !self.hosts.add_host(host.to_peer()) {
                tracing::trace!(peer = %from, host = %host.to_peer(), "pong host ignored");
            }
        }
        Ok(())
    }
}

/// Records announced sources for a content hash.
pub struct AltLocsHandler {
    altlocs: Arc<AltLocManager>,
}

impl AltLocsHandler {
    pub fn new(altlocs: Arc<AltLocManager>) -> Self {
        Self { altlocs }
    }
}

impl MessageHandler for AltLocsHandler {
    fn handle_message(&self, message: &Message, from: PeerAddress, _: &UdpReplyHandler) -> anyhow::Result<()> {
        let Message::AltLocs { hash, sources } = message else {
            return Ok(());
        };
        let now = peerwire_core::now_millis();
        let set = self.altlocs.collection(*hash);
        let mut accepted = 0usize;
        let mut rejected = 0usize;
        for record in sources {
            let added = AlternateLocation::from_source_record(*hash, record, now)
                .and_then(|location| set.add_alternate_location(location));
            match added {
                Ok(outcome) if outcome.changed() => accepted += 1,
                Ok(_) => {}
                Err(_) => rejected += 1,
            }
        }
        tracing::debug!(
            peer = %from,
            hash = %hash.short(),
            announced = sources.len(),
            accepted,
            rejected,
            "alternate locations received"
        );
        Ok(())
    }
}

/// Records a firewalled peer's push proxies. An empty list means the peer
/// is directly reachable again. Only the peer itself may speak for its
/// proxies: the announcing host must match the target host.
pub struct PushProxiesHandler {
    proxies: Arc<PushProxyRegistry>,
}

impl PushProxiesHandler {
    pub fn new(proxies: Arc<PushProxyRegistry>) -> Self {
        Self { proxies }
    }
}

impl MessageHandler for PushProxiesHandler {
    fn handle_message(&self, message: &Message, from: PeerAddress, _: &UdpReplyHandler) -> anyhow::Result<()> {
        let Message::PushProxies { target, proxies } = message else {
            return Ok(());
        };
        let target = target.to_peer();
        if target.host() != from.host() {
            tracing::debug!(peer = %from, target = %target, "ignoring push proxies announced for another host");
            return Ok(());
        }
        if proxies.is_empty() {
            self.proxies.mark_directly_reachable(&target);
            return Ok(());
        }
        for raw in proxies {
            match PushProxyEntry::from_raw(&raw.addr, i64::from(raw.port), target) {
                Ok(entry) => self.proxies.register(entry),
                Err(e) => tracing::debug!(peer = %from, error = %e, "invalid push proxy"),
            }
        }
        Ok(())
    }
}

/// Hands out a query key bound to the requester's address.
pub struct QueryKeyHandler {
    keys: Arc<RwLock<MacKeyRing>>,
}

impl QueryKeyHandler {
    pub fn new(keys: Arc<RwLock<MacKeyRing>>) -> Self {
        Self { keys }
    }
}

impl MessageHandler for QueryKeyHandler {
    fn handle_message(&self, _: &Message, from: PeerAddress, reply: &UdpReplyHandler) -> anyhow::Result<()> {
        let key = self.keys.read().query_key(&from);
        send(reply, &Message::QueryKeyReply { key })
    }
}

/// Everything the standard handler set needs.
pub struct DefaultBinder {
    pub advertised: PeerAddress,
    pub hosts: Arc<HostPool>,
    pub altlocs: Arc<AltLocManager>,
    pub proxies: Arc<PushProxyRegistry>,
    pub keys: Arc<RwLock<MacKeyRing>>,
}

impl MessageHandlerBinder for DefaultBinder {
    fn bind(&self, router: &mut MessageRouter) -> Result<(), RouterError> {
        match PingHandler::new(self.advertised) {
            Some(ping) => router.set_udp_message_handler(MessageKind::Ping, Arc::new(ping))?,
            None => tracing::warn!(
                advertised = %self.advertised,
                "advertised address is not IPv4, pings will go unanswered"
            ),
        }
        router.set_udp_message_handler(MessageKind::Pong, Arc::new(PongHandler::new(self.hosts.clone())))?;
        router.set_udp_message_handler(
            MessageKind::AltLocs,
            Arc::new(AltLocsHandler::new(self.altlocs.clone())),
        )?;
        router.set_udp_message_handler(
            MessageKind::PushProxies,
            Arc::new(PushProxiesHandler::new(self.proxies.clone())),
        )?;
        router.set_udp_message_handler(
            MessageKind::QueryKeyRequest,
            Arc::new(QueryKeyHandler::new(self.keys.clone())),
        )?;
        Ok(())
    }
}

//! Push proxies: relays through which a firewalled peer can be reached.
//!
//! A firewalled peer announces up to `max_per_peer` proxies. Entries go
//! stale after `ttl`; stale entries are hidden from lookups straight away
//! and physically removed by `prune_expired`, which the daemon runs on a
//! timer. A peer that turns out to be directly reachable loses all of them.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use peerwire_core::{ErrorKind, PeerAddress};

pub const DEFAULT_MAX_PER_PEER: usize = 4;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("push proxy port {0} out of range")]
    InvalidPort(i64),
    #[error("push proxy address must be 4 or 16 bytes, got {len}")]
    InvalidAddress { len: usize },
    #[error("push proxy {0} is not a usable endpoint")]
    UnusableAddress(PeerAddress),
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Parse
    }
}

/// One proxy for one firewalled peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PushProxyEntry {
    proxy: PeerAddress,
    proxied_for: PeerAddress,
}

impl PushProxyEntry {
    pub fn new(proxy: PeerAddress, proxied_for: PeerAddress) -> Result<Self, ProxyError> {
        if !proxy.is_valid() {
            return Err(ProxyError::UnusableAddress(proxy));
        }
        Ok(Self { proxy, proxied_for })
    }

    /// Validate raw wire fields. `port` is wide so out-of-range values from
    /// callers can be reported rather than truncated.
    pub fn from_raw(
        addr_bytes: &[u8],
        port: i64,
        proxied_for: PeerAddress,
    ) -> Result<Self, ProxyError> {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ProxyError::InvalidPort(port))?;
        let proxy = PeerAddress::from_raw(addr_bytes, port).ok_or(ProxyError::InvalidAddress {
            len: addr_bytes.len(),
        })?;
        Self::new(proxy, proxied_for)
    }

    pub fn push_proxy_port(&self) -> u16 {
        self.proxy.port()
    }

    /// Raw network-order address bytes of the proxy.
    pub fn push_proxy_address(&self) -> Vec<u8> {
        self.proxy.ip_bytes()
    }

    pub fn proxy(&self) -> PeerAddress {
        self.proxy
    }

    pub fn proxied_for(&self) -> PeerAddress {
        self.proxied_for
    }
}

#[derive(Debug, Clone, Copy)]
struct Registered {
    proxy: PeerAddress,
    registered_at: Instant,
}

/// Firewalled peer → its known push proxies, newest first.
pub struct PushProxyRegistry {
    peers: DashMap<PeerAddress, Vec<Registered>>,
    ttl: Duration,
    max_per_peer: usize,
}

impl PushProxyRegistry {
    pub fn new(ttl: Duration, max_per_peer: usize) -> Self {
        Self {
            peers: DashMap::new(),
            ttl,
            max_per_peer,
        }
    }

    pub fn register(&self, entry: PushProxyEntry) {
        self.register_at(entry, Instant::now());
    }

    /// Add or refresh one proxy. If the peer then has more than
    /// `max_per_peer`, the least recently registered are dropped.
    pub fn register_at(&self, entry: PushProxyEntry, now: Instant) {
        if self.max_per_peer == 0 {
            return;
        }
        let mut proxies = self.peers.entry(entry.proxied_for).or_default();
        proxies.retain(|r| r.proxy != entry.proxy);
        proxies.insert(
            0,
            Registered {
                proxy: entry.proxy,
                registered_at: now,
            },
        );
        proxies.truncate(self.max_per_peer);
        tracing::trace!(
            peer = %entry.proxied_for,
            proxy = %entry.proxy,
            count = proxies.len(),
            "push proxy registered"
        );
    }

    /// Register a peer's announced proxy list. Unusable addresses are
    /// skipped. Returns how many were accepted.
    pub fn register_all(
        &self,
        peer: PeerAddress,
        proxies: impl IntoIterator<Item = PeerAddress>,
    ) -> usize {
        let now = Instant::now();
        let mut accepted = 0;
        for proxy in proxies {
            match PushProxyEntry::new(proxy, peer) {
                Ok(entry) => {
                    self.register_at(entry, now);
                    accepted += 1;
                }
                Err(e) => tracing::debug!(peer = %peer, error = %e, "push proxy rejected"),
            }
        }
        accepted
    }

    /// Live proxies for `peer`, newest first.
    pub fn proxies(&self, peer: &PeerAddress) -> Vec<PeerAddress> {
        self.proxies_at(peer, Instant::now())
    }

    pub fn proxies_at(&self, peer: &PeerAddress, now: Instant) -> Vec<PeerAddress> {
        self.peers
            .get(peer)
            .map(|proxies| {
                proxies
                    .iter()
                    .filter(|r| !self.is_expired(r, now))
                    .map(|r| r.proxy)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_proxies(&self, peer: &PeerAddress) -> bool {
        !self.proxies(peer).is_empty()
    }

    /// Forget one proxy, e.g. after a push through it failed.
    pub fn remove_proxy(&self, peer: &PeerAddress, proxy: &PeerAddress) -> bool {
        let removed = match self.peers.get_mut(peer) {
            Some(mut proxies) => {
                let before = proxies.len();
                proxies.retain(|r| r.proxy != *proxy);
                before != proxies.len()
            }
            None => false,
        };
        self.peers.remove_if(peer, |_, proxies| proxies.is_empty());
        removed
    }

    /// The peer answered directly; it does not need proxies.
    pub fn mark_directly_reachable(&self, peer: &PeerAddress) -> usize {
        let removed = self
            .peers
            .remove(peer)
            .map(|(_, proxies)| proxies.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::debug!(peer = %peer, removed, "peer directly reachable, push proxies dropped");
        }
        removed
    }

    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now())
    }

    /// Remove stale entries. Returns how many proxies went.
    pub fn prune_expired_at(&self, now: Instant) -> usize {
        let mut pruned = 0;
        self.peers.retain(|_, proxies| {
            let before = proxies.len();
            proxies.retain(|r| !self.is_expired(r, now));
            pruned += before - proxies.len();
            !proxies.is_empty()
        });
        pruned
    }

    /// Number of firewalled peers with at least one stored proxy.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn is_expired(&self, r: &Registered, now: Instant) -> bool {
        now.saturating_duration_since(r.registered_at) >= self.ttl
    }
}

// ── Push failures ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PushError {
    #[error("push to {0} already failed, not retrying")]
    RetryExhausted(PeerAddress),
    #[error("no push proxies known for {0}")]
    NoProxies(PeerAddress),
    #[error("no push proxy for {0} accepted a connection")]
    Unreachable(PeerAddress),
}

impl PushError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PushError::RetryExhausted(_) => ErrorKind::RetryExhausted,
            PushError::NoProxies(_) | PushError::Unreachable(_) => ErrorKind::Failed,
        }
    }
}

/// Sources whose push already failed once. A second attempt is refused.
#[derive(Default)]
pub struct PushFailures {
    failed: DashMap<PeerAddress, Instant>,
}

impl PushFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_push(&self, source: &PeerAddress) -> Result<(), PushError> {
        if self.failed.contains_key(source) {
            return Err(PushError::RetryExhausted(*source));
        }
        Ok(())
    }

    pub fn record_failure(&self, source: PeerAddress) {
        self.failed.insert(source, Instant::now());
        tracing::debug!(peer = %source, "push failed");
    }

    pub fn record_success(&self, source: &PeerAddress) {
        self.failed.remove(source);
    }

    /// Proxies to push through for `source`, or why not.
    pub fn plan_push(
        &self,
        registry: &PushProxyRegistry,
        source: &PeerAddress,
    ) -> Result<Vec<PeerAddress>, PushError> {
        self.begin_push(source)?;
        let proxies = registry.proxies(source);
        if proxies.is_empty() {
            return Err(PushError::NoProxies(*source));
        }
        Ok(proxies)
    }

    /// Forget failures older than `max_age`, so a source can be tried again
    /// much later.
    pub fn expire(&self, max_age: Duration) -> usize {
        let before = self.failed.len();
        self.failed.retain(|_, at| at.elapsed() < max_age);
        before.saturating_sub(self.failed.len())
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }
}

//! Alternate locations: known download sources for one content hash.
//!
//! A collection is bounded. Entries are kept in ascending `last_seen` order
//! (ties keep insertion order), which is also the header render order. When
//! full, a new source evicts the oldest entry only if it is strictly newer.
//!
//! Sources that were explicitly removed (a failed download, say) are
//! remembered in a bounded set and only come back with a strictly newer
//! report.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;

use peerwire_core::{ContentHash, ErrorKind, PeerAddress, SourceRecord};

pub const DEFAULT_MAX_LOCATIONS: usize = 10;
pub const DEFAULT_MAX_REMOVED: usize = 500;

const TLS_MARKER: &str = "tls";
const FIREWALLED_MARKER: &str = "fw";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AltLocError {
    #[error("location for {actual} offered to collection for {expected}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    #[error("unusable source address {0}")]
    InvalidAddress(String),
    #[error("malformed alternate location {0:?}")]
    Malformed(String),
}

impl AltLocError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AltLocError::HashMismatch { .. } => ErrorKind::Failed,
            AltLocError::InvalidAddress(_) | AltLocError::Malformed(_) => ErrorKind::Parse,
        }
    }
}

// ── Location ──────────────────────────────────────────────────────────────────

/// One known source. Identity is (hash, address); flags and `last_seen`
/// change by replacing the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlternateLocation {
    hash: ContentHash,
    address: PeerAddress,
    firewalled: bool,
    tls_capable: bool,
    /// Unix milliseconds.
    last_seen: u64,
}

impl AlternateLocation {
    pub fn new(hash: ContentHash, address: PeerAddress, last_seen: u64) -> Self {
        Self {
            hash,
            address,
            firewalled: false,
            tls_capable: false,
            last_seen,
        }
    }

    pub fn with_firewalled(mut self, firewalled: bool) -> Self {
        self.firewalled = firewalled;
        self
    }

    pub fn with_tls(mut self, tls_capable: bool) -> Self {
        self.tls_capable = tls_capable;
        self
    }

    /// From a wire announcement. The address must be usable.
    pub fn from_source_record(
        hash: ContentHash,
        record: &SourceRecord,
        last_seen: u64,
    ) -> Result<Self, AltLocError> {
        let address = record.address.to_peer();
        if !address.is_valid() {
            return Err(AltLocError::InvalidAddress(address.to_string()));
        }
        Ok(Self::new(hash, address, last_seen)
            .with_firewalled(record.firewalled)
            .with_tls(record.tls))
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn is_firewalled(&self) -> bool {
        self.firewalled
    }

    pub fn is_tls_capable(&self) -> bool {
        self.tls_capable
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Header token: `host:port`, then `;tls` and `;fw` markers as they apply.
    pub fn render(&self) -> String {
        let mut out = self.address.to_string();
        if self.tls_capable {
            out.push(';');
            out.push_str(TLS_MARKER);
        }
        if self.firewalled {
            out.push(';');
            out.push_str(FIREWALLED_MARKER);
        }
        out
    }

    /// Parse one header token. Returns the location and any push proxies
    /// listed after it. Unknown markers are skipped.
    pub fn parse_http_token(
        hash: ContentHash,
        token: &str,
        last_seen: u64,
    ) -> Result<(Self, Vec<PeerAddress>), AltLocError> {
        let mut parts = token.trim().split(';').map(str::trim);
        let head = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AltLocError::Malformed(token.to_string()))?;
        let address: PeerAddress = head
            .parse()
            .map_err(|_| AltLocError::Malformed(token.to_string()))?;
        if !address.is_valid() {
            return Err(AltLocError::InvalidAddress(head.to_string()));
        }

        let mut location = Self::new(hash, address, last_seen);
        let mut proxies = Vec::new();
        for part in parts {
            match part {
                TLS_MARKER => location.tls_capable = true,
                FIREWALLED_MARKER => location.firewalled = true,
                other => match other.parse::<PeerAddress>() {
                    Ok(proxy) if proxy.is_valid() => proxies.push(proxy),
                    _ => tracing::trace!(marker = other, "ignoring unknown altloc marker"),
                },
            }
        }
        Ok((location, proxies))
    }
}

impl fmt::Display for AlternateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// What `add` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// An existing entry was replaced by a newer report.
    Updated,
    /// Inserted, pushing out the oldest entry.
    Evicted(PeerAddress),
    /// Nothing changed.
    Ignored,
}

impl AddOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, AddOutcome::Ignored)
    }
}

// ── Collection ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    /// Ascending `last_seen`; equal stamps in insertion order.
    entries: Vec<AlternateLocation>,
    /// Address → `last_seen` at removal time.
    removed: HashMap<PeerAddress, u64>,
    removed_order: VecDeque<PeerAddress>,
}

impl Inner {
    fn position(&self, addr: &PeerAddress) -> Option<usize> {
        self.entries.iter().position(|e| e.address == *addr)
    }

    fn insert_sorted(&mut self, location: AlternateLocation) {
        let at = self
            .entries
            .partition_point(|e| e.last_seen <= location.last_seen);
        self.entries.insert(at, location);
    }

    fn remember_removed(&mut self, addr: PeerAddress, last_seen: u64, max_removed: usize) {
        if max_removed == 0 {
            return;
        }
        if let Some(stamp) = self.removed.get_mut(&addr) {
            *stamp = (*stamp).max(last_seen);
            return;
        }
        self.removed.insert(addr, last_seen);
        self.removed_order.push_back(addr);
        while self.removed_order.len() > max_removed {
            if let Some(old) = self.removed_order.pop_front() {
                self.removed.remove(&old);
            }
        }
    }

    fn forget_removed(&mut self, addr: &PeerAddress) {
        if self.removed.remove(addr).is_some() {
            self.removed_order.retain(|a| a != addr);
        }
    }
}

/// Bounded, de-duplicated set of sources for one content hash.
pub struct AlternateLocationCollection {
    hash: ContentHash,
    max_locations: usize,
    max_removed: usize,
    inner: RwLock<Inner>,
}

impl AlternateLocationCollection {
    pub fn new(hash: ContentHash) -> Self {
        Self::with_limits(hash, DEFAULT_MAX_LOCATIONS, DEFAULT_MAX_REMOVED)
    }

    pub fn with_limits(hash: ContentHash, max_locations: usize, max_removed: usize) -> Self {
        Self {
            hash,
            max_locations,
            max_removed,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Build from a header value. Bad tokens are skipped; every parsed
    /// location is stamped `last_seen`.
    pub fn from_http_value(
        hash: ContentHash,
        value: &str,
        max_locations: usize,
        last_seen: u64,
    ) -> Self {
        let collection = Self::with_limits(hash, max_locations, DEFAULT_MAX_REMOVED);
        for token in value.split(',').filter(|t| !t.trim().is_empty()) {
            match AlternateLocation::parse_http_token(hash, token, last_seen) {
                Ok((location, _)) => {
                    let _ = collection.add(location);
                }
                Err(e) => tracing::debug!(error = %e, "skipping altloc token"),
            }
        }
        collection
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn max_locations(&self) -> usize {
        self.max_locations
    }

    /// Merge one location.
    pub fn add(&self, location: AlternateLocation) -> Result<AddOutcome, AltLocError> {
        if location.hash != self.hash {
            return Err(AltLocError::HashMismatch {
                expected: self.hash,
                actual: location.hash,
            });
        }

        let mut inner = self.inner.write();

        if let Some(&removed_at) = inner.removed.get(&location.address) {
            if location.last_seen <= removed_at {
                return Ok(AddOutcome::Ignored);
            }
            inner.forget_removed(&location.address);
        }

        if let Some(pos) = inner.position(&location.address) {
            if location.last_seen <= inner.entries[pos].last_seen {
                return Ok(AddOutcome::Ignored);
            }
            inner.entries.remove(pos);
            inner.insert_sorted(location);
            return Ok(AddOutcome::Updated);
        }

        if self.max_locations == 0 {
            return Ok(AddOutcome::Ignored);
        }
        if inner.entries.len() < self.max_locations {
            inner.insert_sorted(location);
            return Ok(AddOutcome::Inserted);
        }

        let oldest_seen = inner.entries.first().map_or(0, |e| e.last_seen);
        if location.last_seen <= oldest_seen {
            return Ok(AddOutcome::Ignored);
        }
        let evicted = inner.entries.remove(0);
        inner.insert_sorted(location);
        tracing::trace!(
            hash = %self.hash.short(),
            evicted = %evicted.address,
            "altloc collection full, evicted oldest"
        );
        Ok(AddOutcome::Evicted(evicted.address))
    }

    /// Merge every entry of `other`. Entries are applied in ascending
    /// (`last_seen`, address) order, so the result does not depend on how
    /// `other` happens to be ordered. Returns how many entries changed this
    /// collection.
    pub fn add_all(&self, other: &AlternateLocationCollection) -> Result<usize, AltLocError> {
        if other.hash != self.hash {
            return Err(AltLocError::HashMismatch {
                expected: self.hash,
                actual: other.hash,
            });
        }
        self.add_locations(other.locations())
    }

    /// Merge a batch of locations in deterministic order.
    pub fn add_locations(
        &self,
        mut locations: Vec<AlternateLocation>,
    ) -> Result<usize, AltLocError> {
        locations.sort_by_key(|l| (l.last_seen, l.address));
        let mut changed = 0;
        for location in locations {
            if self.add(location)?.changed() {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Remove a source and remember it so stale reports cannot bring it back.
    /// Returns true if it was present.
    pub fn remove(&self, location: &AlternateLocation) -> bool {
        if location.hash != self.hash {
            return false;
        }
        let mut inner = self.inner.write();
        let mut stamp = location.last_seen;
        let present = match inner.position(&location.address) {
            Some(pos) => {
                stamp = stamp.max(inner.entries.remove(pos).last_seen);
                true
            }
            None => false,
        };
        inner.remember_removed(location.address, stamp, self.max_removed);
        present
    }

    pub fn was_removed(&self, addr: &PeerAddress) -> bool {
        self.inner.read().removed.contains_key(addr)
    }

    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.inner.read().position(addr).is_some()
    }

    /// Locations here that `other` does not have.
    pub fn diff(&self, other: &AlternateLocationCollection) -> Vec<AlternateLocation> {
        let theirs = other.inner.read();
        let known: std::collections::HashSet<PeerAddress> =
            theirs.entries.iter().map(|e| e.address).collect();
        drop(theirs);
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| !known.contains(&e.address))
            .cloned()
            .collect()
    }

    /// Drop entries last seen before `cutoff_ms`. Returns how many went.
    pub fn expire_older_than(&self, cutoff_ms: u64) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.last_seen >= cutoff_ms);
        before - inner.entries.len()
    }

    /// Snapshot in render order.
    pub fn locations(&self) -> Vec<AlternateLocation> {
        self.inner.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Comma-separated header value, rendered from the live contents.
    pub fn render(&self) -> String {
        let inner = self.inner.read();
        let tokens: Vec<String> = inner.entries.iter().map(AlternateLocation::render).collect();
        tokens.join(",")
    }
}

impl fmt::Debug for AlternateLocationCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlternateLocationCollection")
            .field("hash", &self.hash)
            .field("len", &self.len())
            .field("max_locations", &self.max_locations)
            .finish()
    }
}

//! UDP reply handler cache.
//!
//! Every inbound datagram needs a reply handle for its source address: the
//! routing context that knows where answers go and which filters apply. The
//! cache keeps one handler per address so a chatty peer does not rebuild that
//! context on every packet.
//!
//! Filters live in one shared slot: `RwLock<Arc<FilterSet>>`. Handlers hold a
//! reference to the slot, not to a filter, so a swap is seen by every handler
//! at once. A decision reads the slot once and evaluates both filters from
//! that snapshot, so it is never half old and half new.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use peerwire_core::PeerAddress;

use crate::filter::SpamFilter;

/// Outbound datagram queue, drained by the UDP send worker.
pub type OutboundTx = mpsc::UnboundedSender<(PeerAddress, Bytes)>;
pub type OutboundRx = mpsc::UnboundedReceiver<(PeerAddress, Bytes)>;

/// The process-wide filter and the cache's personal filter, swapped together.
#[derive(Debug)]
pub struct FilterSet {
    pub global: Arc<SpamFilter>,
    pub personal: Arc<SpamFilter>,
}

impl FilterSet {
    pub fn allow(&self, addr: &PeerAddress) -> bool {
        self.global.allow(addr) && self.personal.allow(addr)
    }
}

type FilterSlot = Arc<RwLock<Arc<FilterSet>>>;

// ── Handler ───────────────────────────────────────────────────────────────────

/// Reply-routing context for one remote UDP address.
pub struct UdpReplyHandler {
    addr: PeerAddress,
    filters: FilterSlot,
    outbound: OutboundTx,
    dropped: AtomicU64,
    /// Milliseconds since the owning cache's epoch.
    last_used: AtomicU64,
    epoch: Instant,
}

impl UdpReplyHandler {
    pub fn address(&self) -> PeerAddress {
        self.addr
    }

    /// Consistent snapshot of the filters in force right now.
    pub fn filters(&self) -> Arc<FilterSet> {
        self.filters.read().clone()
    }

    /// Should traffic from this address be processed?
    pub fn allow(&self) -> bool {
        self.filters().allow(&self.addr)
    }

    pub fn is_spam(&self) -> bool {
        !self.allow()
    }

    pub fn count_dropped_message(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue a datagram back to this address. Returns false if the send
    /// worker is gone.
    pub fn reply(&self, datagram: Bytes) -> bool {
        if self.outbound.send((self.addr, datagram)).is_err() {
            tracing::debug!(peer = %self.addr, "outbound queue closed, reply dropped");
            return false;
        }
        true
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_used.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_used.load(Ordering::Relaxed)))
    }
}

impl std::fmt::Debug for UdpReplyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpReplyHandler")
            .field("addr", &self.addr)
            .field("dropped", &self.dropped_messages())
            .finish()
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

pub struct UdpReplyHandlerCache {
    handlers: DashMap<PeerAddress, Arc<UdpReplyHandler>>,
    filters: FilterSlot,
    outbound: OutboundTx,
    epoch: Instant,
}

impl UdpReplyHandlerCache {
    /// New cache accepting everything until filters are installed.
    pub fn new(outbound: OutboundTx) -> Self {
        Self::with_filters(
            outbound,
            Arc::new(SpamFilter::allow_all()),
            Arc::new(SpamFilter::allow_all()),
        )
    }

    pub fn with_filters(
        outbound: OutboundTx,
        global: Arc<SpamFilter>,
        personal: Arc<SpamFilter>,
    ) -> Self {
        Self {
            handlers: DashMap::new(),
            filters: Arc::new(RwLock::new(Arc::new(FilterSet { global, personal }))),
            outbound,
            epoch: Instant::now(),
        }
    }

    /// Handler for `addr`, created on first access.
    pub fn get_udp_reply_handler(&self, addr: PeerAddress) -> Arc<UdpReplyHandler> {
        if let Some(handler) = self.handlers.get(&addr) {
            handler.touch();
            return handler.value().clone();
        }
        let handler = self
            .handlers
            .entry(addr)
            .or_insert_with(|| {
                tracing::trace!(peer = %addr, "new udp reply handler");
                Arc::new(UdpReplyHandler {
                    addr,
                    filters: self.filters.clone(),
                    outbound: self.outbound.clone(),
                    dropped: AtomicU64::new(0),
                    last_used: AtomicU64::new(0),
                    epoch: self.epoch,
                })
            })
            .value()
            .clone();
        handler.touch();
        handler
    }

    /// Replace the personal filter for every handler from this cache.
    pub fn set_personal_filter(&self, filter: Arc<SpamFilter>) {
        let mut slot = self.filters.write();
        let global = slot.global.clone();
        *slot = Arc::new(FilterSet {
            global,
            personal: filter,
        });
        tracing::debug!("personal filter replaced");
    }

    pub fn personal_filter(&self) -> Arc<SpamFilter> {
        self.filters.read().personal.clone()
    }

    /// Replace the process-wide filter. Called by `SpamServices`.
    pub fn set_global_filter(&self, filter: Arc<SpamFilter>) {
        let mut slot = self.filters.write();
        let personal = slot.personal.clone();
        *slot = Arc::new(FilterSet {
            global: filter,
            personal,
        });
    }

    /// Replace both filters in one swap.
    pub fn set_filters(&self, global: Arc<SpamFilter>, personal: Arc<SpamFilter>) {
        *self.filters.write() = Arc::new(FilterSet { global, personal });
    }

    pub fn global_filter(&self) -> Arc<SpamFilter> {
        self.filters.read().global.clone()
    }

    pub fn filters(&self) -> Arc<FilterSet> {
        self.filters.read().clone()
    }

    /// Drop every cached handler. Filters are untouched.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Drop handlers not looked up within `max_idle`. Returns how many went.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let before = self.handlers.len();
        self.handlers
            .retain(|_, handler| handler.idle_for(now_ms) < max_idle);
        before.saturating_sub(self.handlers.len())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

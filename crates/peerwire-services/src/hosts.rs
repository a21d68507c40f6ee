//! Pool of hosts learned from pongs, handed out for outbound connections.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use peerwire_core::PeerAddress;

use crate::events::{CoreEvent, EventSink};

#[derive(Default)]
struct Pool {
    queue: VecDeque<PeerAddress>,
    known: HashSet<PeerAddress>,
}

pub struct HostPool {
    pool: Mutex<Pool>,
    max_hosts: usize,
    events: EventSink,
}

impl HostPool {
    pub fn new(max_hosts: usize, events: EventSink) -> Self {
        Self {
            pool: Mutex::new(Pool::default()),
            max_hosts,
            events,
        }
    }

    /// Add a host. Duplicates and unusable addresses are ignored; when full
    /// the oldest host is dropped. Returns true if the host is new.
    pub fn add_host(&self, host: PeerAddress) -> bool {
        if !host.is_valid() || self.max_hosts == 0 {
            return false;
        }
        {
            let mut pool = self.pool.lock();
            if !pool.known.insert(host) {
                return false;
            }
            pool.queue.push_back(host);
            while pool.queue.len() > self.max_hosts {
                if let Some(old) = pool.queue.pop_front() {
                    pool.known.remove(&old);
                }
            }
        }
        self.events.emit(CoreEvent::HostDiscovered { host });
        true
    }

    /// Next host to try, newest first. Emits `NoHostsToUse` when empty.
    pub fn next_host(&self) -> Option<PeerAddress> {
        let next = {
            let mut pool = self.pool.lock();
            let next = pool.queue.pop_back();
            if let Some(host) = &next {
                pool.known.remove(host);
            }
            next
        };
        if next.is_none() {
            tracing::debug!("host pool exhausted");
            self.events.emit(CoreEvent::NoHostsToUse);
        }
        next
    }

    pub fn len(&self) -> usize {
        self.pool.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.lock().queue.is_empty()
    }
}

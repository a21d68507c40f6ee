//! Upload slot accounting.
//!
//! Two limits: uploads per remote host, and uploads in total. A slot is an
//! RAII guard; dropping it gives the capacity back.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use peerwire_core::{ErrorKind, PeerAddress};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("host {host} already has {limit} uploads")]
    PerHostLimit { host: IpAddr, limit: usize },
    #[error("all {limit} upload slots in use")]
    TotalLimit { limit: usize },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ResourceLimit
    }
}

#[derive(Default)]
struct State {
    per_host: HashMap<IpAddr, usize>,
    active: usize,
}

struct Shared {
    per_host_limit: usize,
    total_limit: usize,
    state: Mutex<State>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UploadStats {
    pub active: usize,
    pub hosts: usize,
    pub per_host_limit: usize,
    pub total_limit: usize,
}

#[derive(Clone)]
pub struct UploadSlots {
    shared: Arc<Shared>,
}

impl UploadSlots {
    pub fn new(per_host_limit: usize, total_limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                per_host_limit,
                total_limit,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Claim a slot for `addr`. Only the host part counts toward the
    /// per-host limit.
    pub fn acquire(&self, addr: &PeerAddress) -> Result<UploadSlot, UploadError> {
        let host = addr.host();
        let mut state = self.shared.state.lock();

        let current = state.per_host.get(&host).copied().unwrap_or(0);
        if current >= self.shared.per_host_limit {
            tracing::debug!(host = %host, current, "per-host upload limit reached");
            return Err(UploadError::PerHostLimit {
                host,
                limit: self.shared.per_host_limit,
            });
        }
        if state.active >= self.shared.total_limit {
            tracing::debug!(active = state.active, "total upload limit reached");
            return Err(UploadError::TotalLimit {
                limit: self.shared.total_limit,
            });
        }

        *state.per_host.entry(host).or_insert(0) += 1;
        state.active += 1;
        Ok(UploadSlot {
            host,
            shared: self.shared.clone(),
        })
    }

    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    pub fn stats(&self) -> UploadStats {
        let state = self.shared.state.lock();
        UploadStats {
            active: state.active,
            hosts: state.per_host.len(),
            per_host_limit: self.shared.per_host_limit,
            total_limit: self.shared.total_limit,
        }
    }
}

/// A held upload slot.
pub struct UploadSlot {
    host: IpAddr,
    shared: Arc<Shared>,
}

impl UploadSlot {
    pub fn host(&self) -> IpAddr {
        self.host
    }
}

impl Drop for UploadSlot {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.active = state.active.saturating_sub(1);
        if let Some(n) = state.per_host.get_mut(&self.host) {
            *n -= 1;
            if *n == 0 {
                state.per_host.remove(&self.host);
            }
        }
    }
}

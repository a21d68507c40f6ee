//! Query-key MAC secrets.
//!
//! A query key is a keyed BLAKE3 MAC over a peer's address. Handing one out
//! proves to us later that the peer really receives datagrams at that
//! address. The secret rotates every `rotation` period; keys minted with the
//! previous secret stay valid for `grace` after the rotation.
//!
//! Both durations come from settings. This module only consumes them.

use std::time::{Duration, Instant};

use crate::address::PeerAddress;
use crate::wire::QUERY_KEY_LEN;

pub type QueryKey = [u8; QUERY_KEY_LEN];

struct Secret {
    key: [u8; 32],
    created_at: Instant,
}

struct Retired {
    key: [u8; 32],
    retired_at: Instant,
}

pub struct MacKeyRing {
    current: Secret,
    previous: Option<Retired>,
    rotation: Duration,
    grace: Duration,
}

impl MacKeyRing {
    /// Start with a fresh random secret.
    pub fn new(rotation: Duration, grace: Duration) -> Self {
        Self::with_secret(rand::random(), rotation, grace, Instant::now())
    }

    pub fn with_secret(key: [u8; 32], rotation: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            current: Secret {
                key,
                created_at: now,
            },
            previous: None,
            rotation,
            grace,
        }
    }

    /// Key for `addr` under the current secret.
    pub fn query_key(&self, addr: &PeerAddress) -> QueryKey {
        mac(&self.current.key, addr)
    }

    /// Accepts keys from the current secret, or from the previous one while
    /// its grace period lasts.
    pub fn verify_at(&self, addr: &PeerAddress, key: &QueryKey, now: Instant) -> bool {
        if ct_eq(&mac(&self.current.key, addr), key) {
            return true;
        }
        match &self.previous {
            Some(old) if now.duration_since(old.retired_at) < self.grace => {
                ct_eq(&mac(&old.key, addr), key)
            }
            _ => false,
        }
    }

    pub fn verify(&self, addr: &PeerAddress, key: &QueryKey) -> bool {
        self.verify_at(addr, key, Instant::now())
    }

    /// Rotate if the current secret is older than the rotation interval.
    /// Returns true when a rotation happened.
    pub fn rotate_if_due_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.current.created_at) < self.rotation {
            return false;
        }
        self.rotate_to(rand::random(), now);
        true
    }

    pub fn rotate_if_due(&mut self) -> bool {
        self.rotate_if_due_at(Instant::now())
    }

    /// Install `key` as the current secret, retiring the old one.
    pub fn rotate_to(&mut self, key: [u8; 32], now: Instant) {
        let old = std::mem::replace(
            &mut self.current,
            Secret {
                key,
                created_at: now,
            },
        );
        self.previous = Some(Retired {
            key: old.key,
            retired_at: now,
        });
    }

    pub fn rotation(&self) -> Duration {
        self.rotation
    }
}

fn mac(key: &[u8; 32], addr: &PeerAddress) -> QueryKey {
    let mut input = addr.ip_bytes();
    input.extend_from_slice(&addr.port().to_be_bytes());
    let full = blake3::keyed_hash(key, &input);
    let mut out = [0u8; QUERY_KEY_LEN];
    out.copy_from_slice(&full.as_bytes()[..QUERY_KEY_LEN]);
    out
}

fn ct_eq(a: &QueryKey, b: &QueryKey) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

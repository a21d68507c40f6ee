//! Routes inbound UDP messages to handlers by message kind.
//!
//! Handlers are bound once at startup through a `MessageHandlerBinder`;
//! binding the same kind twice is an error. After binding the router is
//! shared behind an `Arc` and only read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use peerwire_core::{ErrorKind, Message, MessageKind, PeerAddress};

use crate::reply_cache::{UdpReplyHandler, UdpReplyHandlerCache};

/// Handles one kind of inbound message.
pub trait MessageHandler: Send + Sync {
    /// `from` is the datagram's source. Reply through `reply`.
    fn handle_message(
        &self,
        message: &Message,
        from: PeerAddress,
        reply: &UdpReplyHandler,
    ) -> anyhow::Result<()>;
}

/// Installs a set of handlers on a router.
pub trait MessageHandlerBinder {
    fn bind(&self, router: &mut MessageRouter) -> Result<(), RouterError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("a handler is already bound for {0}")]
    AlreadyBound(MessageKind),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Failed
    }
}

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled,
    /// Valid message, no handler bound for its kind.
    Unhandled,
    /// Dropped by the spam filter.
    Spam,
    /// Did not decode.
    Malformed,
    /// The handler returned an error.
    HandlerFailed,
}

#[derive(Default)]
struct RouterStats {
    received: AtomicU64,
    handled: AtomicU64,
    unhandled: AtomicU64,
    spam: AtomicU64,
    malformed: AtomicU64,
    handler_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub unhandled: u64,
    pub spam: u64,
    pub malformed: u64,
    pub handler_errors: u64,
}

pub struct MessageRouter {
    handlers: HashMap<MessageKind, Arc<dyn MessageHandler>>,
    reply_cache: Arc<UdpReplyHandlerCache>,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new(reply_cache: Arc<UdpReplyHandlerCache>) -> Self {
        Self {
            handlers: HashMap::new(),
            reply_cache,
            stats: RouterStats::default(),
        }
    }

    /// Associate `kind` with `handler`.
    pub fn set_udp_message_handler(
        &mut self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RouterError> {
        if self.handlers.contains_key(&kind) {
            return Err(RouterError::AlreadyBound(kind));
        }
        self.handlers.insert(kind, handler);
        tracing::debug!(kind = %kind, "udp handler bound");
        Ok(())
    }

    pub fn udp_message_handler(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn bind(&mut self, binder: &dyn MessageHandlerBinder) -> Result<(), RouterError> {
        binder.bind(self)
    }

    pub fn bound_kinds(&self) -> Vec<MessageKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn reply_cache(&self) -> &Arc<UdpReplyHandlerCache> {
        &self.reply_cache
    }

    /// Full receive path for one datagram. Never fails: every problem is
    /// logged, counted, and reported as the outcome.
    pub fn route_udp(&self, datagram: &[u8], from: PeerAddress) -> RouteOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let message = match Message::decode(datagram) {
            Ok(m) => m,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(peer = %from, error = %e, "discarding malformed datagram");
                return RouteOutcome::Malformed;
            }
        };

        let reply = self.reply_cache.get_udp_reply_handler(from);
        self.handle_udp_message(&message, &reply)
    }

    /// Dispatch an already-decoded message.
    pub fn handle_udp_message(&self, message: &Message, reply: &UdpReplyHandler) -> RouteOutcome {
        let from = reply.address();
        if reply.is_spam() {
            reply.count_dropped_message();
            self.stats.spam.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(peer = %from, kind = %message.kind(), "dropping message from filtered address");
            return RouteOutcome::Spam;
        }

        let Some(handler) = self.handlers.get(&message.kind()) else {
            self.stats.unhandled.fetch_add(1, Ordering::Relaxed);
            return RouteOutcome::Unhandled;
        };

        match handler.handle_message(message, from, reply) {
            Ok(()) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Handled
            }
            Err(e) => {
                self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    peer = %from,
                    kind = %message.kind(),
                    error = %e,
                    "udp handler failed"
                );
                RouteOutcome::HandlerFailed
            }
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        let s = &self.stats;
        RouterStatsSnapshot {
            received: s.received.load(Ordering::Relaxed),
            handled: s.handled.load(Ordering::Relaxed),
            unhandled: s.unhandled.load(Ordering::Relaxed),
            spam: s.spam.load(Ordering::Relaxed),
            malformed: s.malformed.load(Ordering::Relaxed),
            handler_errors: s.handler_errors.load(Ordering::Relaxed),
        }
    }
}

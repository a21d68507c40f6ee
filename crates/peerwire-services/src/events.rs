//! Core events for collaborators outside the routing core.
//!
//! Components emit onto an unbounded mpsc channel and never wait on the
//! consumer. A disabled sink drops everything.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;

use peerwire_core::{ContentHash, PeerAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FileEvent {
    Added { path: PathBuf, hash: ContentHash },
    Removed { path: PathBuf },
    HashFailed { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    File(FileEvent),
    HostDiscovered { host: PeerAddress },
    NoHostsToUse,
    /// Hash results for a file. An empty set means hashing failed.
    UrnsCalculated {
        file: PathBuf,
        urns: BTreeSet<ContentHash>,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<CoreEvent>;

#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<CoreEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("event receiver gone");
            }
        }
    }
}

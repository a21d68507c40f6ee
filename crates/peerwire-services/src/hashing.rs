//! URN calculation for shared files.
//!
//! Hashing reads the whole file, so it runs on the blocking pool. The result
//! is always reported as a `UrnsCalculated` event; an empty set means the
//! file could not be hashed.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dashmap::DashMap;

use peerwire_core::ContentHash;

use crate::events::{CoreEvent, EventSink, FileEvent};

const READ_BUF: usize = 64 * 1024;

/// BLAKE3 of a file, streamed.
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash::from_bytes(*hasher.finalize().as_bytes()))
}

/// Files we share, keyed by path.
#[derive(Clone)]
pub struct SharedFiles {
    files: std::sync::Arc<DashMap<PathBuf, ContentHash>>,
    events: EventSink,
}

impl SharedFiles {
    pub fn new(events: EventSink) -> Self {
        Self {
            files: std::sync::Arc::new(DashMap::new()),
            events,
        }
    }

    /// Hash `path` and start sharing it. Emits `UrnsCalculated` either way,
    /// then `FileEvent::Added` or `FileEvent::HashFailed`.
    pub async fn calculate_urns(&self, path: PathBuf) -> BTreeSet<ContentHash> {
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || hash_file(&target))
            .await
            .context("hash task panicked")
            .and_then(|r| r);

        let mut urns = BTreeSet::new();
        match result {
            Ok(hash) => {
                urns.insert(hash);
                self.files.insert(path.clone(), hash);
                tracing::debug!(path = %path.display(), hash = %hash.short(), "file hashed");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "hashing failed");
            }
        }

        self.events.emit(CoreEvent::UrnsCalculated {
            file: path.clone(),
            urns: urns.clone(),
        });
        let file_event = match urns.iter().next() {
            Some(hash) => FileEvent::Added { path, hash: *hash },
            None => FileEvent::HashFailed { path },
        };
        self.events.emit(CoreEvent::File(file_event));
        urns
    }

    pub fn remove(&self, path: &Path) -> Option<ContentHash> {
        let (path, hash) = self.files.remove(path)?;
        self.events.emit(CoreEvent::File(FileEvent::Removed { path }));
        Some(hash)
    }

    pub fn hash_of(&self, path: &Path) -> Option<ContentHash> {
        self.files.get(path).map(|h| *h.value())
    }

    pub fn is_shared(&self, hash: &ContentHash) -> bool {
        self.files.iter().any(|e| e.value() == hash)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

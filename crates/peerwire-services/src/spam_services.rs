//! Spam services: builds filters from settings and the IP range file, and
//! pushes them into every live reply cache.
//!
//! The range file is read on the blocking pool inside a spawned task, bounded
//! by the configured reload timeout. A failed or timed-out reload leaves the
//! filters that were already installed in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use peerwire_core::config::FilterConfig;
use peerwire_core::ErrorKind;

use crate::filter::{IpRangeSet, RangeLoad, SpamFilter};
use crate::reply_cache::UdpReplyHandlerCache;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("failed to read IP filter {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("IP filter reload did not finish within {0:?}")]
    Timeout(Duration),
    #[error("IP filter reload task failed: {0}")]
    Task(String),
    #[error("no IP filter file configured")]
    NoSource,
}

impl FilterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FilterError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    /// Networks loaded from the file, after aggregation.
    pub ranges: usize,
    /// Lines that did not parse.
    pub skipped: usize,
    /// Caches that received the new filter.
    pub caches: usize,
}

pub struct SpamServices {
    settings: RwLock<FilterConfig>,
    ranges: RwLock<Arc<IpRangeSet>>,
    caches: Mutex<Vec<Weak<UdpReplyHandlerCache>>>,
    global: RwLock<Arc<SpamFilter>>,
    personal: RwLock<Arc<SpamFilter>>,
}

impl SpamServices {
    pub fn new(settings: FilterConfig) -> Self {
        let services = Self {
            settings: RwLock::new(settings),
            ranges: RwLock::new(Arc::new(IpRangeSet::default())),
            caches: Mutex::new(Vec::new()),
            global: RwLock::new(Arc::new(SpamFilter::allow_all())),
            personal: RwLock::new(Arc::new(SpamFilter::allow_all())),
        };
        services.rebuild();
        services
    }

    /// Track a cache and install the current filters on it.
    pub fn register_cache(&self, cache: &Arc<UdpReplyHandlerCache>) {
        cache.set_filters(self.global_filter(), self.personal_filter());
        self.caches.lock().push(Arc::downgrade(cache));
    }

    /// Swap the settings used by the next `adjust_spam_filters`.
    pub fn update_settings(&self, settings: FilterConfig) {
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> FilterConfig {
        self.settings.read().clone()
    }

    pub fn global_filter(&self) -> Arc<SpamFilter> {
        self.global.read().clone()
    }

    pub fn personal_filter(&self) -> Arc<SpamFilter> {
        self.personal.read().clone()
    }

    /// Rebuild both filters from settings and loaded ranges and install
    /// them in every live cache. Returns how many caches were updated.
    pub fn adjust_spam_filters(&self) -> usize {
        let (global, personal) = self.rebuild();
        let mut caches = self.caches.lock();
        caches.retain(|weak| weak.strong_count() > 0);
        for cache in caches.iter().filter_map(Weak::upgrade) {
            cache.set_filters(global.clone(), personal.clone());
        }
        tracing::debug!(
            caches = caches.len(),
            deny = global.deny_len(),
            allow = global.allow_len(),
            "spam filters adjusted"
        );
        caches.len()
    }

    fn rebuild(&self) -> (Arc<SpamFilter>, Arc<SpamFilter>) {
        let settings = self.settings.read();
        let deny = IpRangeSet::from_rules(settings.deny.iter().map(String::as_str));
        let allow = IpRangeSet::from_rules(settings.allow.iter().map(String::as_str));
        let personal = IpRangeSet::from_rules(settings.personal_deny.iter().map(String::as_str));
        let skipped = deny.skipped + allow.skipped + personal.skipped;
        if skipped > 0 {
            tracing::warn!(skipped, "ignoring unparseable filter rules in settings");
        }

        let ranges = self.ranges.read().clone();
        let global = Arc::new(SpamFilter::new(deny.set.union(&ranges), allow.set));
        let personal = Arc::new(SpamFilter::new(personal.set, IpRangeSet::default()));
        *self.global.write() = global.clone();
        *self.personal.write() = personal.clone();
        (global, personal)
    }

    /// Reload the IP range file in the background, then adjust filters.
    /// The receive path never waits on the returned handle.
    pub fn reload_ip_filter(self: &Arc<Self>) -> JoinHandle<Result<ReloadReport, FilterError>> {
        let (path, timeout) = {
            let settings = self.settings.read();
            (settings.ip_filter_path.clone(), settings.reload_timeout())
        };
        self.reload_with(timeout, move || read_range_file(&path))
    }

    /// Run `load` on the blocking pool, bounded by `timeout`.
    pub fn reload_with<F>(
        self: &Arc<Self>,
        timeout: Duration,
        load: F,
    ) -> JoinHandle<Result<ReloadReport, FilterError>>
    where
        F: FnOnce() -> Result<RangeLoad, FilterError> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let task = tokio::task::spawn_blocking(load);
            let loaded = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(FilterError::Task(e.to_string())),
                Err(_) => Err(FilterError::Timeout(timeout)),
            };

            let load = match loaded {
                Ok(load) => load,
                Err(e) => {
                    tracing::warn!(error = %e, "IP filter reload failed, keeping previous filter");
                    return Err(e);
                }
            };

            let ranges = load.set.len();
            *this.ranges.write() = Arc::new(load.set);
            let caches = this.adjust_spam_filters();
            tracing::info!(ranges, skipped = load.skipped, caches, "IP filter reloaded");
            Ok(ReloadReport {
                ranges,
                skipped: load.skipped,
                caches,
            })
        })
    }
}

/// Read and parse an IP range file.
pub fn read_range_file(path: &Path) -> Result<RangeLoad, FilterError> {
    if path.as_os_str().is_empty() {
        return Err(FilterError::NoSource);
    }
    let text = std::fs::read_to_string(path).map_err(|source| FilterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(IpRangeSet::parse(&text))
}

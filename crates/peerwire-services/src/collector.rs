//! Alternate-location collectors.
//!
//! `AlternateLocationCollector` is the capability of anything that accepts
//! and exposes alternate locations. A plain collection is one; a `SourceSet`
//! is another, whose firewalled entries render with their push proxies.
//! `AltLocManager` maps each content hash to its shared `SourceSet`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use peerwire_core::{ContentHash, PeerAddress};

use crate::altloc::{AddOutcome, AltLocError, AlternateLocation, AlternateLocationCollection};
use crate::push_proxy::PushProxyRegistry;

/// Something that renders as an HTTP header value.
pub trait HttpHeaderValue {
    /// Rendered from the live contents at call time. Empty when there is
    /// nothing to say; callers omit the header then.
    fn http_string_value(&self) -> String;
}

pub trait AlternateLocationCollector: HttpHeaderValue + Send + Sync {
    fn content_hash(&self) -> ContentHash;

    fn add_alternate_location(
        &self,
        location: AlternateLocation,
    ) -> Result<AddOutcome, AltLocError>;

    /// Merge every entry of `other`. Returns how many entries changed.
    fn add_alternate_location_collection(
        &self,
        other: &AlternateLocationCollection,
    ) -> Result<usize, AltLocError>;

    fn number_of_alternate_locations(&self) -> usize;

    fn has_alternate_locations(&self) -> bool {
        self.number_of_alternate_locations() > 0
    }
}

impl HttpHeaderValue for AlternateLocationCollection {
    fn http_string_value(&self) -> String {
        self.render()
    }
}

impl AlternateLocationCollector for AlternateLocationCollection {
    fn content_hash(&self) -> ContentHash {
        self.hash()
    }

    fn add_alternate_location(
        &self,
        location: AlternateLocation,
    ) -> Result<AddOutcome, AltLocError> {
        self.add(location)
    }

    fn add_alternate_location_collection(
        &self,
        other: &AlternateLocationCollection,
    ) -> Result<usize, AltLocError> {
        self.add_all(other)
    }

    fn number_of_alternate_locations(&self) -> usize {
        self.len()
    }
}

// ── Source sets ───────────────────────────────────────────────────────────────

/// All known sources for one hash, direct and firewalled alike.
///
/// One bounded collection holds both kinds, so identity, age and the size
/// cap are judged across every source of the hash. Firewalled entries render
/// with their live push proxies.
pub struct SourceSet {
    sources: AlternateLocationCollection,
    proxies: Arc<PushProxyRegistry>,
}

impl SourceSet {
    pub fn new(
        hash: ContentHash,
        max_locations: usize,
        max_removed: usize,
        proxies: Arc<PushProxyRegistry>,
    ) -> Self {
        Self {
            sources: AlternateLocationCollection::with_limits(hash, max_locations, max_removed),
            proxies,
        }
    }

    pub fn sources(&self) -> &AlternateLocationCollection {
        &self.sources
    }

    /// Snapshot of the directly reachable sources.
    pub fn direct(&self) -> Vec<AlternateLocation> {
        self.filtered(false)
    }

    /// Snapshot of the sources that need a push.
    pub fn firewalled(&self) -> Vec<AlternateLocation> {
        self.filtered(true)
    }

    fn filtered(&self, firewalled: bool) -> Vec<AlternateLocation> {
        self.sources
            .locations()
            .into_iter()
            .filter(|l| l.is_firewalled() == firewalled)
            .collect()
    }

    /// Add a firewalled source along with the proxies it announced.
    pub fn add_with_proxies(
        &self,
        location: AlternateLocation,
        proxies: &[PeerAddress],
    ) -> Result<AddOutcome, AltLocError> {
        let address = location.address();
        let firewalled = location.is_firewalled();
        let outcome = self.sources.add(location)?;
        if firewalled && outcome.changed() && !proxies.is_empty() {
            self.proxies.register_all(address, proxies.iter().copied());
        }
        Ok(outcome)
    }

    /// Merge a header value, registering any proxies listed for firewalled
    /// sources. Bad tokens are skipped. Returns how many entries changed.
    pub fn add_http_value(&self, value: &str, last_seen: u64) -> usize {
        let hash = self.sources.hash();
        let mut changed = 0;
        for token in value.split(',').filter(|t| !t.trim().is_empty()) {
            match AlternateLocation::parse_http_token(hash, token, last_seen) {
                Ok((location, proxies)) => {
                    if matches!(self.add_with_proxies(location, &proxies), Ok(o) if o.changed()) {
                        changed += 1;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "skipping altloc token"),
            }
        }
        changed
    }

    /// Remove a source that failed us.
    pub fn remove(&self, location: &AlternateLocation) -> bool {
        self.sources.remove(location)
    }

    /// Drop entries not seen since `cutoff_ms`.
    pub fn expire_older_than(&self, cutoff_ms: u64) -> usize {
        self.sources.expire_older_than(cutoff_ms)
    }

    /// Ascending `last_seen`, taken under one lock.
    pub fn locations(&self) -> Vec<AlternateLocation> {
        self.sources.locations()
    }

    fn render_location(&self, location: &AlternateLocation) -> String {
        let mut token = location.render();
        if location.is_firewalled() {
            for proxy in self.proxies.proxies(&location.address()) {
                token.push(';');
                token.push_str(&proxy.to_string());
            }
        }
        token
    }
}

impl HttpHeaderValue for SourceSet {
    fn http_string_value(&self) -> String {
        let tokens: Vec<String> = self
            .locations()
            .iter()
            .map(|l| self.render_location(l))
            .collect();
        tokens.join(",")
    }
}

impl AlternateLocationCollector for SourceSet {
    fn content_hash(&self) -> ContentHash {
        self.sources.hash()
    }

    fn add_alternate_location(
        &self,
        location: AlternateLocation,
    ) -> Result<AddOutcome, AltLocError> {
        self.sources.add(location)
    }

    fn add_alternate_location_collection(
        &self,
        other: &AlternateLocationCollection,
    ) -> Result<usize, AltLocError> {
        self.sources.add_all(other)
    }

    fn number_of_alternate_locations(&self) -> usize {
        self.sources.len()
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Content hash → its sources. Shared by the router and the API.
pub struct AltLocManager {
    sets: DashMap<ContentHash, Arc<SourceSet>>,
    max_locations: usize,
    max_removed: usize,
    proxies: Arc<PushProxyRegistry>,
}

impl AltLocManager {
    pub fn new(max_locations: usize, max_removed: usize, proxies: Arc<PushProxyRegistry>) -> Self {
        Self {
            sets: DashMap::new(),
            max_locations,
            max_removed,
            proxies,
        }
    }

    /// Source set for `hash`, created on first use.
    pub fn collection(&self, hash: ContentHash) -> Arc<SourceSet> {
        if let Some(set) = self.sets.get(&hash) {
            return set.value().clone();
        }
        self.sets
            .entry(hash)
            .or_insert_with(|| {
                Arc::new(SourceSet::new(
                    hash,
                    self.max_locations,
                    self.max_removed,
                    self.proxies.clone(),
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, hash: &ContentHash) -> Option<Arc<SourceSet>> {
        self.sets.get(hash).map(|s| s.value().clone())
    }

    pub fn add(&self, location: AlternateLocation) -> Result<AddOutcome, AltLocError> {
        self.collection(location.hash()).add_alternate_location(location)
    }

    pub fn proxies(&self) -> &Arc<PushProxyRegistry> {
        &self.proxies
    }

    /// Drop sources older than `max_age`, and any set left empty.
    pub fn expire_stale(&self, max_age: Duration) -> usize {
        let cutoff = peerwire_core::now_millis().saturating_sub(max_age.as_millis() as u64);
        self.expire_before(cutoff)
    }

    /// An empty set is only dropped when the map holds the last reference.
    /// Anyone holding a set from `collection()` may still add to it, and
    /// those adds must stay visible through the map.
    pub fn expire_before(&self, cutoff_ms: u64) -> usize {
        let mut expired = 0;
        self.sets.retain(|_, set| {
            expired += set.expire_older_than(cutoff_ms);
            set.has_alternate_locations() || Arc::strong_count(set) > 1
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn hashes(&self) -> Vec<ContentHash> {
        self.sets.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ContentHash {
        ContentHash::of(b"collected")
    }

    fn registry() -> Arc<PushProxyRegistry> {
        Arc::new(PushProxyRegistry::new(Duration::from_secs(600), 4))
    }

    fn loc(s: &str, t: u64) -> AlternateLocation {
        AlternateLocation::new(hash(), s.parse().unwrap(), t)
    }

    #[test]
    fn collection_is_a_collector() {
        let c = AlternateLocationCollection::new(hash());
        let collector: &dyn AlternateLocationCollector = &c;
        assert!(!collector.has_alternate_locations());
        assert_eq!(collector.http_string_value(), "");
        collector.add_alternate_location(loc("1.2.3.4:6346", 1)).unwrap();
        assert!(collector.has_alternate_locations());
        assert_eq!(collector.http_string_value(), "1.2.3.4:6346");
    }

    #[test]
    fn source_set_renders_firewalled_with_proxies() {
        let proxies = registry();
        let set = SourceSet::new(hash(), 10, 10, proxies.clone());
        set.add_alternate_location(loc("1.1.1.1:1", 1).with_tls(true)).unwrap();
        set.add_with_proxies(
            loc("2.2.2.2:2", 2).with_firewalled(true),
            &["7.7.7.7:7".parse().unwrap()],
        )
        .unwrap();
        set.add_alternate_location(loc("3.3.3.3:3", 3)).unwrap();

        assert_eq!(set.number_of_alternate_locations(), 3);
        assert_eq!(
            set.http_string_value(),
            "1.1.1.1:1;tls,2.2.2.2:2;fw;7.7.7.7:7,3.3.3.3:3"
        );

        proxies.mark_directly_reachable(&"2.2.2.2:2".parse().unwrap());
        assert_eq!(
            set.http_string_value(),
            "1.1.1.1:1;tls,2.2.2.2:2;fw,3.3.3.3:3"
        );
    }

    #[test]
    fn newer_report_flips_firewalled_flag() {
        let set = SourceSet::new(hash(), 10, 10, registry());
        set.add_alternate_location(loc("1.1.1.1:1", 1)).unwrap();
        let outcome = set
            .add_alternate_location(loc("1.1.1.1:1", 2).with_firewalled(true))
            .unwrap();
        assert_eq!(outcome, AddOutcome::Updated);
        assert_eq!(set.number_of_alternate_locations(), 1);
        assert_eq!(set.firewalled().len(), 1);
        assert!(set.direct().is_empty());
        assert_eq!(set.http_string_value(), "1.1.1.1:1;fw");
    }

    #[test]
    fn older_report_with_other_flag_is_ignored() {
        let set = SourceSet::new(hash(), 10, 10, registry());
        set.add_alternate_location(loc("1.1.1.1:1", 10)).unwrap();
        let before = set.http_string_value();

        let outcome = set
            .add_alternate_location(loc("1.1.1.1:1", 5).with_firewalled(true))
            .unwrap();
        assert_eq!(outcome, AddOutcome::Ignored);
        let outcome = set
            .add_alternate_location(loc("1.1.1.1:1", 10).with_firewalled(true))
            .unwrap();
        assert_eq!(outcome, AddOutcome::Ignored);

        assert_eq!(set.http_string_value(), before);
        assert_eq!(set.locations()[0].last_seen(), 10);
    }

    #[test]
    fn cap_spans_direct_and_firewalled() {
        let set = SourceSet::new(hash(), 2, 10, registry());
        for (i, fw) in [(1, false), (2, true), (3, false), (4, true)] {
            let location = loc(&format!("10.0.0.{i}:6346"), i).with_firewalled(fw);
            set.add_alternate_location(location).unwrap();
            assert!(set.number_of_alternate_locations() <= 2);
        }
        assert_eq!(set.http_string_value(), "10.0.0.3:6346,10.0.0.4:6346;fw");
    }

    #[test]
    fn render_never_shows_a_source_twice() {
        let set = Arc::new(SourceSet::new(hash(), 10, 10, registry()));
        let writer = {
            let set = set.clone();
            std::thread::spawn(move || {
                for t in 1..=2000u64 {
                    let location = loc("1.1.1.1:1", t).with_firewalled(t % 2 == 0);
                    set.add_alternate_location(location).unwrap();
                }
            })
        };
        for _ in 0..2000 {
            let value = set.http_string_value();
            assert!(
                value.is_empty() || value == "1.1.1.1:1" || value == "1.1.1.1:1;fw",
                "inconsistent render: {value}"
            );
        }
        writer.join().unwrap();
        assert_eq!(set.http_string_value(), "1.1.1.1:1;fw");
    }

    #[test]
    fn http_value_round_trips_through_source_set() {
        let set = SourceSet::new(hash(), 10, 10, registry());
        let changed = set.add_http_value("1.2.3.4:6346;tls,5.6.7.8:6347;fw;9.9.9.9:80,bogus", 5);
        assert_eq!(changed, 2);
        assert_eq!(
            set.http_string_value(),
            "1.2.3.4:6346;tls,5.6.7.8:6347;fw;9.9.9.9:80"
        );
    }

    #[test]
    fn bulk_merge_into_source_set() {
        let set = SourceSet::new(hash(), 2, 10, registry());
        let other = AlternateLocationCollection::new(hash());
        other.add(loc("1.1.1.1:1", 1)).unwrap();
        other.add(loc("2.2.2.2:2", 2)).unwrap();
        other.add(loc("3.3.3.3:3", 3)).unwrap();
        assert_eq!(set.add_alternate_location_collection(&other).unwrap(), 3);
        assert_eq!(set.http_string_value(), "2.2.2.2:2,3.3.3.3:3");

        let foreign = AlternateLocationCollection::new(ContentHash::of(b"else"));
        assert!(set.add_alternate_location_collection(&foreign).is_err());
    }

    #[test]
    fn manager_shares_sets_and_expires() {
        let manager = AltLocManager::new(10, 10, registry());
        let a = manager.collection(hash());
        let b = manager.collection(hash());
        assert!(Arc::ptr_eq(&a, &b));

        manager.add(loc("1.1.1.1:1", 100)).unwrap();
        manager.add(loc("2.2.2.2:2", 300)).unwrap();
        assert_eq!(a.number_of_alternate_locations(), 2);

        drop((a, b));
        assert_eq!(manager.expire_before(200), 1);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.expire_before(400), 1);
        assert!(manager.is_empty());
        assert!(manager.get(&hash()).is_none());
    }

    #[test]
    fn expiry_keeps_sets_still_held_by_writers() {
        let manager = AltLocManager::new(10, 10, registry());
        let held = manager.collection(hash());

        // Expiry runs between the lookup and the add.
        manager.expire_before(u64::MAX);
        held.add_alternate_location(loc("1.1.1.1:1", 1)).unwrap();

        let seen = manager.get(&hash()).expect("set still mapped");
        assert!(Arc::ptr_eq(&seen, &held));
        assert_eq!(seen.http_string_value(), "1.1.1.1:1");

        drop((held, seen));
        assert_eq!(manager.expire_before(u64::MAX), 1);
        assert!(manager.is_empty());
    }
}

//! Periodic maintenance tasks. Each runs until shutdown.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use peerwire_core::crypto::MacKeyRing;
use peerwire_core::Message;
use peerwire_services::{
    AltLocManager, HostPool, PushFailures, PushProxyRegistry, UdpReplyHandlerCache,
};

/// How long a failed push blocks retries of the same source.
const PUSH_FAILURE_MEMORY: Duration = Duration::from_secs(30 * 60);

pub const HOST_PING_INTERVAL: Duration = Duration::from_secs(30);

async fn every(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: impl FnMut(),
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(100)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(task = name, "maintenance task stopping");
                return Ok(());
            }
            _ = interval.tick() => tick(),
        }
    }
}

/// Drop reply handlers nobody has looked up recently.
pub async fn reply_cache_sweeper(
    cache: Arc<UdpReplyHandlerCache>,
    idle: Duration,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    every("reply-cache-sweeper", period, shutdown, move || {
        let removed = cache.expire_idle(idle);
        if removed > 0 {
            tracing::debug!(removed, remaining = cache.len(), "expired idle reply handlers");
        }
    })
    .await
}

/// Expire alternate locations older than `max_age`.
pub async fn altloc_expiry(
    altlocs: Arc<AltLocManager>,
    max_age: Duration,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let period = (max_age / 10).clamp(Duration::from_secs(1), Duration::from_secs(60));
    every("altloc-expiry", period, shutdown, move || {
        let removed = altlocs.expire_stale(max_age);
        if removed > 0 {
            tracing::debug!(removed, hashes = altlocs.len(), "expired stale alternate locations");
        }
    })
    .await
}

/// Prune stale push proxies and old push failures.
pub async fn proxy_prune(
    proxies: Arc<PushProxyRegistry>,
    failures: Arc<PushFailures>,
    ttl: Duration,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    every("proxy-prune", period, shutdown, move || {
        let pruned = proxies.prune_expired();
        let forgotten = failures.expire(PUSH_FAILURE_MEMORY);
        if pruned + forgotten > 0 {
            tracing::debug!(pruned, forgotten, "push proxy maintenance");
        }
    })
    .await
}

/// Rotate the query-key secret when due.
pub async fn key_rotation(
    keys: Arc<RwLock<MacKeyRing>>,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let period = (keys.read().rotation() / 10).clamp(Duration::from_secs(1), Duration::from_secs(60));
    every("key-rotation", period, shutdown, move || {
        if keys.write().rotate_if_due() {
            tracing::info!("query key secret rotated");
        }
    })
    .await
}

/// Ping the next pooled host. Its pong comes back through the router and
/// refills the pool; an empty pool is reported as `NoHostsToUse`.
pub async fn host_ping(
    hosts: Arc<HostPool>,
    cache: Arc<UdpReplyHandlerCache>,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let ping = Bytes::from(Message::Ping.encode()?);
    every("host-ping", period, shutdown, move || {
        let Some(host) = hosts.next_host() else {
            return;
        };
        let handler = cache.get_udp_reply_handler(host);
        if handler.is_spam() {
            tracing::trace!(host = %host, "not pinging filtered host");
            return;
        }
        handler.reply(ping.clone());
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerwire_core::PeerAddress;
    use peerwire_services::{CoreEvent, EventSink};

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cache = Arc::new(UdpReplyHandlerCache::new(tx));
        cache.get_udp_reply_handler(PeerAddress::v4(1, 2, 3, 4, 6346));

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(reply_cache_sweeper(
            cache.clone(),
            Duration::ZERO,
            Duration::from_millis(100),
            shutdown_tx.subscribe(),
        ));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(cache.is_empty());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pings_pooled_host_then_reports_empty_pool() {
        let (tx, mut outbound) = tokio::sync::mpsc::unbounded_channel();
        let cache = Arc::new(UdpReplyHandlerCache::new(tx));
        let (events, mut event_rx) = EventSink::channel();
        let hosts = Arc::new(HostPool::new(10, events));
        let host = PeerAddress::v4(20, 0, 0, 1, 6346);
        hosts.add_host(host);
        assert_eq!(event_rx.recv().await, Some(CoreEvent::HostDiscovered { host }));

        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(host_ping(
            hosts.clone(),
            cache,
            Duration::from_millis(100),
            shutdown_tx.subscribe(),
        ));

        let (to, datagram) = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to, host);
        assert_eq!(Message::decode(&datagram).unwrap(), Message::Ping);

        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(CoreEvent::NoHostsToUse));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}

//! peerwired: peer-routing daemon.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use peerwire_core::config::PeerwireConfig;
use peerwire_core::crypto::MacKeyRing;
use peerwire_services::{
    AltLocManager, ConnectType, ConnectionFactory, DefaultBinder, EventSink, HostPool,
    MessageRouter, PushFailures, PushProxyRegistry, PushRequester, SpamServices, UdpReceiver,
    UdpReplyHandlerCache, UdpSender, UploadSlots,
};

mod maintenance;
mod net;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PeerwireConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PeerwireConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PeerwireConfig::default()
    });

    let bind_ip: IpAddr = config
        .network
        .bind_addr
        .parse()
        .with_context(|| format!("invalid network.bind_addr {:?}", config.network.bind_addr))?;
    let udp_addr = SocketAddr::new(bind_ip, config.network.udp_port);
    let advertised = net::advertised_address(bind_ip, config.network.udp_port)?;
    tracing::info!(udp = %udp_addr, advertised = %advertised, "peerwired starting");

    // ── Core state ───────────────────────────────────────────────────────────

    let (events, mut event_rx) = EventSink::channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let reply_cache = Arc::new(UdpReplyHandlerCache::new(outbound_tx));
    let spam = Arc::new(SpamServices::new(config.filter.clone()));
    spam.register_cache(&reply_cache);

    let proxies = Arc::new(PushProxyRegistry::new(
        config.push_proxy.ttl(),
        config.push_proxy.max_per_peer,
    ));
    let push_failures = Arc::new(PushFailures::new());
    let altlocs = Arc::new(AltLocManager::new(
        config.altlocs.max_locations,
        config.altlocs.max_removed,
        proxies.clone(),
    ));
    let hosts = Arc::new(HostPool::new(config.hosts.max_hosts, events.clone()));
    let uploads = UploadSlots::new(config.uploads.per_host, config.uploads.total);
    let keys = Arc::new(RwLock::new(MacKeyRing::new(
        config.security.key_rotation(),
        config.security.key_grace(),
    )));

    let connect_type = if config.network.prefer_tls {
        ConnectType::Tls
    } else {
        ConnectType::Plain
    };
    let connections = ConnectionFactory::new(connect_type);
    let pusher = Arc::new(PushRequester::new(
        connections,
        proxies.clone(),
        push_failures.clone(),
        config.push_proxy.connect_timeout(),
    ));
    tracing::info!(connect_type = ?connections.default_type(), "connection factory ready");

    let router = {
        let mut router = MessageRouter::new(reply_cache.clone());
        router
            .bind(&DefaultBinder {
                advertised,
                hosts: hosts.clone(),
                altlocs: altlocs.clone(),
                proxies: proxies.clone(),
                keys: keys.clone(),
            })
            .context("failed to bind UDP handlers")?;
        Arc::new(router)
    };
    tracing::info!(kinds = ?router.bound_kinds(), "udp handlers bound");

    // Initial IP filter load; the node serves traffic while it runs.
    {
        let reload = spam.reload_ip_filter();
        tokio::spawn(async move {
            match reload.await {
                Ok(Ok(report)) => tracing::info!(ranges = report.ranges, "initial IP filter loaded"),
                Ok(Err(e)) => tracing::info!(error = %e, "no IP filter loaded at startup"),
                Err(e) => tracing::warn!(error = %e, "IP filter task failed"),
            }
        });
    }

    let socket = Arc::new(net::bind_udp(udp_addr)?);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let receive_task = tokio::spawn(
        UdpReceiver::new(socket.clone(), router.clone(), shutdown_tx.subscribe()).run(),
    );

    let send_task =
        tokio::spawn(UdpSender::new(socket, outbound_rx, shutdown_tx.subscribe()).run());

    let sweeper_task = tokio::spawn(maintenance::reply_cache_sweeper(
        reply_cache.clone(),
        config.reply_cache.idle_expiry(),
        config.reply_cache.sweep_interval(),
        shutdown_tx.subscribe(),
    ));

    let altloc_task = match config.altlocs.max_age() {
        Some(max_age) => tokio::spawn(maintenance::altloc_expiry(
            altlocs.clone(),
            max_age,
            shutdown_tx.subscribe(),
        )),
        None => tokio::spawn(std::future::pending::<anyhow::Result<()>>()),
    };

    let proxy_task = tokio::spawn(maintenance::proxy_prune(
        proxies.clone(),
        push_failures,
        config.push_proxy.ttl(),
        shutdown_tx.subscribe(),
    ));

    let key_task = tokio::spawn(maintenance::key_rotation(keys, shutdown_tx.subscribe()));

    let ping_task = tokio::spawn(maintenance::host_ping(
        hosts.clone(),
        reply_cache.clone(),
        maintenance::HOST_PING_INTERVAL,
        shutdown_tx.subscribe(),
    ));

    let event_logger = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(?event, "core event");
        }
    });

    let api_port = config.network.api_port;
    {
        let state = peerwire_api::ApiState {
            reply_cache,
            router,
            altlocs,
            proxies,
            pusher,
            spam,
            uploads,
            hosts,
            started_at: Instant::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = peerwire_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = receive_task        => tracing::error!("udp receiver exited: {:?}", r),
        r = send_task           => tracing::error!("udp sender exited: {:?}", r),
        r = sweeper_task        => tracing::error!("reply cache sweeper exited: {:?}", r),
        r = altloc_task         => tracing::error!("altloc expiry exited: {:?}", r),
        r = proxy_task          => tracing::error!("proxy prune exited: {:?}", r),
        r = key_task            => tracing::error!("key rotation exited: {:?}", r),
        r = ping_task          => tracing::error!("host ping exited: {:?}", r),
        r = event_logger        => tracing::error!("event logger exited: {:?}", r),
    }

    Ok(())
}

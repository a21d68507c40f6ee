//! peerwire integration test harness.
//!
//! Each test starts an in-process node on a loopback UDP socket, with the
//! same receive and send workers the daemon runs, and talks to it from a
//! plain client socket. Nothing here needs root or a network namespace.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use peerwire_core::config::FilterConfig;
use peerwire_core::crypto::MacKeyRing;
use peerwire_core::{Message, PeerAddress};
use peerwire_services::{
    AltLocManager, DefaultBinder, EventSink, HostPool, MessageRouter, PushProxyRegistry,
    SpamServices, UdpReceiver, UdpReplyHandlerCache, UdpSender,
};

mod filtering;
mod routing;
mod sources;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a client waits for a reply before giving up.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a client waits to be sure nothing arrives.
pub const SILENCE: Duration = Duration::from_millis(300);

/// The address every test node advertises in its pongs.
pub fn advertised() -> PeerAddress {
    PeerAddress::v4(10, 1, 2, 3, 6346)
}

/// A running node and handles on its shared state.
pub struct TestNode {
    pub addr: SocketAddr,
    pub router: Arc<MessageRouter>,
    pub reply_cache: Arc<UdpReplyHandlerCache>,
    pub spam: Arc<SpamServices>,
    pub hosts: Arc<HostPool>,
    pub altlocs: Arc<AltLocManager>,
    pub proxies: Arc<PushProxyRegistry>,
    pub keys: Arc<RwLock<MacKeyRing>>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl TestNode {
    pub async fn start() -> Result<Self> {
        Self::start_with(FilterConfig {
            ip_filter_path: std::path::PathBuf::new(),
            ..FilterConfig::default()
        })
        .await
    }

    pub async fn start_with(filter: FilterConfig) -> Result<Self> {
        let socket = Arc::new(
            UdpSocket::bind("127.0.0.1:0")
                .await
                .context("bind node socket")?,
        );
        let addr = socket.local_addr()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let reply_cache = Arc::new(UdpReplyHandlerCache::new(outbound_tx));
        let spam = Arc::new(SpamServices::new(filter));
        spam.register_cache(&reply_cache);

        let proxies = Arc::new(PushProxyRegistry::new(Duration::from_secs(600), 4));
        let binder = DefaultBinder {
            advertised: advertised(),
            hosts: Arc::new(HostPool::new(100, EventSink::disabled())),
            altlocs: Arc::new(AltLocManager::new(10, 500, proxies.clone())),
            proxies,
            keys: Arc::new(RwLock::new(MacKeyRing::new(
                Duration::from_secs(3600),
                Duration::from_secs(60),
            ))),
        };
        let mut router = MessageRouter::new(reply_cache.clone());
        router.bind(&binder)?;
        let router = Arc::new(router);

        let (shutdown, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(
                UdpReceiver::new(socket.clone(), router.clone(), shutdown.subscribe()).run(),
            ),
            tokio::spawn(UdpSender::new(socket, outbound_rx, shutdown.subscribe()).run()),
        ];

        Ok(Self {
            addr,
            router,
            reply_cache,
            spam,
            hosts: binder.hosts,
            altlocs: binder.altlocs,
            proxies: binder.proxies,
            keys: binder.keys,
            shutdown,
            tasks,
        })
    }

    /// Stop the workers and check they exited cleanly.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            task.await.context("worker panicked")??;
        }
        Ok(())
    }
}

/// A remote peer talking to a node.
pub struct Client {
    pub socket: UdpSocket,
}

impl Client {
    pub async fn new() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(Self { socket })
    }

    pub fn address(&self) -> Result<PeerAddress> {
        Ok(PeerAddress::from(self.socket.local_addr()?))
    }

    pub async fn send(&self, node: &TestNode, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        self.socket.send_to(&bytes, node.addr).await?;
        Ok(())
    }

    pub async fn send_raw(&self, node: &TestNode, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, node.addr).await?;
        Ok(())
    }

    /// Wait for the next datagram from `node` and decode it.
    pub async fn recv(&self, node: &TestNode) -> Result<Message> {
        let mut buf = vec![0u8; 2048];
        let (len, from) = tokio::time::timeout(REPLY_TIMEOUT, self.socket.recv_from(&mut buf))
            .await
            .context("timed out waiting for a reply")??;
        if from != node.addr {
            bail!("reply from {from}, expected {}", node.addr);
        }
        Ok(Message::decode(&buf[..len])?)
    }

    /// True when nothing arrives within `SILENCE`.
    pub async fn hears_nothing(&self) -> bool {
        let mut buf = vec![0u8; 2048];
        tokio::time::timeout(SILENCE, self.socket.recv_from(&mut buf))
            .await
            .is_err()
    }
}

/// Poll `check` until it holds or `REPLY_TIMEOUT` passes. Fire-and-forget
/// messages have no reply to wait on.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A scratch file under the system temp dir, removed on drop.
pub struct TempFile {
    pub path: std::path::PathBuf,
}

impl TempFile {
    pub fn with_contents(name: &str, contents: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "peerwire-{}-{}-{name}",
            std::process::id(),
            peerwire_core::now_millis()
        ));
        std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

//! UDP receive and send workers.
//!
//! The receiver hands each datagram to the router inline; routing never
//! awaits, so one slow peer cannot stall the socket. Replies go through the
//! outbound queue to the sender, which owns the write side.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use peerwire_core::wire::MAX_DATAGRAM;
use peerwire_core::PeerAddress;

use crate::reply_cache::OutboundRx;
use crate::router::MessageRouter;

pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
    router: Arc<MessageRouter>,
    shutdown: broadcast::Receiver<()>,
}

impl UdpReceiver {
    pub fn new(
        socket: Arc<UdpSocket>,
        router: Arc<MessageRouter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            router,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(addr = %addr, "udp receiver starting");
        }
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("udp receiver shutting down");
                    return Ok(());
                }

                r = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match r {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    let outcome = self.router.route_udp(&buf[..len], PeerAddress::from(from));
                    tracing::trace!(peer = %from, len, ?outcome, "datagram routed");
                }
            }
        }
    }
}

pub struct UdpSender {
    socket: Arc<UdpSocket>,
    outbound: OutboundRx,
    shutdown: broadcast::Receiver<()>,
}

impl UdpSender {
    pub fn new(
        socket: Arc<UdpSocket>,
        outbound: OutboundRx,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            outbound,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("udp sender shutting down");
                    return Ok(());
                }

                msg = self.outbound.recv() => {
                    let Some((to, datagram)) = msg else {
                        tracing::info!("outbound queue closed, udp sender exiting");
                        return Ok(());
                    };
                    if let Err(e) = self.socket.send_to(&datagram, to.socket_addr()).await {
                        tracing::debug!(peer = %to, error = %e, "send_to failed");
                    }
                }
            }
        }
    }
}

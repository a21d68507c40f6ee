//! Reaching firewalled sources through their push proxies.

use std::sync::Arc;
use std::time::Duration;

use peerwire_core::PeerAddress;

use crate::connection::{Connection, ConnectionFactory};
use crate::push_proxy::{PushError, PushFailures, PushProxyRegistry};

pub struct PushRequester {
    factory: ConnectionFactory,
    proxies: Arc<PushProxyRegistry>,
    failures: Arc<PushFailures>,
    connect_timeout: Duration,
}

impl PushRequester {
    pub fn new(
        factory: ConnectionFactory,
        proxies: Arc<PushProxyRegistry>,
        failures: Arc<PushFailures>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            proxies,
            failures,
            connect_timeout,
        }
    }

    pub fn failures(&self) -> &Arc<PushFailures> {
        &self.failures
    }

    /// Open a connection to the first proxy of `source` that accepts one.
    /// Proxies that refuse are dropped from the registry. When none accept,
    /// the source is marked failed and later pushes to it are refused.
    pub async fn push(&self, source: PeerAddress) -> Result<Connection, PushError> {
        let proxies = self.failures.plan_push(&self.proxies, &source)?;
        for proxy in proxies {
            let mut connection = self
                .factory
                .create_outbound(proxy.ip().to_string(), proxy.port());
            match connection.connect(self.connect_timeout).await {
                Ok(()) => {
                    self.failures.record_success(&source);
                    tracing::info!(peer = %source, proxy = %proxy, "push proxy connected");
                    return Ok(connection);
                }
                Err(e) => {
                    tracing::debug!(peer = %source, proxy = %proxy, error = %e, "push proxy unreachable");
                    self.proxies.remove_proxy(&source, &proxy);
                }
            }
        }
        self.failures.record_failure(source);
        Err(PushError::Unreachable(source))
    }
}

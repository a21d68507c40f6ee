//! Connection objects and the factory that builds them.
//!
//! The factory does no I/O. Outbound connections start `NotConnected` and
//! open their socket in `connect`; inbound connections wrap an accepted
//! stream and start `AwaitingHandshake`. The handshake itself, including
//! any TLS upgrade, belongs to the layer that consumes the connection.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use peerwire_core::{ErrorKind, PeerAddress};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectType {
    #[default]
    Plain,
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    NotConnected,
    AwaitingHandshake,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connect to {host}:{port} timed out after {after:?}")]
    Timeout {
        host: String,
        port: u16,
        after: Duration,
    },
    #[error("connect to {host}:{port} failed: {source}")]
    Io {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("connection is {0:?}, cannot connect")]
    InvalidState(ConnectionState),
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::Timeout { .. } => ErrorKind::Timeout,
            ConnectError::Io { .. } | ConnectError::InvalidState(_) => ErrorKind::Failed,
        }
    }
}

pub struct Connection {
    host: String,
    port: u16,
    connect_type: ConnectType,
    outgoing: bool,
    state: ConnectionState,
    stream: Option<TcpStream>,
}

impl Connection {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connect_type(&self) -> ConnectType {
        self.connect_type
    }

    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address once a socket exists.
    pub fn peer_address(&self) -> Option<PeerAddress> {
        self.stream
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .map(PeerAddress::from)
    }

    /// Open the socket. Only valid on a fresh outbound connection.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), ConnectError> {
        if !self.outgoing || self.state != ConnectionState::NotConnected {
            return Err(ConnectError::InvalidState(self.state));
        }
        let attempt = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.state = ConnectionState::Closed;
                return Err(ConnectError::Io {
                    host: self.host.clone(),
                    port: self.port,
                    source,
                });
            }
            Err(_) => {
                self.state = ConnectionState::Closed;
                return Err(ConnectError::Timeout {
                    host: self.host.clone(),
                    port: self.port,
                    after: timeout,
                });
            }
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(
            host = %self.host,
            port = self.port,
            connect_type = ?self.connect_type,
            "outbound connection established"
        );
        self.stream = Some(stream);
        self.state = ConnectionState::AwaitingHandshake;
        Ok(())
    }

    /// Hand the socket to the handshake layer.
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Closed;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connect_type", &self.connect_type)
            .field("outgoing", &self.outgoing)
            .field("state", &self.state)
            .finish()
    }
}

/// Builds connections. Constructed once in the daemon and passed down.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionFactory {
    default_type: ConnectType,
}

impl ConnectionFactory {
    pub fn new(default_type: ConnectType) -> Self {
        Self { default_type }
    }

    pub fn default_type(&self) -> ConnectType {
        self.default_type
    }

    /// Wrap an accepted socket.
    pub fn create_inbound(&self, stream: TcpStream) -> Connection {
        let (host, port) = match stream.peer_addr() {
            Ok(addr) => (addr.ip().to_string(), addr.port()),
            Err(_) => (String::new(), 0),
        };
        Connection {
            host,
            port,
            connect_type: ConnectType::Plain,
            outgoing: false,
            state: ConnectionState::AwaitingHandshake,
            stream: Some(stream),
        }
    }

    pub fn create_outbound(&self, host: impl Into<String>, port: u16) -> Connection {
        self.create_outbound_with(host, port, self.default_type)
    }

    pub fn create_outbound_with(
        &self,
        host: impl Into<String>,
        port: u16,
        connect_type: ConnectType,
    ) -> Connection {
        Connection {
            host: host.into(),
            port,
            connect_type,
            outgoing: true,
            state: ConnectionState::NotConnected,
            stream: None,
        }
    }
}

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Default TCP port of the server.
pub const DEFAULT_TCP_PORT: u16 = 3333;

/// Default UDP port of the server.
pub const DEFAULT_UDP_PORT: u16 = 4444;

/// Transport used by a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Raw byte stream after an ASCII size line.
    Tcp,
    /// Fire-and-forget stream of numbered 1024-byte segments.
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Test mode: client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Runs both accept loops and answers requests.
    Server,
    /// Fans out transfers against a server and measures them.
    Client,
}

/// Configuration for both halves of the speed test.
///
/// Use [`Config::server`] or [`Config::client`] and the `with_*` builders.
///
/// # Examples
///
/// ```
/// use netspeed::Config;
/// use std::time::Duration;
///
/// let config = Config::client("192.168.1.100".to_string(), 3333, 4444)
///     .with_requested_size(10 * 1024 * 1024)
///     .with_tcp_connections(4)
///     .with_udp_connections(2)
///     .with_idle_timeout(Duration::from_millis(500));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Server address (client mode)
    pub server_addr: Option<String>,

    /// Bind address (server mode); all interfaces when unset
    pub bind_addr: Option<IpAddr>,

    /// TCP port to listen on or connect to
    pub tcp_port: u16,

    /// UDP port to listen on or send requests to
    pub udp_port: u16,

    /// Bytes requested by every transfer of a round
    pub requested_size: u64,

    /// Number of concurrent TCP transfers per round
    pub tcp_connections: usize,

    /// Number of concurrent UDP transfers per round
    pub udp_connections: usize,

    /// Silence after which a UDP receiver considers its transfer complete
    pub idle_timeout: Duration,

    /// Upper bound on establishing a TCP connection
    pub connect_timeout: Duration,

    /// Upper bound on a single TCP read with no progress
    pub io_timeout: Duration,

    /// Output results as JSON lines
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            server_addr: None,
            bind_addr: None,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            requested_size: 1_000_000,
            tcp_connections: 1,
            udp_connections: 1,
            idle_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(10),
            json: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values (client mode, no
    /// server address).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server configuration listening on the given ports.
    ///
    /// Port 0 asks the OS for an ephemeral port; the bound ports are
    /// reported by [`Server::tcp_local_addr`](crate::Server::tcp_local_addr)
    /// and [`Server::udp_local_addr`](crate::Server::udp_local_addr).
    ///
    /// ```
    /// use netspeed::Config;
    ///
    /// let config = Config::server(3333, 4444);
    /// assert_eq!(config.udp_port, 4444);
    /// ```
    pub fn server(tcp_port: u16, udp_port: u16) -> Self {
        Self {
            mode: Mode::Server,
            tcp_port,
            udp_port,
            ..Default::default()
        }
    }

    /// Creates a client configuration targeting `server_addr`.
    pub fn client(server_addr: String, tcp_port: u16, udp_port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            tcp_port,
            udp_port,
            ..Default::default()
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: IpAddr) -> Self {
        self.bind_addr = Some(bind_addr);
        self
    }

    /// Sets how many bytes each transfer asks for.
    pub fn with_requested_size(mut self, size: u64) -> Self {
        self.requested_size = size;
        self
    }

    pub fn with_tcp_connections(mut self, count: usize) -> Self {
        self.tcp_connections = count;
        self
    }

    pub fn with_udp_connections(mut self, count: usize) -> Self {
        self.udp_connections = count;
        self
    }

    /// Sets the UDP idle window.
    ///
    /// A UDP transfer ends once nothing has arrived for this long, so the
    /// window must exceed the worst inter-packet gap expected on the path.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Checks ranges before any socket is touched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a client has no server address, a
    /// client port is 0, a connection count is 0, or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Client {
            match self.server_addr.as_deref() {
                None | Some("") => {
                    return Err(Error::Config(
                        "Server address is required for client mode".to_string(),
                    ))
                }
                Some(_) => {}
            }
            if self.tcp_port == 0 || self.udp_port == 0 {
                return Err(Error::Config(format!(
                    "Invalid server ports: tcp={}, udp={}",
                    self.tcp_port, self.udp_port
                )));
            }
            if self.tcp_connections == 0 {
                return Err(Error::Config(
                    "Number of TCP connections must be at least 1".to_string(),
                ));
            }
            if self.udp_connections == 0 {
                return Err(Error::Config(
                    "Number of UDP connections must be at least 1".to_string(),
                ));
            }
        }

        for (name, timeout) in [
            ("idle", self.idle_timeout),
            ("connect", self.connect_timeout),
            ("io", self.io_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!("The {} timeout must be non-zero", name)));
            }
        }

        Ok(())
    }
}

/// Parameters of one client transfer, fixed before it is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub server_addr: String,
    pub port: u16,
    pub requested_size: u64,
    /// Unique within one round.
    pub transfer_id: u64,
}

impl TransferRequest {
    pub fn new(server_addr: String, port: u16, requested_size: u64, transfer_id: u64) -> Self {
        Self {
            server_addr,
            port,
            requested_size,
            transfer_id,
        }
    }

    /// Resolves the server address to every socket address it maps to.
    ///
    /// IPv4 candidates come first, keeping the resolver's order within each
    /// family: a server on the wildcard IPv4 address is unreachable through
    /// `::1` even when the resolver lists it first.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((self.server_addr.as_str(), self.port))
            .await
            .map_err(|e| {
                Error::Connection(format!("Cannot resolve {}: {}", self.server_addr, e))
            })?;

        let candidates = prefer_ipv4(addrs);
        if candidates.is_empty() {
            return Err(Error::Connection(format!(
                "No address found for {}",
                self.server_addr
            )));
        }
        Ok(candidates)
    }
}

/// Stable reordering that puts IPv4 addresses ahead of IPv6 ones.
pub fn prefer_ipv4<I>(addrs: I) -> Vec<SocketAddr>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let (mut v4, v6): (Vec<_>, Vec<_>) = addrs.into_iter().partition(SocketAddr::is_ipv4);
    v4.extend(v6);
    v4
}

/// Wildcard address of the same family as `peer`, for client-side binds.
pub fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

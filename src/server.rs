use crate::client::{notify, CallbackRef, ProgressCallback, ProgressEvent};
use crate::config::{Config, Protocol};
use crate::measurements::{Direction, TransferResult};
use crate::protocol::RequestPacket;
use crate::udp::RECV_BUFFER_SIZE;
use crate::{tcp, udp, Result};
use log::{error, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Server half of the speed test.
///
/// Owns one TCP listener and one UDP socket. [`Server::run`] drives two
/// accept loops side by side:
///
/// - every accepted TCP connection gets its own sender task;
/// - every valid UDP request gets its own responder task, which sends
///   through the shared UDP socket.
///
/// A failing handler only ends its own transfer; the loops keep going until
/// the cancellation token fires.
///
/// # Examples
///
/// ```no_run
/// use netspeed::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::bind(Config::server(3333, 4444)).await?;
///
/// let token = server.cancellation_token().clone();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     token.cancel();
/// });
///
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    tcp_listener: TcpListener,
    udp_socket: Arc<UdpSocket>,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
}

impl Server {
    /// Binds both listening resources.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or either port cannot be bound.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let ip = config
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let tcp_listener = TcpListener::bind((ip, config.tcp_port)).await?;
        let udp_socket = UdpSocket::bind((ip, config.udp_port)).await?;

        info!(
            "Server started, TCP on {}, UDP on {}",
            tcp_listener.local_addr()?,
            udp_socket.local_addr()?
        );

        Ok(Self {
            config,
            tcp_listener,
            udp_socket: Arc::new(udp_socket),
            callback: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Attaches a callback that receives the server-side result of every
    /// transfer.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Token that stops both accept loops when cancelled.
    ///
    /// Handlers already running are left to finish on their own.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn tcp_local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp_listener.local_addr()?)
    }

    pub fn udp_local_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp_socket.local_addr()?)
    }

    /// Runs both accept loops until the cancellation token fires.
    pub async fn run(self) -> Result<()> {
        let tcp_loop = run_tcp(
            self.tcp_listener,
            self.config.io_timeout,
            self.callback.clone(),
            self.cancellation_token.clone(),
        );
        let udp_loop = run_udp(
            self.udp_socket,
            self.callback,
            self.cancellation_token,
        );

        tokio::join!(tcp_loop, udp_loop);
        info!("Server shutting down...");
        Ok(())
    }
}

async fn run_tcp(
    listener: TcpListener,
    io_timeout: Duration,
    callback: Option<CallbackRef>,
    token: CancellationToken,
) {
    let mut next_id = 1u64;

    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let transfer_id = next_id;
                next_id += 1;
                info!("[TCP] Connected to {}", addr);

                let callback = callback.clone();
                tokio::spawn(async move {
                    let result = handle_tcp_client(stream, addr, transfer_id, io_timeout).await;
                    notify(&callback, ProgressEvent::TransferCompleted(result));
                });
            }
            Err(e) => {
                error!("[TCP] Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_tcp_client(
    stream: TcpStream,
    addr: SocketAddr,
    transfer_id: u64,
    io_timeout: Duration,
) -> TransferResult {
    let start = Instant::now();

    let result = match tcp::serve_connection(stream, io_timeout).await {
        Ok(counters) => {
            let result = TransferResult::tcp(transfer_id, Direction::Sent, &counters);
            info!(
                "[TCP] Sent {} bytes to {} in {:.2}s at {:.2} bits/sec",
                result.bytes, addr, result.elapsed_seconds, result.bits_per_second
            );
            result
        }
        Err(e) => {
            error!("[TCP] Error with client {}: {}", addr, e);
            TransferResult::failed(
                transfer_id,
                Protocol::Tcp,
                Direction::Sent,
                start.elapsed(),
                &e,
            )
        }
    };

    info!("[TCP] Connection to {} closed", addr);
    result
}

async fn run_udp(socket: Arc<UdpSocket>, callback: Option<CallbackRef>, token: CancellationToken) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut next_id = 1u64;

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (n, peer) = match received {
            Ok(received) => received,
            Err(e) => {
                error!("[UDP] Error receiving data: {}", e);
                continue;
            }
        };

        match RequestPacket::from_bytes(&buf[..n]) {
            Ok(request) => {
                let transfer_id = next_id;
                next_id += 1;
                info!(
                    "[UDP] Valid request from {} for {} bytes",
                    peer, request.requested_size
                );

                let socket = socket.clone();
                let callback = callback.clone();
                tokio::spawn(async move {
                    let result =
                        handle_udp_client(&socket, peer, request.requested_size, transfer_id).await;
                    notify(&callback, ProgressEvent::TransferCompleted(result));
                });
            }
            Err(e) => {
                warn!("[UDP] Invalid request from {}: {}", peer, e);
            }
        }
    }
}

async fn handle_udp_client(
    socket: &UdpSocket,
    peer: SocketAddr,
    requested_size: u64,
    transfer_id: u64,
) -> TransferResult {
    let start = Instant::now();

    match udp::send_segments(socket, peer, requested_size).await {
        Ok(counters) => {
            let result = TransferResult::udp_sent(transfer_id, &counters);
            info!(
                "[UDP] Sent {} segments to {} in {:.2}s at {:.2} bits/sec",
                counters.segments_sent, peer, result.elapsed_seconds, result.bits_per_second
            );
            result
        }
        Err(e) => {
            error!("[UDP] Error with client {}: {}", peer, e);
            TransferResult::failed(
                transfer_id,
                Protocol::Udp,
                Direction::Sent,
                start.elapsed(),
                &e,
            )
        }
    }
}

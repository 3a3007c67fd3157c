use crate::config::{Config, Protocol, TransferRequest};
use crate::measurements::{Direction, RoundSummary, TransferResult};
use crate::{tcp, udp, Error, Result};
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Progress event types reported while a round runs.
///
/// # Examples
///
/// ```no_run
/// use netspeed::{Client, Config, ProgressEvent};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1".to_string(), 3333, 4444)
///     .with_tcp_connections(2)
///     .with_udp_connections(2);
///
/// let client = Client::new(config)?.with_callback(|event: ProgressEvent| match event {
///     ProgressEvent::TransferCompleted(result) => println!("{}", result),
///     ProgressEvent::RoundCompleted(summary) => println!("{}", summary),
///     _ => {}
/// });
///
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A transfer task has started.
    TransferStarted { transfer_id: u64, protocol: Protocol },
    /// A transfer reached a terminal state. Failures are reported here too,
    /// with [`TransferResult::error`] set.
    TransferCompleted(TransferResult),
    /// Every transfer of the round has finished.
    RoundCompleted(RoundSummary),
}

/// Callback trait for receiving progress events.
///
/// Implemented for any `Fn(ProgressEvent) + Send + Sync` closure. Events are
/// delivered from the transfer tasks themselves, so implementations must be
/// cheap and thread-safe.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

pub(crate) type CallbackRef = Arc<dyn ProgressCallback>;

pub(crate) fn notify(callback: &Option<CallbackRef>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback.on_progress(event);
    }
}

/// Client half of the speed test.
///
/// Each call to [`Client::run`] is one round: `tcp_connections` TCP receivers
/// and `udp_connections` UDP requesters run concurrently, each in its own
/// task, and the round returns once all of them have finished.
///
/// Transfers are isolated from each other: one failing only marks its own
/// [`TransferResult`] as failed.
///
/// # Examples
///
/// ```no_run
/// use netspeed::{Client, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100".to_string(), 3333, 4444)
///     .with_requested_size(50_000_000)
///     .with_tcp_connections(4)
///     .with_udp_connections(1);
///
/// let client = Client::new(config)?;
/// for result in client.run().await? {
///     println!("{}", result);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration fails [`Config::validate`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            callback: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Token that abandons every in-flight transfer when cancelled.
    ///
    /// Cancelled transfers finish promptly with [`Error::Cancelled`] and so
    /// does every transfer of later rounds.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one round and returns one result per transfer, ordered by
    /// transfer id.
    ///
    /// TCP transfers get ids `1..=tcp_connections`, UDP transfers continue
    /// from there.
    ///
    /// # Errors
    ///
    /// Only configuration problems surface here; per-transfer failures are
    /// recorded in the returned results.
    pub async fn run(&self) -> Result<Vec<TransferResult>> {
        let server_addr = self
            .config
            .server_addr
            .clone()
            .ok_or_else(|| Error::Config("Server address not set".to_string()))?;

        info!(
            "Connecting to server at {} (UDP port {}, TCP port {})",
            server_addr, self.config.udp_port, self.config.tcp_port
        );

        let total = self.config.tcp_connections + self.config.udp_connections;
        let mut handles: Vec<(u64, Protocol, JoinHandle<TransferResult>)> =
            Vec::with_capacity(total);
        let mut transfer_id = 1u64;

        let plan = [
            (Protocol::Tcp, self.config.tcp_port, self.config.tcp_connections),
            (Protocol::Udp, self.config.udp_port, self.config.udp_connections),
        ];
        for (protocol, port, count) in plan {
            for _ in 0..count {
                let request = TransferRequest::new(
                    server_addr.clone(),
                    port,
                    self.config.requested_size,
                    transfer_id,
                );
                handles.push((transfer_id, protocol, self.spawn_transfer(protocol, request)));
                transfer_id += 1;
            }
        }

        let mut results = Vec::with_capacity(total);
        for (transfer_id, protocol, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("[{}] Transfer #{} task failed: {}", protocol, transfer_id, e);
                    TransferResult::failed(
                        transfer_id,
                        protocol,
                        Direction::Received,
                        Duration::ZERO,
                        &Error::Io(std::io::Error::other(e)),
                    )
                }
            };
            results.push(result);
        }

        let summary = RoundSummary::from_results(&results);
        info!("All transfers complete: {}", summary);
        notify(&self.callback, ProgressEvent::RoundCompleted(summary));

        Ok(results)
    }

    fn spawn_transfer(
        &self,
        protocol: Protocol,
        request: TransferRequest,
    ) -> JoinHandle<TransferResult> {
        let callback = self.callback.clone();
        let token = self.cancellation_token.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let transfer_id = request.transfer_id;
            info!("[{}] Transfer #{} started.", protocol, transfer_id);
            notify(
                &callback,
                ProgressEvent::TransferStarted {
                    transfer_id,
                    protocol,
                },
            );

            let start = Instant::now();
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                outcome = run_transfer(protocol, &request, &config) => outcome,
            };

            let result = match outcome {
                Ok(result) => {
                    info!("{}", result);
                    result
                }
                Err(e) => {
                    let result = TransferResult::failed(
                        transfer_id,
                        protocol,
                        Direction::Received,
                        start.elapsed(),
                        &e,
                    );
                    error!("{}", result);
                    result
                }
            };

            notify(&callback, ProgressEvent::TransferCompleted(result.clone()));
            result
        })
    }
}

async fn run_transfer(
    protocol: Protocol,
    request: &TransferRequest,
    config: &Config,
) -> Result<TransferResult> {
    match protocol {
        Protocol::Tcp => {
            let counters =
                tcp::receive_transfer(request, config.connect_timeout, config.io_timeout).await?;
            Ok(TransferResult::tcp(
                request.transfer_id,
                Direction::Received,
                &counters,
            ))
        }
        Protocol::Udp => {
            let counters = udp::request_transfer(request, config.idle_timeout).await?;
            Ok(TransferResult::udp_received(request.transfer_id, &counters))
        }
    }
}

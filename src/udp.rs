//! Segmented UDP transfers.
//!
//! The requester sends one [`RequestPacket`] and then collects payload
//! segments until the socket has been silent for the idle window. There is
//! no end-of-transfer packet: the idle window firing *is* completion, and
//! loss is whatever the [`SegmentSet`] is missing at that point.
//!
//! The responder sends segments `1..=total` in order, each a full
//! [`SEGMENT_SIZE`](crate::protocol::SEGMENT_SIZE) body, with no
//! acknowledgement, retransmission or pacing.

use crate::config::{unspecified_for, TransferRequest};
use crate::measurements::{UdpReceiveCounters, UdpSendCounters};
use crate::protocol::{
    create_payload_packet, set_segment_number, total_segments, PayloadHeader, RequestPacket,
};
use crate::{Error, Result};
use log::{debug, info};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time;

/// Receive buffer size; comfortably larger than one payload packet.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Distinct segment numbers received during one transfer.
#[derive(Debug, Clone, Default)]
pub struct SegmentSet {
    received: HashSet<u64>,
}

impl SegmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a segment. Returns `false` if it was already present.
    pub fn insert(&mut self, segment_number: u64) -> bool {
        self.received.insert(segment_number)
    }

    #[cfg(test)]
    pub fn contains(&self, segment_number: u64) -> bool {
        self.received.contains(&segment_number)
    }

    pub fn len(&self) -> u64 {
        self.received.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}

/// Runs the client half of one UDP transfer.
///
/// Binds an ephemeral socket of the server's address family, sends the
/// request, then collects segments until `idle_timeout` of silence. The
/// socket is released when this returns.
///
/// Resolved addresses are tried in [`TransferRequest::resolve`] order until
/// one can be bound and sent to. A lost request looks the same as silence,
/// so only the first reachable candidate ever receives one.
///
/// # Errors
///
/// Address resolution, or bind and send failing for every candidate, or a
/// receive failure. The idle window elapsing is the normal way out and is
/// not an error.
pub async fn request_transfer(
    request: &TransferRequest,
    idle_timeout: Duration,
) -> Result<UdpReceiveCounters> {
    let candidates = request.resolve().await?;
    let (socket, server) = send_request(&candidates, request.requested_size).await?;
    info!(
        "[UDP] Transfer #{} sent request to {} for {} bytes",
        request.transfer_id, server, request.requested_size
    );

    receive_segments(&socket, request.requested_size, idle_timeout).await
}

async fn send_request(
    candidates: &[SocketAddr],
    requested_size: u64,
) -> Result<(UdpSocket, SocketAddr)> {
    let packet = RequestPacket::new(requested_size).to_bytes();
    let mut last_error = Error::Connection("No address to send to".to_string());

    for &server in candidates {
        let attempt = async {
            let socket = UdpSocket::bind(unspecified_for(&server)).await?;
            socket.send_to(&packet, server).await?;
            Ok::<_, std::io::Error>(socket)
        };
        match attempt.await {
            Ok(socket) => return Ok((socket, server)),
            Err(e) => {
                debug!("[UDP] Cannot send request to {}: {}", server, e);
                last_error = e.into();
            }
        }
    }

    Err(last_error)
}

/// Collects payload segments from `socket` until it is idle for `idle_timeout`.
///
/// Datagrams failing the magic/type check, and segments numbered outside
/// their own header's `1..=total` range, are discarded. Duplicates are
/// counted once.
pub async fn receive_segments(
    socket: &UdpSocket,
    requested_size: u64,
    idle_timeout: Duration,
) -> Result<UdpReceiveCounters> {
    let start = Instant::now();
    let mut segments = SegmentSet::new();
    let mut discarded = 0u64;
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        match time::timeout(idle_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => match PayloadHeader::from_bytes(&buf[..n]) {
                Ok(header) if header.is_in_range() => {
                    if segments.insert(header.segment_number) {
                        debug!(
                            "[UDP] Received segment {}/{} from {}",
                            header.segment_number, header.total_segments, from
                        );
                    } else {
                        debug!(
                            "[UDP] Duplicate segment {} from {}",
                            header.segment_number, from
                        );
                    }
                }
                Ok(header) => {
                    discarded += 1;
                    debug!(
                        "[UDP] Discarded segment {} outside 1..={} from {}",
                        header.segment_number, header.total_segments, from
                    );
                }
                Err(e) => {
                    discarded += 1;
                    debug!("[UDP] Discarded {} byte datagram from {}: {}", n, from, e);
                }
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!("[UDP] Receive idle for {:?}, transfer complete", idle_timeout);
                break;
            }
        }
    }

    Ok(UdpReceiveCounters {
        requested_size,
        segments_received: segments.len(),
        discarded,
        elapsed: start.elapsed(),
    })
}

/// Sends every segment of a `requested_size` transfer to `peer`.
///
/// Segments go out in strictly increasing order through a socket that may be
/// shared with other responders; each datagram is self-contained, so
/// interleaving with other transfers is harmless.
///
/// # Errors
///
/// The first failed send aborts the transfer.
pub async fn send_segments(
    socket: &UdpSocket,
    peer: SocketAddr,
    requested_size: u64,
) -> Result<UdpSendCounters> {
    let total = total_segments(requested_size);
    let mut packet = create_payload_packet(total, 1);
    let start = Instant::now();

    for segment in 1..=total {
        set_segment_number(&mut packet, segment);
        socket.send_to(&packet, peer).await?;
    }

    Ok(UdpSendCounters {
        requested_size,
        segments_sent: total,
        elapsed: start.elapsed(),
    })
}

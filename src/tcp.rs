//! Bulk TCP transfers.
//!
//! The receiver connects, writes the ASCII size line and reads until it has
//! the requested byte count or the server closes. The sender reads the size
//! line, writes exactly that many filler bytes in [`CHUNK_SIZE`] pieces and
//! closes. There is no trailer: EOF or the byte count ends a transfer.

use crate::config::TransferRequest;
use crate::measurements::TcpCounters;
use crate::protocol::{encode_size_line, parse_size_line, FILLER_BYTE, MAX_SIZE_LINE_LEN};
use crate::{Error, Result};
use log::{debug, info};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

/// Read and write buffer size on both ends.
pub const CHUNK_SIZE: usize = 4096;

/// Runs the client half of one TCP transfer.
///
/// The clock starts before connecting, so connection setup is part of the
/// measured time. The connection is closed when this returns.
///
/// # Errors
///
/// - [`Error::Connection`] if the server cannot be resolved or refuses.
/// - [`Error::Timeout`] if connecting takes longer than `connect_timeout` or
///   a read sees no data for `io_timeout`.
/// - [`Error::Io`] for any other transport failure.
pub async fn receive_transfer(
    request: &TransferRequest,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<TcpCounters> {
    let start = Instant::now();
    let candidates = request.resolve().await?;
    let mut stream = connect_any(&candidates, connect_timeout).await?;
    let server = stream.peer_addr()?;
    info!(
        "[TCP] Transfer #{} connected to {}, requesting {} bytes",
        request.transfer_id, server, request.requested_size
    );

    stream
        .write_all(&encode_size_line(request.requested_size))
        .await?;
    stream.flush().await?;

    let bytes = read_stream(&mut stream, request.requested_size, io_timeout).await?;

    Ok(TcpCounters {
        requested_size: request.requested_size,
        bytes,
        elapsed: start.elapsed(),
    })
}

/// Connects to the first candidate that accepts, in order.
///
/// Each attempt gets its own `connect_timeout`. If every candidate fails,
/// the error of the last attempt is returned: [`Error::Timeout`] if it timed
/// out, [`Error::Connection`] otherwise.
pub async fn connect_any(
    candidates: &[SocketAddr],
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let mut last_error = Error::Connection("No address to connect to".to_string());

    for &addr in candidates {
        match time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                debug!("[TCP] Cannot connect to {}: {}", addr, e);
                last_error = Error::Connection(format!("Cannot connect to {}: {}", addr, e));
            }
            Err(_) => {
                debug!("[TCP] Connecting to {} timed out", addr);
                last_error = Error::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    addr, connect_timeout
                ));
            }
        }
    }

    Err(last_error)
}

/// Reads until `expected` bytes have arrived or the peer closes.
///
/// Returns the number of bytes read, which is short of `expected` only if
/// the peer closed early.
pub async fn read_stream<R>(reader: &mut R, expected: u64, io_timeout: Duration) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;

    while received < expected {
        match time::timeout(io_timeout, reader.read(&mut buf)).await {
            Ok(Ok(0)) => {
                debug!("[TCP] Peer closed after {} of {} bytes", received, expected);
                break;
            }
            Ok(Ok(n)) => received += n as u64,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "no data for {:?} after {} of {} bytes",
                    io_timeout, received, expected
                )))
            }
        }
    }

    Ok(received)
}

/// Reads the size line from a freshly accepted connection.
///
/// Stops at the first newline, or at EOF in which case whatever arrived is
/// parsed. Lines longer than [`MAX_SIZE_LINE_LEN`] are rejected.
///
/// # Errors
///
/// [`Error::MalformedSizeField`] for an oversized or non-numeric line,
/// [`Error::Timeout`] if the line does not arrive within `io_timeout`.
pub async fn read_size_line<R>(reader: &mut R, io_timeout: Duration) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(MAX_SIZE_LINE_LEN);
    let mut chunk = [0u8; MAX_SIZE_LINE_LEN];

    loop {
        let n = match time::timeout(io_timeout, reader.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "size line not received within {:?}",
                    io_timeout
                )))
            }
        };
        if n == 0 {
            break;
        }

        line.extend_from_slice(&chunk[..n]);
        if let Some(pos) = line.iter().position(|&b| b == b'\n') {
            line.truncate(pos);
            break;
        }
        if line.len() > MAX_SIZE_LINE_LEN {
            return Err(Error::MalformedSizeField(format!(
                "size line exceeds {} bytes",
                MAX_SIZE_LINE_LEN
            )));
        }
    }

    parse_size_line(&line)
}

/// Writes exactly `count` filler bytes in [`CHUNK_SIZE`] pieces.
///
/// # Errors
///
/// [`Error::Timeout`] if a single chunk cannot be written within
/// `io_timeout`, or the underlying write error.
pub async fn send_stream<W>(writer: &mut W, count: u64, io_timeout: Duration) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let chunk = [FILLER_BYTE; CHUNK_SIZE];
    let mut sent = 0u64;

    while sent < count {
        let len = (count - sent).min(CHUNK_SIZE as u64) as usize;
        match time::timeout(io_timeout, writer.write_all(&chunk[..len])).await {
            Ok(written) => written?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "peer stopped reading after {} of {} bytes",
                    sent, count
                )))
            }
        }
        sent += len as u64;
    }

    writer.flush().await?;
    Ok(sent)
}

/// Runs the server half of one TCP transfer on an accepted connection.
///
/// Timing starts once the size line has been parsed. The connection is
/// shut down after the last byte, which is the receiver's completion
/// signal, and closed when this returns on every path.
pub async fn serve_connection(mut stream: TcpStream, io_timeout: Duration) -> Result<TcpCounters> {
    let requested_size = read_size_line(&mut stream, io_timeout).await?;
    debug!("[TCP] Peer requested {} bytes", requested_size);

    let start = Instant::now();
    let bytes = send_stream(&mut stream, requested_size, io_timeout).await?;
    let elapsed = start.elapsed();

    if let Err(e) = stream.shutdown().await {
        debug!("[TCP] Shutdown after {} bytes failed: {}", bytes, e);
    }

    Ok(TcpCounters {
        requested_size,
        bytes,
        elapsed,
    })
}

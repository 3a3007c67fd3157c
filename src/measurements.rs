//! Turning raw transfer counters into reportable results.
//!
//! Engines only count: bytes or segments, and the wall time they spent.
//! This module derives throughput and loss from those counters and renders
//! the outcome of a transfer or a whole round.

use crate::config::Protocol;
use crate::protocol::{total_segments, SEGMENT_SIZE};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Counters reported by the TCP receiver or sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpCounters {
    pub requested_size: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Counters reported by the UDP requester once its idle window fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpReceiveCounters {
    pub requested_size: u64,
    /// Distinct in-range segment numbers seen.
    pub segments_received: u64,
    /// Datagrams dropped by the magic/type/range checks.
    pub discarded: u64,
    pub elapsed: Duration,
}

/// Counters reported by the UDP responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpSendCounters {
    pub requested_size: u64,
    pub segments_sent: u64,
    pub elapsed: Duration,
}

/// Which end of the transfer produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Measured by the side that sent the data (server).
    Sent,
    /// Measured by the side that received the data (client).
    Received,
}

/// Throughput in bits per second; 0 when no time elapsed.
pub fn bits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0) / secs
    } else {
        0.0
    }
}

/// Share of expected segments that never arrived, in percent.
///
/// Returns 0 when nothing was expected. Receiving more than expected
/// counts as no loss.
pub fn loss_percent(expected: u64, received: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    let missing = expected.saturating_sub(received);
    (missing as f64 * 100.0) / expected as f64
}

/// Outcome of one transfer, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: u64,
    pub protocol: Protocol,
    pub direction: Direction,
    pub elapsed_seconds: f64,
    /// Payload bytes moved; for UDP, counted as whole segments.
    pub bytes: u64,
    pub bits_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_expected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_received: Option<u64>,
    /// UDP receiver only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_percent: Option<f64>,
    /// Set when the transfer aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferResult {
    /// Result of a TCP transfer as measured by either end.
    pub fn tcp(transfer_id: u64, direction: Direction, counters: &TcpCounters) -> Self {
        Self {
            transfer_id,
            protocol: Protocol::Tcp,
            direction,
            elapsed_seconds: counters.elapsed.as_secs_f64(),
            bytes: counters.bytes,
            bits_per_second: bits_per_second(counters.bytes, counters.elapsed),
            segments_expected: None,
            segments_received: None,
            loss_percent: None,
            error: None,
        }
    }

    /// Result of a UDP transfer as measured by the requester.
    pub fn udp_received(transfer_id: u64, counters: &UdpReceiveCounters) -> Self {
        let expected = total_segments(counters.requested_size);
        let bytes = counters.segments_received * SEGMENT_SIZE as u64;
        Self {
            transfer_id,
            protocol: Protocol::Udp,
            direction: Direction::Received,
            elapsed_seconds: counters.elapsed.as_secs_f64(),
            bytes,
            bits_per_second: bits_per_second(bytes, counters.elapsed),
            segments_expected: Some(expected),
            segments_received: Some(counters.segments_received),
            loss_percent: Some(loss_percent(expected, counters.segments_received)),
            error: None,
        }
    }

    /// Result of a UDP transfer as measured by the responder.
    pub fn udp_sent(transfer_id: u64, counters: &UdpSendCounters) -> Self {
        let bytes = counters.segments_sent * SEGMENT_SIZE as u64;
        Self {
            transfer_id,
            protocol: Protocol::Udp,
            direction: Direction::Sent,
            elapsed_seconds: counters.elapsed.as_secs_f64(),
            bytes,
            bits_per_second: bits_per_second(bytes, counters.elapsed),
            segments_expected: Some(total_segments(counters.requested_size)),
            segments_received: None,
            loss_percent: None,
            error: None,
        }
    }

    /// Result of a transfer that aborted with `error`.
    pub fn failed(
        transfer_id: u64,
        protocol: Protocol,
        direction: Direction,
        elapsed: Duration,
        error: &Error,
    ) -> Self {
        Self {
            transfer_id,
            protocol,
            direction,
            elapsed_seconds: elapsed.as_secs_f64(),
            bytes: 0,
            bits_per_second: 0.0,
            segments_expected: None,
            segments_received: None,
            loss_percent: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Formats a bitrate with an iperf-style unit.
pub fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.2} Gbits/sec", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.2} Mbits/sec", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} Kbits/sec", bps / 1_000.0)
    } else {
        format!("{:.2} bits/sec", bps)
    }
}

impl fmt::Display for TransferResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(
                f,
                "[{}] Transfer #{} error: {}",
                self.protocol, self.transfer_id, error
            );
        }

        match self.direction {
            Direction::Received => write!(
                f,
                "[{}] Transfer #{} finished, total time: {:.2}s, speed: {:.2} bits/sec ({})",
                self.protocol,
                self.transfer_id,
                self.elapsed_seconds,
                self.bits_per_second,
                format_bitrate(self.bits_per_second)
            )?,
            Direction::Sent => write!(
                f,
                "[{}] Transfer #{} sent {} bytes in {:.2}s at {:.2} bits/sec ({})",
                self.protocol,
                self.transfer_id,
                self.bytes,
                self.elapsed_seconds,
                self.bits_per_second,
                format_bitrate(self.bits_per_second)
            )?,
        }

        if let Some(loss) = self.loss_percent {
            write!(f, ", packet loss: {:.2}%", loss)?;
        }
        Ok(())
    }
}

/// Aggregate over all results of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub transfers: usize,
    pub failed: usize,
    pub total_bytes: u64,
    /// Sum of the per-transfer TCP rates; the transfers ran concurrently.
    pub tcp_bits_per_second: f64,
    pub udp_bits_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_udp_loss_percent: Option<f64>,
}

impl RoundSummary {
    pub fn from_results(results: &[TransferResult]) -> Self {
        let mut summary = Self {
            transfers: results.len(),
            failed: 0,
            total_bytes: 0,
            tcp_bits_per_second: 0.0,
            udp_bits_per_second: 0.0,
            mean_udp_loss_percent: None,
        };

        let mut loss_sum = 0.0;
        let mut loss_count = 0usize;

        for result in results {
            if !result.is_success() {
                summary.failed += 1;
                continue;
            }
            summary.total_bytes += result.bytes;
            match result.protocol {
                Protocol::Tcp => summary.tcp_bits_per_second += result.bits_per_second,
                Protocol::Udp => summary.udp_bits_per_second += result.bits_per_second,
            }
            if let Some(loss) = result.loss_percent {
                loss_sum += loss;
                loss_count += 1;
            }
        }

        if loss_count > 0 {
            summary.mean_udp_loss_percent = Some(loss_sum / loss_count as f64);
        }
        summary
    }
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transfers ({} failed), {} bytes, TCP {}, UDP {}",
            self.transfers,
            self.failed,
            self.total_bytes,
            format_bitrate(self.tcp_bits_per_second),
            format_bitrate(self.udp_bits_per_second)
        )?;
        if let Some(loss) = self.mean_udp_loss_percent {
            write!(f, ", mean UDP loss {:.2}%", loss)?;
        }
        Ok(())
    }
}

/// Renders the report of one round, one line per result and a summary.
///
/// With `json` set every result and the summary become one JSON object per
/// line; otherwise the [`Display`](fmt::Display) forms are used with a
/// separator before the summary.
///
/// # Errors
///
/// [`Error::Json`] if a result cannot be serialized.
pub fn render_round(results: &[TransferResult], json: bool) -> Result<String> {
    let summary = RoundSummary::from_results(results);
    let mut lines = Vec::with_capacity(results.len() + 2);

    if json {
        for result in results {
            lines.push(serde_json::to_string(result)?);
        }
        lines.push(serde_json::to_string(&summary)?);
    } else {
        lines.extend(results.iter().map(ToString::to_string));
        lines.push("- - - - - - - - - - - - - - - - - - - - - - - - -".to_string());
        lines.push(summary.to_string());
    }

    Ok(lines.join("\n"))
}

//! Wire formats shared by the client and the server.
//!
//! Two transports carry two very different handshakes:
//!
//! - **UDP** uses fixed binary packets guarded by a magic cookie. A client sends
//!   one [`RequestPacket`]; the server answers with a stream of payload packets,
//!   each a [`PayloadHeader`] followed by a [`SEGMENT_SIZE`]-byte filler body.
//! - **TCP** uses a single ASCII size line (`"<decimal>\n"`) after which the
//!   server streams raw filler bytes and closes the connection.
//!
//! # Packet Format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! Request (13 bytes)
//! ┌──────────────┬────────┬──────────────────┐
//! │    Magic     │  Type  │  Requested size  │
//! │   (4 bytes)  │ (0x03) │    (8 bytes)     │
//! └──────────────┴────────┴──────────────────┘
//!
//! Payload (21 + 1024 bytes)
//! ┌──────────────┬────────┬──────────────────┬──────────────────┬──────────────┐
//! │    Magic     │  Type  │  Total segments  │  Segment number  │    Filler    │
//! │   (4 bytes)  │ (0x04) │    (8 bytes)     │    (8 bytes)     │ (1024 bytes) │
//! └──────────────┴────────┴──────────────────┴──────────────────┴──────────────┘
//! ```
//!
//! The message type is always a single byte. No packet carries a checksum:
//! anything past the magic/type check is taken at face value.
//!
//! # Examples
//!
//! ```
//! use netspeed::protocol::{PayloadHeader, RequestPacket, total_segments};
//!
//! let bytes = RequestPacket::new(2048).to_bytes();
//! assert_eq!(RequestPacket::from_bytes(&bytes).unwrap().requested_size, 2048);
//!
//! let header = PayloadHeader::new(total_segments(2048), 1);
//! let parsed = PayloadHeader::from_bytes(&header.to_bytes()).unwrap();
//! assert_eq!(parsed.total_segments, 2);
//! assert_eq!(parsed.segment_number, 1);
//! ```

use crate::{Error, Result};

/// Sentinel that opens every UDP packet.
pub const MAGIC_COOKIE: u32 = 0xABCD_DCBA;

/// Size of one UDP segment body in bytes.
pub const SEGMENT_SIZE: usize = 1024;

/// Byte used for every synthetic payload, on both transports.
pub const FILLER_BYTE: u8 = b'x';

/// Longest TCP size line the server will buffer, newline included.
///
/// `u64::MAX` is 20 digits; the slack covers stray whitespace and `\r`.
pub const MAX_SIZE_LINE_LEN: usize = 64;

/// UDP message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Server discovery broadcast. Recognised but never sent.
    Offer = 0x02,
    /// Client asks the server for a number of bytes.
    Request = 0x03,
    /// One numbered segment of the server's answer.
    Payload = 0x04,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::Offer),
            0x03 => Some(Self::Request),
            0x04 => Some(Self::Payload),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Number of segments needed to carry `requested_size` bytes.
///
/// Every segment is full-sized, so the last one may carry up to
/// `SEGMENT_SIZE - 1` bytes more than were asked for.
///
/// ```
/// use netspeed::protocol::total_segments;
///
/// assert_eq!(total_segments(0), 0);
/// assert_eq!(total_segments(1000), 1);
/// assert_eq!(total_segments(1024), 1);
/// assert_eq!(total_segments(1025), 2);
/// ```
pub fn total_segments(requested_size: u64) -> u64 {
    requested_size.div_ceil(SEGMENT_SIZE as u64)
}

/// Checks length, magic cookie and type byte shared by every UDP packet.
fn check_preamble(bytes: &[u8], min_len: usize, expected: MessageType) -> Result<()> {
    if bytes.len() < min_len {
        return Err(Error::MalformedPacket(format!(
            "expected at least {} bytes, got {}",
            min_len,
            bytes.len()
        )));
    }

    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MAGIC_COOKIE {
        return Err(Error::MalformedPacket(format!(
            "bad magic cookie {:#010x}",
            magic
        )));
    }

    if bytes[4] != expected.as_u8() {
        return Err(Error::MalformedPacket(format!(
            "expected message type {:#04x}, got {:#04x}",
            expected.as_u8(),
            bytes[4]
        )));
    }

    Ok(())
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut field = [0u8; 8];
    field.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(field)
}

/// UDP request for `requested_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPacket {
    pub requested_size: u64,
}

impl RequestPacket {
    /// Encoded size in bytes: magic (4) + type (1) + size (8).
    pub const SIZE: usize = 13;

    pub fn new(requested_size: u64) -> Self {
        Self { requested_size }
    }

    /// Serializes the request (big-endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes[4] = MessageType::Request.as_u8();
        bytes[5..13].copy_from_slice(&self.requested_size.to_be_bytes());
        bytes
    }

    /// Deserializes a request.
    ///
    /// Trailing bytes past the first 13 are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPacket`] if the slice is too short or the magic
    /// cookie or type byte do not match.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_preamble(bytes, Self::SIZE, MessageType::Request)?;
        Ok(Self {
            requested_size: read_u64(bytes, 5),
        })
    }
}

/// Header in front of every UDP payload segment.
///
/// Segment numbers are 1-indexed: a valid header has
/// `1 <= segment_number <= total_segments`. Decoding does not enforce the
/// range; [`PayloadHeader::is_in_range`] lets receivers do so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub total_segments: u64,
    pub segment_number: u64,
}

impl PayloadHeader {
    /// Encoded size in bytes: magic (4) + type (1) + total (8) + number (8).
    pub const SIZE: usize = 21;

    pub fn new(total_segments: u64, segment_number: u64) -> Self {
        Self {
            total_segments,
            segment_number,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes[4] = MessageType::Payload.as_u8();
        bytes[5..13].copy_from_slice(&self.total_segments.to_be_bytes());
        bytes[13..21].copy_from_slice(&self.segment_number.to_be_bytes());
        bytes
    }

    /// Deserializes the header at the start of a payload packet.
    ///
    /// The filler body, if any, is not inspected.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPacket`] if the slice is shorter than 21 bytes or the
    /// magic cookie or type byte do not match.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_preamble(bytes, Self::SIZE, MessageType::Payload)?;
        Ok(Self {
            total_segments: read_u64(bytes, 5),
            segment_number: read_u64(bytes, 13),
        })
    }

    pub fn is_in_range(&self) -> bool {
        self.segment_number >= 1 && self.segment_number <= self.total_segments
    }
}

/// Builds a complete payload packet: header followed by a full filler body.
///
/// The responder reuses one such buffer and patches the segment number in
/// place with [`set_segment_number`].
pub fn create_payload_packet(total_segments: u64, segment_number: u64) -> Vec<u8> {
    let header = PayloadHeader::new(total_segments, segment_number);
    let mut packet = Vec::with_capacity(PayloadHeader::SIZE + SEGMENT_SIZE);
    packet.extend_from_slice(&header.to_bytes());
    packet.resize(PayloadHeader::SIZE + SEGMENT_SIZE, FILLER_BYTE);
    packet
}

/// Overwrites the segment number of a packet built by [`create_payload_packet`].
pub fn set_segment_number(packet: &mut [u8], segment_number: u64) {
    packet[13..21].copy_from_slice(&segment_number.to_be_bytes());
}

/// Encodes the TCP size line: ASCII decimal digits and a trailing `\n`.
///
/// ```
/// use netspeed::protocol::encode_size_line;
///
/// assert_eq!(encode_size_line(4096), b"4096\n");
/// ```
pub fn encode_size_line(requested_size: u64) -> Vec<u8> {
    format!("{}\n", requested_size).into_bytes()
}

/// Parses the bytes of a TCP size line.
///
/// Surrounding ASCII whitespace (including the newline and any `\r`) is
/// stripped; what remains must be a non-empty run of decimal digits that
/// fits in a `u64`.
///
/// # Errors
///
/// [`Error::MalformedSizeField`] for anything else.
pub fn parse_size_line(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::MalformedSizeField("size line is not ASCII".to_string()))?
        .trim();

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedSizeField(format!(
            "expected decimal digits, got {:?}",
            text
        )));
    }

    text.parse::<u64>()
        .map_err(|e| Error::MalformedSizeField(format!("{:?}: {}", text, e)))
}

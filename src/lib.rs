//! netspeed - bulk TCP and segmented UDP speed test
//!
//! A client asks a server for a number of bytes over several concurrent TCP
//! connections and UDP exchanges, then measures how long each transfer took.
//! UDP transfers also report packet loss from numbered fixed-size segments.
//!
//! # Features
//!
//! - Concurrent TCP and UDP transfers in one round, one task per transfer
//! - ASCII size-line handshake on TCP, magic-cookie framed packets on UDP
//! - Throughput per transfer on both ends, loss on the UDP receiver
//! - Human-readable or JSON results
//! - Asynchronous I/O using tokio

pub mod protocol;
pub mod udp;
pub mod tcp;
pub mod server;
pub mod client;
pub mod config;
pub mod measurements;
pub mod error;

pub use error::{Error, Result};
pub use config::{Config, Protocol, TransferRequest};
pub use measurements::{RoundSummary, TransferResult};
pub use client::{Client, ProgressCallback, ProgressEvent};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

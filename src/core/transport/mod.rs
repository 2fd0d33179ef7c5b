//! Transport layer for the sensor link
//!
//! The poll controller only sees the [`Transport`] trait: write one request
//! frame, read one fixed-length response. [`TransportSession`] implements it
//! over any blocking [`Channel`], enforces the sensor's turnaround delay and
//! drops stale input between exchanges; [`serial::open`] produces one backed
//! by a serial port.

pub mod serial;
mod session;

pub use serial::{list_ports, SerialConfig};
pub use session::{TransportSession, DEFAULT_TURNAROUND};

use crate::core::protocol::RequestFrame;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Per-exchange transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request frame was not fully written
    #[error("Write failed after {written} of {expected} bytes: {reason}")]
    WriteFailed {
        /// Bytes accepted by the channel
        written: usize,
        /// Frame length
        expected: usize,
        /// Underlying cause
        reason: String,
    },

    /// The response did not fully arrive before timeout or end of stream
    #[error("Read failed after {received} of {expected} bytes: {reason}")]
    ReadFailed {
        /// Bytes received
        received: usize,
        /// Bytes required
        expected: usize,
        /// Underlying cause
        reason: String,
    },
}

impl TransportError {
    /// Stable identifier for diagnostics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::WriteFailed { .. } => "write_failed",
            TransportError::ReadFailed { .. } => "read_failed",
        }
    }
}

/// Startup errors that end the process
#[derive(Error, Debug)]
pub enum FatalError {
    /// The channel could not be opened or configured
    #[error("Channel {port} unavailable: {reason}")]
    ChannelUnavailable {
        /// Channel identity (port path)
        port: String,
        /// Underlying cause
        reason: String,
    },
}

/// Duplex byte channel that can drop input nobody asked for
///
/// Bytes left over from a previous exchange (line noise, a reply that
/// arrived after its read timed out, the tail of a short read) would shift
/// every later fixed-length read. The session discards them before each
/// request and after each failed read.
pub trait Channel: Read + Write {
    /// Drop all received but unread bytes, returning how many were dropped
    /// (zero if the channel cannot tell)
    fn discard_input(&mut self) -> io::Result<usize>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn discard_input(&mut self) -> io::Result<usize> {
        (**self).discard_input()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Request frames fully written
    pub frames_sent: u64,
    /// Responses fully read
    pub frames_received: u64,
    /// Failed writes and reads
    pub errors: u64,
    /// Stale input bytes dropped before requests or after failed reads
    pub bytes_discarded: u64,
}

/// Half-duplex request/response link to the sensor
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Write a complete request frame
    fn write_frame(&mut self, frame: &RequestFrame) -> Result<(), TransportError>;

    /// Read exactly `expected_len` bytes of response
    fn read_response(&mut self, expected_len: usize) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_frame(&mut self, frame: &RequestFrame) -> Result<(), TransportError> {
        (**self).write_frame(frame)
    }

    fn read_response(&mut self, expected_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_response(expected_len)
    }
}

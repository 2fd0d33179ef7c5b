//! Blocking transport session over a byte channel

use super::{Channel, Transport, TransportError, TransportStats};
use crate::core::protocol::{format_frame, RequestFrame};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Pause between the end of a request and the start of its read
pub const DEFAULT_TURNAROUND: Duration = Duration::from_millis(500);

/// Owns a duplex byte channel and runs request/response exchanges on it
///
/// The read half never starts until `turnaround` has elapsed since the last
/// completed write, so the sensor has time to assemble its reply. Input
/// still pending when a request goes out, or left behind by a failed read,
/// is discarded so it cannot be taken for the next response.
pub struct TransportSession<C> {
    channel: C,
    turnaround: Duration,
    last_write: Option<Instant>,
    stats: TransportStats,
}

impl<C> TransportSession<C> {
    /// Wrap a channel with the default 500 ms turnaround
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            turnaround: DEFAULT_TURNAROUND,
            last_write: None,
            stats: TransportStats::default(),
        }
    }

    /// Override the turnaround delay
    #[must_use]
    pub fn with_turnaround(mut self, turnaround: Duration) -> Self {
        self.turnaround = turnaround;
        self
    }

    /// Configured turnaround delay
    pub fn turnaround(&self) -> Duration {
        self.turnaround
    }

    /// Get statistics
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Borrow the underlying channel
    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    fn wait_turnaround(&mut self) {
        if let Some(written_at) = self.last_write.take() {
            let elapsed = written_at.elapsed();
            if elapsed < self.turnaround {
                std::thread::sleep(self.turnaround - elapsed);
            }
        }
    }
}

impl<C: Channel> TransportSession<C> {
    fn discard_stale_input(&mut self, when: &str) {
        match self.channel.discard_input() {
            Ok(0) => {}
            Ok(n) => {
                self.stats.bytes_discarded += n as u64;
                tracing::debug!(bytes = n, "Discarded stale input {}", when);
            }
            Err(e) => tracing::debug!(error = %e, "Could not discard input {}", when),
        }
    }
}

impl<C: Channel> Transport for TransportSession<C> {
    fn write_frame(&mut self, frame: &RequestFrame) -> Result<(), TransportError> {
        self.discard_stale_input("before request");

        let bytes = frame.as_bytes();
        let expected = bytes.len();
        let mut written = 0;

        let failed = |written: usize, reason: String| TransportError::WriteFailed {
            written,
            expected,
            reason,
        };

        while written < expected {
            match self.channel.write(&bytes[written..]) {
                Ok(0) => {
                    self.stats.errors += 1;
                    return Err(failed(written, "channel accepted no bytes".to_string()));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.stats.errors += 1;
                    return Err(failed(written, e.to_string()));
                }
            }
        }

        if let Err(e) = self.channel.flush() {
            self.stats.errors += 1;
            return Err(failed(written, e.to_string()));
        }

        self.last_write = Some(Instant::now());
        self.stats.bytes_sent += written as u64;
        self.stats.frames_sent += 1;
        tracing::trace!(frame = %format_frame(bytes), "TX");

        Ok(())
    }

    fn read_response(&mut self, expected_len: usize) -> Result<Vec<u8>, TransportError> {
        self.wait_turnaround();

        let mut buffer = vec![0u8; expected_len];
        let mut received = 0;

        while received < expected_len {
            let reason = match self.channel.read(&mut buffer[received..]) {
                Ok(0) => "end of stream".to_string(),
                Ok(n) => {
                    received += n;
                    continue;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::TimedOut => "timed out".to_string(),
                Err(e) => e.to_string(),
            };

            self.stats.bytes_received += received as u64;
            self.stats.errors += 1;
            if received > 0 {
                tracing::trace!(partial = %hex::encode_upper(&buffer[..received]), "RX (incomplete)");
            }
            self.discard_stale_input("after failed read");
            return Err(TransportError::ReadFailed {
                received,
                expected: expected_len,
                reason,
            });
        }

        self.stats.bytes_received += received as u64;
        self.stats.frames_received += 1;
        tracing::trace!(frame = %format_frame(&buffer), "RX");

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::build_request;
    use std::collections::VecDeque;
    use std::io;

    const MOISTURE_REPLY: [u8; 7] = [0x01, 0x03, 0x02, 0x00, 0x7B, 0xF8, 0x67];

    /// Channel that queues a canned reply once a request is flushed
    struct Loopback {
        pending: VecDeque<u8>,
        reply: Vec<u8>,
        output: Vec<u8>,
        write_limit: Option<usize>,
    }

    impl Loopback {
        fn new(reply: &[u8]) -> Self {
            Self {
                pending: VecDeque::new(),
                reply: reply.to_vec(),
                output: Vec::new(),
                write_limit: None,
            }
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // Deliver one byte at a time like a slow UART
            match (buf.first_mut(), self.pending.pop_front()) {
                (Some(slot), Some(byte)) => {
                    *slot = byte;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = match self.write_limit {
                Some(limit) => limit.saturating_sub(self.output.len()),
                None => buf.len(),
            };
            let n = buf.len().min(room);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.pending.extend(self.reply.drain(..));
            Ok(())
        }
    }

    impl Channel for Loopback {
        fn discard_input(&mut self) -> io::Result<usize> {
            let n = self.pending.len();
            self.pending.clear();
            Ok(n)
        }
    }

    struct TimingOut;

    impl Read for TimingOut {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
        }
    }

    impl Write for TimingOut {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for TimingOut {
        fn discard_input(&mut self) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "cannot purge"))
        }
    }

    #[test]
    fn test_write_then_read() {
        let mut session =
            TransportSession::new(Loopback::new(&MOISTURE_REPLY)).with_turnaround(Duration::ZERO);

        session.write_frame(&build_request(0x00)).unwrap();
        let response = session.read_response(7).unwrap();

        assert_eq!(response, MOISTURE_REPLY);
        assert_eq!(session.get_ref().output, build_request(0x00).as_bytes());
        let stats = session.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.bytes_discarded, 0);
    }

    #[test]
    fn test_stale_input_dropped_before_request() {
        let mut channel = Loopback::new(&MOISTURE_REPLY);
        channel.pending.extend([0x00, 0x67, 0x01]);
        let mut session = TransportSession::new(channel).with_turnaround(Duration::ZERO);

        session.write_frame(&build_request(0x00)).unwrap();
        assert_eq!(session.read_response(7).unwrap(), MOISTURE_REPLY);
        assert_eq!(session.stats().bytes_discarded, 3);
    }

    #[test]
    fn test_short_read_fails() {
        let mut session =
            TransportSession::new(Loopback::new(&[0x01, 0x03, 0x02])).with_turnaround(Duration::ZERO);
        session.write_frame(&build_request(0x00)).unwrap();

        let err = session.read_response(7).unwrap_err();
        assert_eq!(
            err,
            TransportError::ReadFailed {
                received: 3,
                expected: 7,
                reason: "end of stream".to_string()
            }
        );
        assert_eq!(session.stats().errors, 1);
    }

    #[test]
    fn test_timeout_is_read_failure() {
        let mut session = TransportSession::new(TimingOut).with_turnaround(Duration::ZERO);
        let err = session.read_response(7).unwrap_err();
        assert_eq!(err.kind(), "read_failed");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_partial_write_fails() {
        let mut channel = Loopback::new(&[]);
        channel.write_limit = Some(5);
        let mut session = TransportSession::new(channel);

        let err = session.write_frame(&build_request(0x02)).unwrap_err();
        assert!(matches!(
            err,
            TransportError::WriteFailed {
                written: 5,
                expected: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_write_error_fails_even_if_purge_unsupported() {
        let mut session = TransportSession::new(TimingOut);
        let err = session.write_frame(&build_request(0x02)).unwrap_err();
        assert_eq!(err.kind(), "write_failed");
        assert!(err.to_string().contains("device unplugged"));
    }

    #[test]
    fn test_turnaround_is_enforced() {
        let turnaround = Duration::from_millis(60);
        let mut session =
            TransportSession::new(Loopback::new(&MOISTURE_REPLY)).with_turnaround(turnaround);

        let started = Instant::now();
        session.write_frame(&build_request(0x00)).unwrap();
        session.read_response(7).unwrap();
        assert!(started.elapsed() >= turnaround);
    }

    #[test]
    fn test_default_turnaround() {
        let session = TransportSession::new(Loopback::new(&[]));
        assert_eq!(session.turnaround(), Duration::from_millis(500));
    }
}

//! Poll triggers
//!
//! The controller does not care what starts a cycle. A trigger source
//! answers "poll again or stop?" and blocks until it knows:
//! - [`IntervalTrigger`] fires on a fixed period until told to stop
//! - [`LineTrigger`] fires once per ENTER on an input stream, stops on `exit`

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::fmt;
use std::io::{self, BufRead, Stderr, StdinLock, Write};
use std::time::Duration;

/// Prompt shown by the interactive trigger
pub const PROMPT: &str = "Press ENTER to poll sensors or type 'exit' to quit:";

/// Decision returned by a trigger source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Run one poll cycle
    Poll,
    /// End the poll loop
    Stop,
}

/// Source of poll triggers
#[cfg_attr(test, mockall::automock)]
pub trait TriggerSource {
    /// Block until the next trigger
    fn next_trigger(&mut self) -> Trigger;
}

/// How poll cycles are started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// One cycle per interval
    Timer(Duration),
    /// One cycle per operator request
    Interactive,
}

/// Fires immediately, then once per interval
///
/// A message on the stop channel (or the channel disconnecting) ends the
/// loop at the next wait, without sleeping out the interval.
pub struct IntervalTrigger {
    interval: Duration,
    stop: Receiver<()>,
    max_cycles: Option<u64>,
    issued: u64,
}

impl IntervalTrigger {
    /// Trigger every `interval` with no stop signal
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: crossbeam_channel::never(),
            max_cycles: None,
            issued: 0,
        }
    }

    /// Stop when a message arrives on `stop`
    #[must_use]
    pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
        self.stop = stop;
        self
    }

    /// Stop after `max_cycles` polls
    #[must_use]
    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Polls issued so far
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

impl TriggerSource for IntervalTrigger {
    fn next_trigger(&mut self) -> Trigger {
        if self.max_cycles.is_some_and(|max| self.issued >= max) {
            return Trigger::Stop;
        }

        if self.issued == 0 {
            if let Ok(()) | Err(TryRecvError::Disconnected) = self.stop.try_recv() {
                return Trigger::Stop;
            }
        } else {
            tracing::info!("Waiting {} seconds...", self.interval.as_secs_f32());
            match self.stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Trigger::Stop,
            }
        }

        self.issued += 1;
        Trigger::Poll
    }
}

/// Fires once per empty line read from `input`
///
/// `exit` or `quit` (any case) and end of input stop the loop. Anything
/// else is ignored with a hint.
pub struct LineTrigger<R, W> {
    input: R,
    prompt: W,
}

impl LineTrigger<StdinLock<'static>, Stderr> {
    /// Read commands from stdin, prompt on stderr
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> LineTrigger<R, W> {
    /// Create a line trigger over arbitrary streams
    pub fn new(input: R, prompt: W) -> Self {
        Self { input, prompt }
    }

    /// Release the prompt writer
    pub fn into_prompt(self) -> W {
        self.prompt
    }

    fn show(&mut self, args: fmt::Arguments<'_>) {
        let result = self.prompt.write_fmt(args).and_then(|()| self.prompt.flush());
        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to write trigger prompt");
        }
    }
}

impl<R: BufRead, W: Write> TriggerSource for LineTrigger<R, W> {
    fn next_trigger(&mut self) -> Trigger {
        let mut line = String::new();
        loop {
            self.show(format_args!("\n{PROMPT} "));

            line.clear();
            match self.input.read_line(&mut line) {
                Ok(0) => return Trigger::Stop,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read trigger input");
                    return Trigger::Stop;
                }
            }

            let command = line.trim();
            if command.is_empty() {
                return Trigger::Poll;
            }
            if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit") {
                self.show(format_args!("Exiting program...\n"));
                return Trigger::Stop;
            }
            self.show(format_args!("Unrecognised input {command:?}\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    #[test]
    fn test_line_trigger_sequence() {
        let input = Cursor::new("\n\nhello\n\nEXIT\n\n");
        let mut trigger = LineTrigger::new(input, Vec::new());

        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert_eq!(trigger.next_trigger(), Trigger::Stop);

        let prompt = String::from_utf8(trigger.into_prompt()).unwrap();
        assert!(prompt.contains(PROMPT));
        assert!(prompt.contains("Unrecognised input \"hello\""));
        assert!(prompt.contains("Exiting program..."));
    }

    /// Prompt stream that rejects every write
    struct ClosedTerminal;

    impl Write for ClosedTerminal {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))
        }
    }

    #[test]
    fn test_line_trigger_survives_prompt_failures() {
        let mut trigger = LineTrigger::new(Cursor::new("\nnoise\n\nexit\n"), ClosedTerminal);

        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert_eq!(trigger.next_trigger(), Trigger::Stop);
    }

    #[test]
    fn test_line_trigger_stops_at_eof() {
        let mut trigger = LineTrigger::new(Cursor::new("   \n"), io::sink());
        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert_eq!(trigger.next_trigger(), Trigger::Stop);
    }

    #[test]
    fn test_interval_first_poll_is_immediate() {
        let mut trigger = IntervalTrigger::new(Duration::from_secs(60)).with_max_cycles(Some(1));
        let started = Instant::now();
        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(trigger.next_trigger(), Trigger::Stop);
        assert_eq!(trigger.issued(), 1);
    }

    #[test]
    fn test_interval_waits_between_polls() {
        let interval = Duration::from_millis(30);
        let mut trigger = IntervalTrigger::new(interval).with_max_cycles(Some(3));

        let started = Instant::now();
        let mut polls = 0;
        while trigger.next_trigger() == Trigger::Poll {
            polls += 1;
        }
        assert_eq!(polls, 3);
        assert!(started.elapsed() >= interval * 2);
    }

    #[test]
    fn test_interval_stop_signal_interrupts_wait() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut trigger = IntervalTrigger::new(Duration::from_secs(3600)).with_stop_signal(rx);

        assert_eq!(trigger.next_trigger(), Trigger::Poll);
        tx.send(()).unwrap();

        let started = Instant::now();
        assert_eq!(trigger.next_trigger(), Trigger::Stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_interval_stop_before_first_poll() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();
        let mut trigger = IntervalTrigger::new(Duration::from_secs(1)).with_stop_signal(rx);
        assert_eq!(trigger.next_trigger(), Trigger::Stop);
    }
}

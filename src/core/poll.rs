//! Poll cycle controller
//!
//! One cycle walks the parameter registry in order and runs one
//! request/response exchange per parameter:
//!
//! ```text
//! Idle -> [build -> write -> turnaround -> read -> validate -> decode] x N -> Idle
//! ```
//!
//! A failed exchange is reported against its parameter and the cycle moves
//! on; nothing is retried until the next cycle.

use crate::core::logger::ReadingSink;
use crate::core::protocol::{
    build_request, decode_value, validate_response, CrcPolicy, ProtocolError, RESPONSE_LEN,
};
use crate::core::registry::{Parameter, ParameterRegistry};
use crate::core::transport::{Transport, TransportError};
use crate::core::trigger::{Trigger, TriggerSource};
use chrono::{DateTime, Local};
use std::fmt;
use thiserror::Error;

/// A decoded measurement from one successful exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Parameter that was read
    pub parameter: Parameter,
    /// Register value as received
    pub raw_value: i16,
    /// Value in the parameter's unit
    pub physical_value: f32,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {}",
            self.parameter.label, self.physical_value, self.parameter.unit
        )
    }
}

/// Why a single exchange produced no reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Write or read on the channel failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response arrived but was not acceptable
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ExchangeError {
    /// Stable identifier for diagnostics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Transport(e) => e.kind(),
            ExchangeError::Protocol(e) => e.kind(),
        }
    }

    /// Whether the failure happened on the channel rather than in the frame
    pub fn is_transport(&self) -> bool {
        matches!(self, ExchangeError::Transport(_))
    }
}

/// A failed exchange, attributed to its parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeFailure {
    /// Parameter whose exchange failed
    pub parameter: Parameter,
    /// What went wrong
    pub error: ExchangeError,
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error reading {}: {}", self.parameter, self.error)
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// When the first exchange started
    pub started_at: DateTime<Local>,
    /// Successful readings in registry order
    pub readings: Vec<Reading>,
    /// Failed exchanges in registry order
    pub failures: Vec<ExchangeFailure>,
}

impl CycleReport {
    /// Every parameter produced a reading
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Find a reading by parameter label
    pub fn reading(&self, label: &str) -> Option<&Reading> {
        self.readings.iter().find(|r| r.parameter.label == label)
    }

    /// Number of failures caused by the channel
    pub fn transport_failures(&self) -> usize {
        self.failures.iter().filter(|f| f.error.is_transport()).count()
    }

    /// Number of failures caused by invalid responses
    pub fn protocol_failures(&self) -> usize {
        self.failures.len() - self.transport_failures()
    }
}

/// Run one request/response exchange for `parameter`
pub fn exchange<T: Transport + ?Sized>(
    transport: &mut T,
    parameter: &Parameter,
    policy: CrcPolicy,
) -> Result<Reading, ExchangeError> {
    let request = build_request(parameter.register_address);
    transport.write_frame(&request)?;

    let raw = transport.read_response(RESPONSE_LEN)?;
    let frame = validate_response(&raw, policy)?;

    Ok(Reading {
        parameter: parameter.clone(),
        raw_value: frame.raw_value(),
        physical_value: decode_value(parameter, &frame),
    })
}

/// Sequences exchanges over an exclusively owned transport
pub struct PollController<T, S> {
    transport: T,
    registry: ParameterRegistry,
    sink: S,
    crc_policy: CrcPolicy,
    cycles: u64,
}

impl<T: Transport, S: ReadingSink> PollController<T, S> {
    /// Create a controller that verifies response CRCs
    pub fn new(transport: T, registry: ParameterRegistry, sink: S) -> Self {
        Self {
            transport,
            registry,
            sink,
            crc_policy: CrcPolicy::Verify,
            cycles: 0,
        }
    }

    /// Set the response CRC policy
    #[must_use]
    pub fn with_crc_policy(mut self, policy: CrcPolicy) -> Self {
        self.crc_policy = policy;
        self
    }

    /// Registry being polled
    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Cycles completed so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Poll every parameter once, in registry order
    pub fn run_one_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;
        let started_at = Local::now();

        tracing::debug!(cycle, parameters = self.registry.len(), "Starting poll cycle");
        sink_result(self.sink.begin_cycle(cycle, started_at), "begin cycle");

        let mut readings = Vec::with_capacity(self.registry.len());
        let mut failures = Vec::new();

        for parameter in self.registry.iter() {
            match exchange(&mut self.transport, parameter, self.crc_policy) {
                Ok(reading) => {
                    tracing::debug!(
                        register = parameter.register_address,
                        raw = reading.raw_value,
                        "{}",
                        reading
                    );
                    sink_result(self.sink.emit(&reading), "emit reading");
                    readings.push(reading);
                }
                Err(error) => {
                    tracing::warn!(
                        register = parameter.register_address,
                        kind = error.kind(),
                        "Error reading {}: {}",
                        parameter.label,
                        error
                    );
                    let failure = ExchangeFailure {
                        parameter: parameter.clone(),
                        error,
                    };
                    sink_result(self.sink.report_failure(&failure), "report failure");
                    failures.push(failure);
                }
            }
        }

        let report = CycleReport {
            cycle,
            started_at,
            readings,
            failures,
        };

        tracing::info!(
            cycle,
            readings = report.readings.len(),
            failures = report.failures.len(),
            "Poll cycle finished"
        );
        sink_result(self.sink.end_cycle(&report), "end cycle");

        report
    }

    /// Run one cycle per [`Trigger::Poll`] until [`Trigger::Stop`]
    ///
    /// Returns the number of cycles run.
    pub fn run_forever<G: TriggerSource + ?Sized>(&mut self, trigger: &mut G) -> u64 {
        let mut ran = 0;
        while let Trigger::Poll = trigger.next_trigger() {
            self.run_one_cycle();
            ran += 1;
        }
        tracing::info!(cycles = ran, "Polling stopped");
        ran
    }
}

fn sink_result(result: std::io::Result<()>, stage: &str) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "Output sink failed to {}", stage);
    }
}

//! # Soilprobe Core Library
//!
//! Polls a 7-in-1 soil sensor (moisture, temperature, conductivity, pH,
//! nitrogen, phosphorus, potassium) over RS-485 using Modbus RTU
//! single-register reads.
//!
//! ## Features
//!
//! - CRC-16/Modbus framing with optional response CRC verification
//! - Fixed 500 ms request/response turnaround
//! - Per-parameter failure isolation: one bad exchange never ends a cycle
//! - Standard (7) and reduced (6, no pH) parameter tables, or a custom one
//! - Console, text, JSON Lines and CSV output
//! - Timer-driven or interactive polling
//!
//! ## Example
//!
//! ```rust,no_run
//! use soilprobe_core::{
//!     ConsoleSink, IntervalTrigger, ParameterRegistry, PollController, SerialConfig,
//! };
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SerialConfig::new("/dev/ttyUSB0", 4800);
//!     let session = soilprobe_core::core::transport::serial::open(&config, Duration::from_millis(500))?;
//!
//!     let mut controller =
//!         PollController::new(session, ParameterRegistry::standard(), ConsoleSink::stdout());
//!     controller.run_forever(&mut IntervalTrigger::new(Duration::from_secs(5)));
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::ExitCodes;
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::logger::{ConsoleSink, FileSink, LogFormat, ReadingSink};
pub use crate::core::poll::{
    exchange, CycleReport, ExchangeError, ExchangeFailure, PollController, Reading,
};
pub use crate::core::protocol::{
    build_request, crc16_modbus, decode_value, validate_response, CrcPolicy, ProtocolError,
    RequestFrame, ResponseFrame,
};
pub use crate::core::registry::{Parameter, ParameterRegistry, RegistryVariant, Scale};
pub use crate::core::transport::{
    Channel, FatalError, SerialConfig, Transport, TransportError, TransportSession,
};
pub use crate::core::trigger::{
    IntervalTrigger, LineTrigger, Trigger, TriggerMode, TriggerSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

//! Core module containing the sensor polling functionality
//!
//! This module provides:
//! - Protocol layer (CRC-16/Modbus, RTU single-register read frames)
//! - Parameter registry (register address, label, unit, scale)
//! - Transport layer (blocking session over serial or any byte channel)
//! - Poll cycle controller
//! - Output sinks (console, text/JSON/CSV logs)
//! - Poll triggers (fixed interval, interactive)

pub mod logger;
pub mod poll;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod trigger;

//! Modbus RTU framing for single holding-register reads
//!
//! Request:  `[slave, 0x03, 0x00, reg, 0x00, 0x01, crc_lo, crc_hi]`
//! Response: `[slave, 0x03, 0x02, data_hi, data_lo, crc_lo, crc_hi]`

use super::checksum;
use crate::core::registry::Parameter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address of the sensor on the bus
pub const SLAVE_ID: u8 = 0x01;

/// Read Holding Registers
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Registers requested per exchange
pub const REGISTER_COUNT: u16 = 1;

/// Request frame length in bytes
pub const REQUEST_LEN: usize = 8;

/// Response frame length for a single-register read
pub const RESPONSE_LEN: usize = 7;

/// Bit set in the function code of an exception response
const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus exception codes (reported, never recovered from)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
}

impl ExceptionCode {
    /// Get exception from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::SlaveDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::SlaveDeviceBusy),
            _ => None,
        }
    }

    /// Get name of exception
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
        }
    }
}

/// Response validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response is not exactly one single-register reply
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame {
        /// Required length
        expected: usize,
        /// Received length
        actual: usize,
    },

    /// Function code is not Read Holding Registers
    #[error("Unexpected function code 0x{found:02X}{}", describe_function(.found, .detail))]
    UnexpectedFunctionCode {
        /// Function code byte as received
        found: u8,
        /// Third byte of the frame (exception code for exception replies)
        detail: u8,
    },

    /// Trailer does not match the recomputed CRC
    #[error("Checksum mismatch: computed 0x{expected:04X}, frame carries 0x{found:04X}")]
    ChecksumMismatch {
        /// CRC computed over the payload
        expected: u16,
        /// CRC carried in the trailer
        found: u16,
    },
}

impl ProtocolError {
    /// Stable identifier for diagnostics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::TruncatedFrame { .. } => "truncated_frame",
            ProtocolError::UnexpectedFunctionCode { .. } => "unexpected_function_code",
            ProtocolError::ChecksumMismatch { .. } => "checksum_mismatch",
        }
    }
}

fn describe_function(found: &u8, detail: &u8) -> String {
    let (found, detail) = (*found, *detail);
    if found & EXCEPTION_FLAG == 0 {
        return String::new();
    }
    match ExceptionCode::from_u8(detail) {
        Some(code) => format!(" (exception response: {})", code.name()),
        None => format!(" (exception response: code 0x{detail:02X})"),
    }
}

/// Whether the response trailer is checked on receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrcPolicy {
    /// Reject responses whose CRC does not match
    #[default]
    Verify,
    /// Accept any trailer (legacy sensors with non-conformant CRCs)
    Ignore,
}

/// An 8-byte read request for one holding register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    bytes: [u8; REQUEST_LEN],
}

impl RequestFrame {
    /// Wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Register this request reads
    pub fn register_address(&self) -> u8 {
        self.bytes[3]
    }
}

/// A validated 7-byte single-register response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    bytes: [u8; RESPONSE_LEN],
}

impl ResponseFrame {
    /// Responding slave address
    pub fn slave_id(&self) -> u8 {
        self.bytes[0]
    }

    /// Function code (always 0x03)
    pub fn function(&self) -> u8 {
        self.bytes[1]
    }

    /// Declared payload length
    pub fn byte_count(&self) -> u8 {
        self.bytes[2]
    }

    /// Register value as a big-endian two's-complement integer
    pub fn raw_value(&self) -> i16 {
        i16::from_be_bytes([self.bytes[3], self.bytes[4]])
    }

    /// CRC trailer as carried on the wire
    pub fn crc(&self) -> u16 {
        u16::from_le_bytes([self.bytes[5], self.bytes[6]])
    }

    /// Wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Build a read request for a single holding register
pub fn build_request(register_address: u8) -> RequestFrame {
    let mut frame = Vec::with_capacity(REQUEST_LEN);
    frame.push(SLAVE_ID);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&u16::from(register_address).to_be_bytes());
    frame.extend_from_slice(&REGISTER_COUNT.to_be_bytes());
    checksum::append_crc16(&mut frame);

    let mut bytes = [0u8; REQUEST_LEN];
    bytes.copy_from_slice(&frame);
    RequestFrame { bytes }
}

/// Validate a raw single-register response
///
/// Length is checked before anything is indexed, then the function code,
/// then (unless `policy` is [`CrcPolicy::Ignore`]) the CRC trailer.
pub fn validate_response(raw: &[u8], policy: CrcPolicy) -> Result<ResponseFrame, ProtocolError> {
    let bytes: [u8; RESPONSE_LEN] = raw.try_into().map_err(|_| ProtocolError::TruncatedFrame {
        expected: RESPONSE_LEN,
        actual: raw.len(),
    })?;

    if bytes[1] != READ_HOLDING_REGISTERS {
        return Err(ProtocolError::UnexpectedFunctionCode {
            found: bytes[1],
            detail: bytes[2],
        });
    }

    if policy == CrcPolicy::Verify {
        let expected = checksum::crc16_modbus(&bytes[..RESPONSE_LEN - checksum::CRC_LEN]);
        let found = u16::from_le_bytes([bytes[5], bytes[6]]);
        if expected != found {
            return Err(ProtocolError::ChecksumMismatch { expected, found });
        }
    }

    Ok(ResponseFrame { bytes })
}

/// Decode the register value of `frame` into physical units
pub fn decode_value(parameter: &Parameter, frame: &ResponseFrame) -> f32 {
    parameter.scale.apply(frame.raw_value())
}

/// Format a frame for trace output
pub fn format_frame(data: &[u8]) -> String {
    if data.len() < 4 {
        return format!("RTU: <{} bytes> {}", data.len(), hex::encode_upper(data));
    }
    let len = data.len();
    format!(
        "RTU: Slave={:02X} Func={:02X} Data={} CRC={:04X}",
        data[0],
        data[1],
        hex::encode_upper(&data[2..len - 2]),
        u16::from_le_bytes([data[len - 2], data[len - 1]])
    )
}

//! Protocol implementations
//!
//! Provides the wire layer for talking to the soil sensor:
//! - CRC-16/Modbus checksum
//! - Modbus RTU single-register read framing and validation

pub mod checksum;
pub mod modbus;

pub use checksum::{crc16_modbus, verify_crc16};
pub use modbus::{
    build_request, decode_value, format_frame, validate_response, CrcPolicy, ExceptionCode,
    ProtocolError, RequestFrame, ResponseFrame, REQUEST_LEN, RESPONSE_LEN,
};

//! CRC-16/Modbus checksum
//!
//! Reflected CRC-16 with polynomial 0xA001 (0x8005 reversed), init 0xFFFF,
//! no final XOR. Transmitted on the wire low byte first.

/// Initial accumulator value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Reflected generator polynomial
pub const CRC16_POLY: u16 = 0xA001;

/// Length of the CRC trailer in bytes
pub const CRC_LEN: usize = 2;

/// CRC-16/Modbus
/// Polynomial: 0x8005, Init: 0xFFFF, RefIn: true, RefOut: true, XorOut: 0x0000
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = CRC16_INIT;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Append the CRC of `frame` to it, low byte first
pub fn append_crc16(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Read the little-endian CRC trailer of a complete frame
pub fn trailer(frame: &[u8]) -> Option<u16> {
    let len = frame.len();
    if len < CRC_LEN {
        return None;
    }
    Some(u16::from_le_bytes([frame[len - 2], frame[len - 1]]))
}

/// Verify the trailing CRC of a complete frame (payload + 2 CRC bytes)
pub fn verify_crc16(frame: &[u8]) -> bool {
    match trailer(frame) {
        Some(received) => crc16_modbus(&frame[..frame.len() - CRC_LEN]) == received,
        None => false,
    }
}

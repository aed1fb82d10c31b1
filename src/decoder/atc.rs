//! Decoder for the ATC custom firmware broadcast format.
//!
//! The payload is a service-data element with a fixed big-endian layout:
//!
//! ```text
//! offset  size  field
//! 0       2     service UUID 0x181A (little-endian)
//! 2       6     sensor MAC address
//! 8       2     temperature, i16, 0.1 °C units
//! 10      1     humidity, %
//! 11      1     battery, %
//! 12      2     battery voltage, mV
//! 14      1     frame counter
//! ```
//!
//! The embedded MAC duplicates the advertisement's source address and is
//! not part of the decoded reading.

use super::DecodeError;
use crate::measurement::AtcReading;

/// Full payload length: 2-byte signature plus the 13-byte fixed layout.
pub const PAYLOAD_LEN: usize = 15;

/// Decode an ATC service-data payload into a reading.
pub fn decode(payload: &[u8]) -> Result<AtcReading, DecodeError> {
    if payload.len() < PAYLOAD_LEN {
        return Err(DecodeError::Truncated {
            expected: PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let data = &payload[2..];
    let raw_temperature = i16::from_be_bytes([data[6], data[7]]);

    Ok(AtcReading {
        temperature: f64::from(raw_temperature) / 10.0,
        humidity: data[8],
        battery: data[9],
        battery_mv: u16::from_be_bytes([data[10], data[11]]),
        frame_counter: data[12],
    })
}

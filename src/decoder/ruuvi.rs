//! Decoder for RuuviTag data format 5 (RAWv2).
//!
//! The payload is a manufacturer-specific data element with a fixed
//! big-endian layout after the little-endian company identifier:
//!
//! ```text
//! offset  size  field
//! 0       2     manufacturer ID 0x0499 (little-endian)
//! 2       1     data format, must be 5
//! 3       2     temperature, i16, 0.005 °C units
//! 5       2     humidity, u16, 0.0025 % units
//! 7       2     pressure, u16, Pa with a -50000 offset
//! 9       6     acceleration x/y/z, i16 each, mG
//! 15      2     packed battery voltage and TX power
//! 17      1     movement counter
//! 18      2     measurement sequence number
//! 20      6     sensor MAC address (not part of the decoded reading)
//! ```
//!
//! See: https://github.com/ruuvi/ruuvi-sensor-protocols/blob/master/dataformat_05.md

use super::DecodeError;
use crate::measurement::RuuviReading;

/// Format discriminator for RAWv2.
pub const DATA_FORMAT: u8 = 5;

/// Minimum payload length: 2-byte signature plus the fixed layout through
/// the sequence number. The trailing MAC bytes are optional padding as far
/// as decoding is concerned.
pub const MIN_PAYLOAD_LEN: usize = 20;

/// Voltage is packed in the top 11 bits of the power field, biased by
/// 1600 mV; TX power lives in the bottom 5 bits as `-40 + 2 * code` dBm.
/// Both are unsigned bit patterns, never sign-extended.
const VOLTAGE_MASK: u16 = 0xFFE0;
const VOLTAGE_SHIFT: u16 = 5;
const VOLTAGE_BIAS_MV: u16 = 1600;
const TX_POWER_MASK: u16 = 0x001F;

/// Raw pressure counts up from 50 kPa.
const PRESSURE_OFFSET_PA: u32 = 50_000;

/// Decode a Ruuvi manufacturer-data payload into a reading.
pub fn decode(payload: &[u8]) -> Result<RuuviReading, DecodeError> {
    // the discriminator gates everything else
    if payload.len() < 3 {
        return Err(DecodeError::Truncated {
            expected: MIN_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let data = &payload[2..];
    if data[0] != DATA_FORMAT {
        return Err(DecodeError::FormatMismatch {
            expected: DATA_FORMAT,
            found: data[0],
        });
    }

    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::Truncated {
            expected: MIN_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let raw_temperature = i16::from_be_bytes([data[1], data[2]]);
    let raw_humidity = u16::from_be_bytes([data[3], data[4]]);
    let raw_pressure = u16::from_be_bytes([data[5], data[6]]);
    let accel_mg = |at: usize| f64::from(i16::from_be_bytes([data[at], data[at + 1]])) / 1000.0;
    let power = u16::from_be_bytes([data[13], data[14]]);

    // 0.005 °C and 0.0025 % per count; dividing by the exact reciprocal
    // keeps the result correctly rounded
    Ok(RuuviReading {
        temperature: f64::from(raw_temperature) / 200.0,
        humidity: f64::from(raw_humidity) / 400.0,
        pressure: u32::from(raw_pressure) + PRESSURE_OFFSET_PA,
        acceleration: (accel_mg(7), accel_mg(9), accel_mg(11)),
        battery_mv: VOLTAGE_BIAS_MV + ((power & VOLTAGE_MASK) >> VOLTAGE_SHIFT),
        tx_power: tx_power_dbm(power),
        movement_counter: data[15],
        sequence: u16::from_be_bytes([data[16], data[17]]),
    })
}

fn tx_power_dbm(power: u16) -> i8 {
    // the 5-bit code ranges 0..=31, so the result fits -40..=22
    (-40 + 2 * (power & TX_POWER_MASK) as i16) as i8
}

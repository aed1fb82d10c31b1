//! Shared test fixtures: a stable device address, canned readings and
//! on-air payload builders for both sensor families.

use crate::mac_address::MacAddress;
use crate::measurement::{AtcReading, RuuviReading};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// A representative ATC reading.
pub fn atc_reading() -> AtcReading {
    AtcReading {
        temperature: 21.5,
        humidity: 47,
        battery: 88,
        battery_mv: 2977,
        frame_counter: 1,
    }
}

/// A representative Ruuvi reading.
pub fn ruuvi_reading() -> RuuviReading {
    RuuviReading {
        temperature: 24.3,
        humidity: 53.49,
        pressure: 100_044,
        acceleration: (0.004, -0.004, 1.036),
        battery_mv: 2977,
        tx_power: 4,
        movement_counter: 66,
        sequence: 205,
    }
}

/// Encode an ATC service-data payload: signature, embedded MAC, then the
/// big-endian measurement fields.
pub fn atc_payload(raw_temp: i16, humidity: u8, battery: u8, battery_mv: u16, frame: u8) -> Vec<u8> {
    let mut data = vec![0x1A, 0x18]; // 0x181A little-endian
    data.extend_from_slice(&TEST_MAC.0);
    data.extend_from_slice(&raw_temp.to_be_bytes());
    data.push(humidity);
    data.push(battery);
    data.extend_from_slice(&battery_mv.to_be_bytes());
    data.push(frame);
    data
}

/// Encode a Ruuvi data format 5 manufacturer-data payload, including the
/// trailing MAC bytes real tags append.
pub fn ruuvi_payload(
    raw_temp: i16,
    raw_humidity: u16,
    raw_pressure: u16,
    accel_mg: (i16, i16, i16),
    power: u16,
    movement: u8,
    sequence: u16,
) -> Vec<u8> {
    let mut data = vec![0x99, 0x04]; // 0x0499 little-endian
    data.push(5);
    data.extend_from_slice(&raw_temp.to_be_bytes());
    data.extend_from_slice(&raw_humidity.to_be_bytes());
    data.extend_from_slice(&raw_pressure.to_be_bytes());
    data.extend_from_slice(&accel_mg.0.to_be_bytes());
    data.extend_from_slice(&accel_mg.1.to_be_bytes());
    data.extend_from_slice(&accel_mg.2.to_be_bytes());
    data.extend_from_slice(&power.to_be_bytes());
    data.push(movement);
    data.extend_from_slice(&sequence.to_be_bytes());
    data.extend_from_slice(&TEST_MAC.0);
    data
}

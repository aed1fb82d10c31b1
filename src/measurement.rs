//! Normalized sensor readings.
//!
//! Each firmware family decodes into its own reading struct; `Measurement`
//! is the closed union of the two. Readings are plain data, immutable once
//! decoded, and every field is in a physical unit (°C, %, Pa, mV, dBm, g).

/// A reading from a Xiaomi thermometer running the ATC custom firmware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtcReading {
    /// Temperature in Celsius, one-decimal precision.
    pub temperature: f64,
    /// Relative humidity in percent (0-100).
    pub humidity: u8,
    /// Battery level in percent (0-100).
    pub battery: u8,
    /// Battery voltage in millivolts.
    pub battery_mv: u16,
    /// Broadcast frame counter, wraps at 255.
    pub frame_counter: u8,
}

/// A reading from a RuuviTag broadcasting data format 5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuuviReading {
    /// Temperature in Celsius, 0.005° resolution.
    pub temperature: f64,
    /// Relative humidity in percent, 0.0025% resolution.
    pub humidity: f64,
    /// Atmospheric pressure in Pascals.
    pub pressure: u32,
    /// Acceleration vector (x, y, z) in g.
    pub acceleration: (f64, f64, f64),
    /// Battery voltage in millivolts.
    pub battery_mv: u16,
    /// Transmit power in dBm.
    pub tx_power: i8,
    /// Movement counter, wraps at 255.
    pub movement_counter: u8,
    /// Measurement sequence number, wraps at 65535.
    pub sequence: u16,
}

/// A decoded measurement from either sensor family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Atc(AtcReading),
    Ruuvi(RuuviReading),
}

impl Measurement {
    /// Temperature in Celsius. Present for both families.
    pub fn temperature(&self) -> f64 {
        match self {
            Measurement::Atc(r) => r.temperature,
            Measurement::Ruuvi(r) => r.temperature,
        }
    }

    /// Relative humidity in percent. Present for both families.
    pub fn humidity(&self) -> f64 {
        match self {
            Measurement::Atc(r) => f64::from(r.humidity),
            Measurement::Ruuvi(r) => r.humidity,
        }
    }

    /// Battery voltage in millivolts. Present for both families.
    pub fn battery_mv(&self) -> u16 {
        match self {
            Measurement::Atc(r) => r.battery_mv,
            Measurement::Ruuvi(r) => r.battery_mv,
        }
    }
}

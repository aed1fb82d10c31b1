//! Broadcast payload decoders for the supported sensor families.
//!
//! Each family owns a recognizer predicate and a fixed-layout decoder. The
//! recognizer answers "is this data element one of mine?" — a miss is not
//! an error, it just means the payload belongs to somebody else's protocol.
//! Only a recognized payload that then turns out to be malformed produces a
//! [`DecodeError`].

pub mod atc;
pub mod ruuvi;

use crate::measurement::Measurement;
use crate::scanner::AdKind;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// 16-bit Environmental Sensing service UUID used by the ATC custom
/// firmware for its service-data broadcasts.
///
/// Bluetooth LE advertisements carry 16-bit identifiers little-endian on
/// air, so the leading payload bytes are `[0x1A, 0x18]`.
pub const ATC_SERVICE_UUID: u16 = 0x181A;

/// Ruuvi Innovations manufacturer ID.
///
/// On air the leading payload bytes are `[0x99, 0x04]`.
/// See: https://github.com/ruuvi/ruuvi-sensor-protocols
pub const RUUVI_MANUFACTURER_ID: u16 = 0x0499;

/// Error types for decoding a recognized broadcast payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is shorter than the family's fixed layout.
    #[error("truncated payload: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    /// Payload declares a data format this decoder does not handle.
    #[error("unsupported data format {found} (expected {expected})")]
    FormatMismatch { expected: u8, found: u8 },
}

/// A sensor firmware family.
///
/// The set is closed: each variant carries its recognize/decode pair and
/// the configuration's firmware selector deserializes straight into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Xiaomi LYWSD03MMC thermometer running the ATC custom firmware;
    /// broadcasts service data under [`ATC_SERVICE_UUID`].
    #[serde(alias = "mijia")]
    Atc,
    /// RuuviTag broadcasting data format 5 as manufacturer-specific data
    /// under [`RUUVI_MANUFACTURER_ID`].
    #[serde(rename = "ruuviv5", alias = "ruuvi")]
    Ruuvi,
}

impl Family {
    /// The 2-byte vendor identifier that opens this family's payloads.
    pub fn signature(self) -> u16 {
        match self {
            Family::Atc => ATC_SERVICE_UUID,
            Family::Ruuvi => RUUVI_MANUFACTURER_ID,
        }
    }

    /// The advertisement data class this family broadcasts in.
    pub fn ad_kind(self) -> AdKind {
        match self {
            Family::Atc => AdKind::ServiceData,
            Family::Ruuvi => AdKind::ManufacturerData,
        }
    }

    /// Check whether a data element belongs to this family.
    ///
    /// Returns `false` for foreign payloads; that is not an error, the
    /// caller simply skips the element.
    pub fn recognize(self, kind: AdKind, payload: &[u8]) -> bool {
        kind == self.ad_kind()
            && payload.len() >= 2
            && u16::from_le_bytes([payload[0], payload[1]]) == self.signature()
    }

    /// Decode a recognized payload into a measurement.
    ///
    /// `payload` is the full AD structure content including the leading
    /// 2-byte vendor signature. Decoding is pure: the same bytes always
    /// yield the same measurement.
    pub fn decode(self, payload: &[u8]) -> Result<Measurement, DecodeError> {
        match self {
            Family::Atc => atc::decode(payload).map(Measurement::Atc),
            Family::Ruuvi => ruuvi::decode(payload).map(Measurement::Ruuvi),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Atc => write!(f, "atc"),
            Family::Ruuvi => write!(f, "ruuviv5"),
        }
    }
}

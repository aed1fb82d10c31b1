//! `sensor-probe` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging
//! setup and process exit codes. The core lives here — configuration,
//! decoders, the sensor registry, the dispatch loop and the sink
//! adapters — where it can be tested deterministically with injected
//! channels and fake sinks.

pub mod config;
pub mod decoder;
pub mod mac_address;
pub mod measurement;
pub mod probe;
pub mod registry;
pub mod scanner;
pub mod sensor;
pub mod sink;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError, SensorConfig};
pub use decoder::{DecodeError, Family};
pub use mac_address::MacAddress;
pub use measurement::{AtcReading, Measurement, RuuviReading};
pub use probe::{Probe, ProbeError};
pub use registry::Registry;
pub use scanner::{AdFragment, AdKind, Backend, RawAdvertisement, ScanError, ScanHandle};
pub use sensor::Sensor;
pub use sink::{DurableSink, LiveSink, Metric, SinkError};
pub use sink::bridge::MqttBridge;
pub use sink::database::PgStore;

//! Output sinks for decoded measurements.
//!
//! Two independently-paced consumers sit behind trait seams so the
//! dispatch loop can be tested with recording fakes: the live sink (the
//! smart-home bridge, fed current values) and the durable sink (the
//! time-series database, fed rows). The shipped adapters live in
//! [`bridge`] and [`database`].

pub mod bridge;
pub mod database;

use crate::measurement::Measurement;
use crate::sensor::Sensor;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Errors from either sink. Sink failures are per-reading events: the
/// loop logs them and moves on, it never tears down over one.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("bridge error: {0}")]
    Bridge(String),
    #[error("database error: {0}")]
    Database(String),
}

/// The metrics exposed through the live sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Temperature => write!(f, "temperature"),
            Metric::Humidity => write!(f, "humidity"),
        }
    }
}

/// The smart-home bridge boundary: one current-value call per metric.
#[allow(async_fn_in_trait)]
pub trait LiveSink {
    /// Set the current value of one metric for one sensor.
    async fn set_current_value(
        &self,
        sensor: &Sensor,
        metric: Metric,
        value: f64,
    ) -> Result<(), SinkError>;

    /// Flush and disconnect. Called once while the dispatch loop drains;
    /// the loop bounds the wait, so taking too long only forfeits the
    /// goodbye.
    async fn shutdown(&self) -> Result<(), SinkError>;
}

/// The time-series database boundary: one row per due reading.
#[allow(async_fn_in_trait)]
pub trait DurableSink {
    /// Insert one reading into `table`. `room` is the sensor's logical
    /// name; `at` is the publish timestamp recorded in the row.
    async fn insert_reading(
        &self,
        table: &str,
        room: &str,
        at: SystemTime,
        reading: &Measurement,
    ) -> Result<(), SinkError>;
}

//! Durable sink adapter: PostgreSQL time-series writes.
//!
//! Each write opens its own connection, runs one parameterized INSERT and
//! disconnects, all bounded by a single timeout. Readings are cheap and
//! minutes apart per sensor; a dropped row costs one interval of history,
//! so there is no queue and no retry here — the loop simply leaves the
//! durable timer unadvanced and the next due reading tries again.

use super::{DurableSink, SinkError};
use crate::measurement::Measurement;
use std::time::{Duration, SystemTime};
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;
use tracing::warn;

/// Bounds one whole write: connect, INSERT, teardown.
pub const DB_CONN_TIMEOUT: Duration = Duration::from_secs(60);

/// Column order is part of the table contract and must match the schema
/// exactly; never reorder these.
const ATC_COLUMNS: [&str; 5] = ["time", "room", "temperature", "humidity", "battery"];
const RUUVI_COLUMNS: [&str; 6] = [
    "time",
    "temperature",
    "humidity",
    "pressure",
    "voltage",
    "txpower",
];

impl From<tokio_postgres::Error> for SinkError {
    fn from(err: tokio_postgres::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

/// PostgreSQL-backed durable sink.
pub struct PgStore {
    url: String,
}

impl PgStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<(), SinkError> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls).await?;

        // the connection future drives the wire protocol; it resolves once
        // the client is dropped
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(%err, "database connection error");
            }
        });

        let result = client.execute(statement, params).await;
        drop(client);
        let _ = driver.await;

        result?;
        Ok(())
    }
}

/// Build `INSERT INTO <table>(<columns>) VALUES($1..$n)`.
///
/// The table name is interpolated, not parameterized; configuration
/// validation restricts it to a plain SQL identifier.
fn insert_statement(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {}({}) VALUES({})",
        table,
        columns.join(","),
        placeholders.join(",")
    )
}

impl DurableSink for PgStore {
    async fn insert_reading(
        &self,
        table: &str,
        room: &str,
        at: SystemTime,
        reading: &Measurement,
    ) -> Result<(), SinkError> {
        let write = async {
            match reading {
                Measurement::Atc(r) => {
                    let statement = insert_statement(table, &ATC_COLUMNS);
                    let humidity = i32::from(r.humidity);
                    let battery = i32::from(r.battery);
                    self.execute(
                        &statement,
                        &[&at, &room, &r.temperature, &humidity, &battery],
                    )
                    .await
                }
                Measurement::Ruuvi(r) => {
                    let statement = insert_statement(table, &RUUVI_COLUMNS);
                    let pressure = r.pressure as i32; // raw maximum is 115535
                    let voltage = i32::from(r.battery_mv);
                    let txpower = i32::from(r.tx_power);
                    self.execute(
                        &statement,
                        &[&at, &r.temperature, &r.humidity, &pressure, &voltage, &txpower],
                    )
                    .await
                }
            }
        };

        match tokio::time::timeout(DB_CONN_TIMEOUT, write).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Database(format!(
                "write to {table} timed out after {DB_CONN_TIMEOUT:?}"
            ))),
        }
    }
}

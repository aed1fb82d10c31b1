//! The dispatch loop.
//!
//! One task owns every sensor entity and consumes three event sources
//! through a single selection point: advertisement reports from the radio,
//! the shutdown signal, and (implicitly) sink completions, which are
//! awaited inline. Serializing everything here is what makes the per-
//! sensor state lock-free — no two reports for the same address are ever
//! in flight at once.
//!
//! The loop moves through three states: `Running` until a shutdown is
//! requested, `Draining` while collaborators get a bounded chance to
//! finish, then `Stopped`.

use crate::registry::Registry;
use crate::scanner::{RawAdvertisement, ScanHandle};
use crate::sink::{DurableSink, LiveSink, Metric};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Bounded wait for the live sink to acknowledge shutdown while draining.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors that terminate the dispatch loop. Per-reading failures never
/// surface here; only losing the radio does.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("radio report channel closed unexpectedly")]
    RadioClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Draining,
    Stopped,
}

/// The probe: the registry plus the loop that drives it.
#[derive(Debug)]
pub struct Probe {
    registry: Registry,
}

impl Probe {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run the dispatch loop until shutdown is requested or the radio
    /// dies.
    ///
    /// Shutdown: flipping `shutdown` to `true` (or dropping its sender)
    /// moves the loop to `Draining` — the report channel is closed, the
    /// scan is stopped, and the live sink gets [`DRAIN_TIMEOUT`] to say
    /// goodbye before the loop returns regardless.
    pub async fn run<L, D>(
        &mut self,
        mut reports: mpsc::Receiver<RawAdvertisement>,
        scan: ScanHandle,
        mut shutdown: watch::Receiver<bool>,
        bridge: &L,
        store: &D,
    ) -> Result<(), ProbeError>
    where
        L: LiveSink,
        D: DurableSink,
    {
        let mut state = State::Running;

        while state == State::Running {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // a dropped sender counts as a shutdown request
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        state = State::Draining;
                    }
                }
                report = reports.recv() => match report {
                    Some(report) => self.handle_report(report, bridge, store).await,
                    None => return Err(ProbeError::RadioClosed),
                },
            }
        }

        info!("shutting down: stopping scan");
        reports.close();
        scan.stop();

        info!("shutting down: draining live sink");
        match tokio::time::timeout(DRAIN_TIMEOUT, bridge.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "live sink shutdown failed"),
            Err(_) => warn!("live sink did not stop within {DRAIN_TIMEOUT:?}, terminating anyway"),
        }

        state = State::Stopped;
        debug!(?state, "dispatch loop finished");
        Ok(())
    }

    /// React to one advertisement: route, decode, update, publish.
    ///
    /// Every failure mode below is a per-reading event — logged, the
    /// reading dropped, the loop untouched.
    async fn handle_report<L, D>(&mut self, report: RawAdvertisement, bridge: &L, store: &D)
    where
        L: LiveSink,
        D: DurableSink,
    {
        let Some(sensor) = self.registry.lookup(report.address) else {
            debug!(address = %report.address, "broadcast from unconfigured device, ignoring");
            return;
        };

        let family = sensor.family;
        let Some(fragment) = report
            .fragments
            .iter()
            .find(|f| family.recognize(f.kind, &f.data))
        else {
            // none of the data elements belong to this sensor's family
            return;
        };

        let reading = match family.decode(&fragment.data) {
            Ok(reading) => reading,
            Err(err) => {
                warn!(sensor = %sensor.name, address = %report.address, %err,
                    "discarding undecodable broadcast");
                return;
            }
        };

        let now = Instant::now();
        sensor.update(reading, now);
        debug!(
            sensor = %sensor.name,
            temperature = reading.temperature(),
            humidity = reading.humidity(),
            "reading"
        );

        if sensor.should_publish_live(now) {
            for metric in [Metric::Temperature, Metric::Humidity] {
                let value = match metric {
                    Metric::Temperature => reading.temperature(),
                    Metric::Humidity => reading.humidity(),
                };
                if let Err(err) = bridge.set_current_value(sensor, metric, value).await {
                    warn!(sensor = %sensor.name, %metric, %err, "live sink update failed");
                }
            }
            // advance even on failure: an unreachable bridge is retried at
            // the live cadence, not on every broadcast
            sensor.mark_published_live(now);
        }

        if sensor.should_publish_durable(now) {
            match store
                .insert_reading(&sensor.table, &sensor.name, SystemTime::now(), &reading)
                .await
            {
                // not advanced on failure: the next due reading retries
                Ok(()) => sensor.mark_published_durable(now),
                Err(err) => {
                    warn!(sensor = %sensor.name, table = %sensor.table, %err,
                        "durable sink write failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Intervals, SensorConfig};
    use crate::decoder::Family;
    use crate::measurement::Measurement;
    use crate::scanner::{AdFragment, AdKind};
    use crate::sink::SinkError;
    use crate::test_utils::{TEST_MAC, atc_payload, ruuvi_payload};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingBridge {
        calls: Arc<Mutex<Vec<(String, Metric, f64)>>>,
        shutdowns: Arc<Mutex<usize>>,
    }

    impl LiveSink for RecordingBridge {
        async fn set_current_value(
            &self,
            sensor: &crate::sensor::Sensor,
            metric: Metric,
            value: f64,
        ) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push((sensor.name.clone(), metric, value));
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), SinkError> {
            *self.shutdowns.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingStore {
        rows: Arc<Mutex<Vec<(String, String, Measurement)>>>,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                rows: Arc::default(),
                fail: true,
            }
        }
    }

    impl DurableSink for RecordingStore {
        async fn insert_reading(
            &self,
            table: &str,
            room: &str,
            _at: SystemTime,
            reading: &Measurement,
        ) -> Result<(), SinkError> {
            self.rows
                .lock()
                .unwrap()
                .push((table.to_string(), room.to_string(), *reading));
            if self.fail {
                return Err(SinkError::Database("connection refused".to_string()));
            }
            Ok(())
        }
    }

    const SAUNA_MAC: crate::mac_address::MacAddress =
        crate::mac_address::MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    fn bedroom_registry() -> Registry {
        let configs = vec![SensorConfig {
            name: "Bedroom".to_string(),
            mac: TEST_MAC,
            firmware: Family::Atc,
            table: "home_temperature".to_string(),
        }];
        Registry::new(&configs, &Intervals::default())
    }

    /// Bedroom (family A) plus Sauna (family B). Tests that need to prove
    /// a report was fully processed send a Sauna report afterwards and
    /// wait for its row: the loop is serial, so by then the earlier
    /// report has run its course.
    fn two_sensor_registry() -> Registry {
        let configs = vec![
            SensorConfig {
                name: "Bedroom".to_string(),
                mac: TEST_MAC,
                firmware: Family::Atc,
                table: "home_temperature".to_string(),
            },
            SensorConfig {
                name: "Sauna".to_string(),
                mac: SAUNA_MAC,
                firmware: Family::Ruuvi,
                table: "sauna_temperature".to_string(),
            },
        ];
        Registry::new(&configs, &Intervals::default())
    }

    fn atc_report() -> RawAdvertisement {
        RawAdvertisement {
            address: TEST_MAC,
            fragments: vec![AdFragment {
                kind: AdKind::ServiceData,
                data: atc_payload(215, 47, 88, 2977, 1),
            }],
        }
    }

    fn sauna_report() -> RawAdvertisement {
        RawAdvertisement {
            address: SAUNA_MAC,
            fragments: vec![AdFragment {
                kind: AdKind::ManufacturerData,
                data: ruuvi_payload(4860, 21396, 50044, (4, -4, 1036), 0xAC36, 66, 205),
            }],
        }
    }

    struct Harness {
        reports: Option<mpsc::Sender<RawAdvertisement>>,
        shutdown: Option<watch::Sender<bool>>,
        bridge: RecordingBridge,
        store: RecordingStore,
        task: tokio::task::JoinHandle<(Probe, Result<(), ProbeError>)>,
    }

    impl Harness {
        fn start(registry: Registry, store: RecordingStore) -> Self {
            let (report_tx, report_rx) = mpsc::channel(16);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let bridge = RecordingBridge::default();

            let task = {
                let bridge = bridge.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    let mut probe = Probe::new(registry);
                    let result = probe
                        .run(report_rx, ScanHandle::noop(), shutdown_rx, &bridge, &store)
                        .await;
                    (probe, result)
                })
            };

            Self {
                reports: Some(report_tx),
                shutdown: Some(shutdown_tx),
                bridge,
                store,
                task,
            }
        }

        async fn send(&self, report: RawAdvertisement) {
            self.reports.as_ref().unwrap().send(report).await.unwrap();
        }

        /// Poll until `cond` holds; the loop runs concurrently with the
        /// test body, so assertions wait for it to catch up.
        async fn wait_until(&self, what: &str, cond: impl Fn() -> bool) {
            for _ in 0..200 {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("timed out waiting for {what}");
        }

        async fn finish(&mut self) -> (Probe, Result<(), ProbeError>) {
            self.shutdown.as_ref().unwrap().send(true).unwrap();
            (&mut self.task).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_bedroom_scenario() {
        let mut h = Harness::start(bedroom_registry(), RecordingStore::default());

        h.send(atc_report()).await;
        let rows = h.store.rows.clone();
        h.wait_until("the durable row", move || !rows.lock().unwrap().is_empty())
            .await;

        let rows = h.store.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        let (table, room, reading) = &rows[0];
        assert_eq!(table, "home_temperature");
        assert_eq!(room, "Bedroom");
        let Measurement::Atc(reading) = reading else {
            panic!("expected a family-A reading");
        };
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 47);
        assert_eq!(reading.battery, 88);

        let calls = h.bridge.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("Bedroom".to_string(), Metric::Temperature, 21.5),
                ("Bedroom".to_string(), Metric::Humidity, 47.0),
            ]
        );

        let (_, result) = h.finish().await;
        result.unwrap();
    }

    #[tokio::test]
    async fn test_rapid_rebroadcasts_are_debounced() {
        let mut h = Harness::start(two_sensor_registry(), RecordingStore::default());

        // same sensor broadcasting three times within the intervals
        h.send(atc_report()).await;
        h.send(atc_report()).await;
        h.send(atc_report()).await;
        h.send(sauna_report()).await;

        let rows = h.store.rows.clone();
        h.wait_until("both sensors' rows", move || rows.lock().unwrap().len() == 2)
            .await;

        let (probe, result) = h.finish().await;
        result.unwrap();

        // all three Bedroom reports were consumed, but only the first
        // published: one row and one temperature/humidity pair
        let rows = h.store.rows.lock().unwrap().clone();
        assert_eq!(rows.iter().filter(|r| r.1 == "Bedroom").count(), 1);
        let calls = h.bridge.calls.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|c| c.0 == "Bedroom").count(), 2);

        // the entity still took every update
        let sensor = probe.registry().get(TEST_MAC).unwrap();
        assert!(sensor.last_reading().is_some());
    }

    #[tokio::test]
    async fn test_unknown_address_is_isolated() {
        let mut h = Harness::start(bedroom_registry(), RecordingStore::default());

        let mut unknown = atc_report();
        unknown.address = "00:11:22:33:44:55".parse().unwrap();
        h.send(unknown).await;

        // follow with a known report so we can tell the loop has caught up
        h.send(atc_report()).await;
        let rows = h.store.rows.clone();
        h.wait_until("the known sensor's row", move || {
            !rows.lock().unwrap().is_empty()
        })
        .await;

        let (probe, result) = h.finish().await;
        result.unwrap();

        // only the configured sensor produced sink traffic and state
        let rows = h.store.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "Bedroom");
        let sensor = probe.registry().get(TEST_MAC).unwrap();
        assert!(sensor.last_reading().is_some());
    }

    #[tokio::test]
    async fn test_undecodable_broadcast_leaves_state_untouched() {
        let mut h = Harness::start(two_sensor_registry(), RecordingStore::default());

        // recognized signature but truncated body
        let mut report = atc_report();
        report.fragments[0].data.truncate(8);
        h.send(report).await;

        h.send(sauna_report()).await;
        let rows = h.store.rows.clone();
        h.wait_until("the sentinel row", move || !rows.lock().unwrap().is_empty())
            .await;

        let (probe, result) = h.finish().await;
        result.unwrap();

        // only the sentinel produced sink traffic
        let rows = h.store.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "Sauna");
        let sensor = probe.registry().get(TEST_MAC).unwrap();
        assert!(sensor.last_reading().is_none());
        assert!(sensor.last_seen().is_none());
    }

    #[tokio::test]
    async fn test_foreign_family_fragment_is_skipped() {
        // a Ruuvi broadcast arriving from an address configured as ATC is
        // a recognizer miss, not an error
        let mut h = Harness::start(two_sensor_registry(), RecordingStore::default());

        let mut crossed = sauna_report();
        crossed.address = TEST_MAC;
        h.send(crossed).await;

        h.send(sauna_report()).await;
        let rows = h.store.rows.clone();
        h.wait_until("the sentinel row", move || !rows.lock().unwrap().is_empty())
            .await;

        let (probe, result) = h.finish().await;
        result.unwrap();

        let rows = h.store.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "Sauna");
        let sensor = probe.registry().get(TEST_MAC).unwrap();
        assert!(sensor.last_reading().is_none());
    }

    #[tokio::test]
    async fn test_failed_durable_write_is_retried_on_next_reading() {
        let mut h = Harness::start(bedroom_registry(), RecordingStore::failing());

        h.send(atc_report()).await;
        let rows = h.store.rows.clone();
        h.wait_until("the first attempt", move || rows.lock().unwrap().len() == 1)
            .await;

        // the timestamp was not advanced, so the next reading tries again
        h.send(atc_report()).await;
        let rows = h.store.rows.clone();
        h.wait_until("the retry", move || rows.lock().unwrap().len() == 2)
            .await;

        // the live timer did advance: one publish pair despite two reports
        let (_, result) = h.finish().await;
        result.unwrap();
        assert_eq!(h.bridge.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_live_sink() {
        let mut h = Harness::start(bedroom_registry(), RecordingStore::default());
        let (_, result) = h.finish().await;
        result.unwrap();
        assert_eq!(*h.bridge.shutdowns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_also_stops_the_loop() {
        let mut h = Harness::start(bedroom_registry(), RecordingStore::default());
        h.shutdown.take();
        let (_, result) = (&mut h.task).await.unwrap();
        result.unwrap();
    }

    #[tokio::test]
    async fn test_radio_loss_is_fatal() {
        let mut h = Harness::start(bedroom_registry(), RecordingStore::default());
        h.reports.take();
        let (_, result) = (&mut h.task).await.unwrap();
        assert!(matches!(result, Err(ProbeError::RadioClosed)));
    }
}

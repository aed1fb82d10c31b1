//! Live sink adapter: retained MQTT state topics.
//!
//! Each sensor exposes one topic per metric under the configured base
//! topic, e.g. `sensor-probe/bedroom/temperature`. Values are published
//! retained so the bridge (and anything else watching the broker) sees
//! the current state immediately on subscribe, which is what makes these
//! topics "current value" rather than an event stream.

use super::{LiveSink, Metric, SinkError};
use crate::config::BridgeConfig;
use crate::sensor::Sensor;
use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the client's request channel; publishes are tiny and
/// infrequent, so a small buffer is plenty.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

impl From<rumqttc::ClientError> for SinkError {
    fn from(err: rumqttc::ClientError) -> Self {
        SinkError::Bridge(err.to_string())
    }
}

/// MQTT-backed live sink.
///
/// Owns the client event loop on a background task; the task must keep
/// polling or the client stalls, so it lives for as long as the bridge
/// does and is aborted on drop.
pub struct MqttBridge {
    client: AsyncClient,
    base_topic: String,
    event_loop: JoinHandle<()>,
}

impl MqttBridge {
    /// Create the client and start its event-loop task. The connection
    /// itself is established lazily by the event loop; a broker outage at
    /// startup surfaces as publish failures, not a construction error.
    pub fn connect(config: &BridgeConfig) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(packet)) => debug!(?packet, "bridge broker event"),
                    Ok(_) => {}
                    Err(err) => {
                        // rumqttc reconnects on the next poll; back off so
                        // a dead broker does not spin this task
                        warn!(%err, "bridge connection error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            base_topic: config.base_topic.clone(),
            event_loop: task,
        }
    }

    fn topic(&self, sensor: &Sensor, metric: Metric) -> String {
        state_topic(&self.base_topic, &sensor.name, metric)
    }
}

impl LiveSink for MqttBridge {
    async fn set_current_value(
        &self,
        sensor: &Sensor,
        metric: Metric,
        value: f64,
    ) -> Result<(), SinkError> {
        let topic = self.topic(sensor, metric);
        self.client
            .publish(topic, QoS::AtLeastOnce, true, format_value(value))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SinkError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

impl Drop for MqttBridge {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Build the state topic for one sensor metric.
pub fn state_topic(base_topic: &str, sensor_name: &str, metric: Metric) -> String {
    format!("{}/{}/{}", base_topic, slug(sensor_name), metric)
}

/// Render a value the way the topics expect it: plain decimal, no
/// trailing zeros beyond what the float carries.
pub fn format_value(value: f64) -> String {
    format!("{value}")
}

/// Turn a sensor name into a single topic level: lowercase, whitespace
/// and topic separators replaced.
fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '#' || c == '+' {
                '-'
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Bedroom"), "bedroom");
        assert_eq!(slug("Living Room"), "living-room");
        assert_eq!(slug("attic/left"), "attic-left");
        assert_eq!(slug("a#b+c"), "a-b-c");
    }

    #[test]
    fn test_state_topic() {
        assert_eq!(
            state_topic("sensor-probe", "Bedroom", Metric::Temperature),
            "sensor-probe/bedroom/temperature"
        );
        assert_eq!(
            state_topic("home/sensors", "Living Room", Metric::Humidity),
            "home/sensors/living-room/humidity"
        );
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(21.5), "21.5");
        assert_eq!(format_value(47.0), "47");
        assert_eq!(format_value(-10.3), "-10.3");
    }
}

//! The sensor registry: hardware address → sensor entity.
//!
//! Built once from the validated configuration and never restructured
//! afterwards. Lookups key on the binary [`MacAddress`], so the case of
//! the incoming address cannot matter. An address without an entry means
//! the broadcast is not ours; the caller discards it.

use crate::config::{Intervals, SensorConfig};
use crate::mac_address::MacAddress;
use crate::scanner::AddressFilter;
use crate::sensor::Sensor;
use std::collections::HashMap;

/// First bridge identity handed to a sensor; id 1 is the bridge itself.
const FIRST_SENSOR_ID: u64 = 2;

#[derive(Debug)]
pub struct Registry {
    sensors: HashMap<MacAddress, Sensor>,
}

impl Registry {
    /// Build the registry from configuration.
    ///
    /// Ids are positional so the bridge sees the same identity for the
    /// same configuration order across restarts. Duplicate addresses are
    /// rejected during configuration validation; should one slip through,
    /// the last entry wins.
    pub fn new(configs: &[SensorConfig], intervals: &Intervals) -> Self {
        let mut sensors = HashMap::with_capacity(configs.len());
        for (i, config) in configs.iter().enumerate() {
            let id = FIRST_SENSOR_ID + i as u64;
            sensors.insert(config.mac, Sensor::new(config, id, intervals));
        }
        Self { sensors }
    }

    /// Look up the sensor for a broadcast's source address.
    pub fn lookup(&mut self, address: MacAddress) -> Option<&mut Sensor> {
        self.sensors.get_mut(&address)
    }

    pub fn get(&self, address: MacAddress) -> Option<&Sensor> {
        self.sensors.get(&address)
    }

    /// The scan filter: every configured hardware address.
    pub fn addresses(&self) -> AddressFilter {
        self.sensors.keys().copied().collect()
    }

    /// Sensors in identity order (configuration order).
    pub fn sensors(&self) -> Vec<&Sensor> {
        let mut sensors: Vec<&Sensor> = self.sensors.values().collect();
        sensors.sort_by_key(|s| s.id);
        sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

//! BlueZ D-Bus backend.
//!
//! Uses the `bluer` crate to register an advertisement monitor with one
//! pattern per vendor signature, so the daemon only wakes us for traffic
//! that could belong to a supported family. The address filter narrows
//! that further to the configured devices before a report is emitted.

use super::{
    AdFragment, AdKind, AddressFilter, RawAdvertisement, REPORT_CHANNEL_BUFFER_SIZE, ScanError,
    ScanHandle,
};
use crate::decoder::{ATC_SERVICE_UUID, RUUVI_MANUFACTURER_ID};
use crate::mac_address::MacAddress;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session, Uuid};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// AD types used in the monitor patterns.
const AD_TYPE_SERVICE_DATA_16BIT: u8 = 0x16;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning via the BlueZ daemon.
pub async fn start_scan(
    filter: AddressFilter,
) -> Result<(mpsc::Receiver<RawAdvertisement>, ScanHandle), ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(REPORT_CHANNEL_BUFFER_SIZE);
    let (stop_tx, mut stop_rx) = oneshot::channel();

    // both signatures are little-endian on air
    let patterns = vec![
        Pattern {
            data_type: AD_TYPE_SERVICE_DATA_16BIT,
            start_position: 0,
            content: ATC_SERVICE_UUID.to_le_bytes().to_vec(),
        },
        Pattern {
            data_type: AD_TYPE_MANUFACTURER_DATA,
            start_position: 0,
            content: RUUVI_MANUFACTURER_ID.to_le_bytes().to_vec(),
        },
    ];

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(patterns),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state; dropping it unregisters the
    // monitor, which is what actually stops the scan.
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!("stop requested, unregistering monitor");
                    break;
                }
                event = monitor_handle.next() => match event {
                    Some(MonitorEvent::DeviceFound(device_id)) => {
                        if let Err(err) =
                            report_device(&adapter, device_id.device, &filter, &tx).await
                        {
                            warn!(%err, "failed to read advertisement data");
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    });

    Ok((rx, ScanHandle::new(stop_tx)))
}

/// Read the advertised data elements of a discovered device and emit a
/// report if the device is one of ours.
async fn report_device(
    adapter: &Adapter,
    address: Address,
    filter: &AddressFilter,
    tx: &mpsc::Sender<RawAdvertisement>,
) -> Result<(), ScanError> {
    let mac: MacAddress = address.into();
    if !filter.is_empty() && !filter.contains(&mac) {
        return Ok(());
    }

    let device = adapter.device(address)?;
    let mut fragments = Vec::new();

    if let Some(service_data) = device.service_data().await? {
        for (uuid, data) in service_data {
            // BlueZ strips the UUID from the payload; put the on-air
            // 2-byte form back so the recognizers see raw AD content
            if let Some(short) = short_uuid(uuid) {
                let mut raw = short.to_le_bytes().to_vec();
                raw.extend_from_slice(&data);
                fragments.push(AdFragment {
                    kind: AdKind::ServiceData,
                    data: raw,
                });
            }
        }
    }

    if let Some(manufacturer_data) = device.manufacturer_data().await? {
        for (id, data) in manufacturer_data {
            let mut raw = id.to_le_bytes().to_vec();
            raw.extend_from_slice(&data);
            fragments.push(AdFragment {
                kind: AdKind::ManufacturerData,
                data: raw,
            });
        }
    }

    if fragments.is_empty() {
        return Ok(());
    }

    let _ = tx
        .send(RawAdvertisement {
            address: mac,
            fragments,
        })
        .await;

    Ok(())
}

/// Bluetooth base UUID with the 16-bit short form zeroed out.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Extract the 16-bit short form from a full service UUID, if it is one
/// of the Bluetooth base UUIDs.
fn short_uuid(uuid: Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = value >> 96;
    if short <= u128::from(u16::MAX) && value & !(0xFFFF_u128 << 96) == BLUETOOTH_BASE_UUID {
        Some(short as u16)
    } else {
        None
    }
}

//! The radio boundary: BLE advertisement sources.
//!
//! Backends scan for advertisements, filter them down to the configured
//! addresses where possible, and push [`RawAdvertisement`] values into an
//! mpsc channel. No decoding happens here — the dispatch loop owns that,
//! because only the loop knows which firmware family a given address is
//! configured as.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::mac_address::MacAddress;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Classes of advertisement data elements the decoders care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdKind {
    /// Service data element (AD type 0x16).
    ServiceData,
    /// Manufacturer-specific data element (AD type 0xFF).
    ManufacturerData,
}

/// One tagged data element from an advertisement.
///
/// `data` is the on-air AD structure content, so it starts with the
/// 2-byte little-endian vendor identifier the recognizers key on.
#[derive(Debug, Clone, PartialEq)]
pub struct AdFragment {
    pub kind: AdKind,
    pub data: Vec<u8>,
}

/// A broadcast packet from one device: the originating hardware address
/// plus the tagged data elements it carried. Ephemeral — decoded or
/// discarded, never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAdvertisement {
    pub address: MacAddress,
    pub fragments: Vec<AdFragment>,
}

/// The set of addresses a scan is restricted to, built once from the
/// registry before the scan starts. An empty filter admits everything.
pub type AddressFilter = HashSet<MacAddress>;

/// Error type for scanner operations. Failing to start a scan is fatal;
/// so is the report channel closing mid-run.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("bluetooth error: {0}")]
    Bluetooth(String),
    #[allow(dead_code)]
    #[error("backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for advertisement reports.
pub const REPORT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Handle for the stop-scan command. Consumed on use: stopping a scan is
/// a one-shot operation.
#[derive(Debug)]
pub struct ScanHandle {
    stop: Option<oneshot::Sender<()>>,
}

impl ScanHandle {
    pub fn new(stop: oneshot::Sender<()>) -> Self {
        Self { stop: Some(stop) }
    }

    /// A handle with nothing to stop, for report sources that are not
    /// real radios (tests, replays).
    pub fn noop() -> Self {
        Self { stop: None }
    }

    /// Ask the backend to stop scanning. Fire-and-forget: the backend
    /// disables the scan and winds down its task, the report channel
    /// closes once it does.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Start scanning with the given backend.
///
/// `filter` restricts reports to the configured addresses; backends apply
/// it as far upstream as their transport allows.
pub async fn start_scan(
    backend: Backend,
    filter: AddressFilter,
) -> Result<(mpsc::Receiver<RawAdvertisement>, ScanHandle), ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(filter).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(filter).await,
    }
}

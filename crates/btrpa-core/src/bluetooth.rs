//! BlueZ advertisement source (Linux, `bluetooth` feature).
//!
//! One [`BluezSource`] drives one adapter. Discovery runs with duplicate
//! reporting enabled so every advertisement, not just the first, reaches
//! the engine.

use std::collections::BTreeMap;

use bluer::{AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::{pin_mut, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::error::{BtrpaError, Result};
use crate::source::{AdvertisementSource, DetectionSender};
use crate::types::DetectionEvent;

/// Advertisement source backed by a BlueZ adapter.
#[derive(Debug, Clone, Default)]
pub struct BluezSource {
    adapter: Option<String>,
}

impl BluezSource {
    /// Scan on the named adapter (e.g. `hci1`).
    #[must_use]
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: Some(adapter.into()),
        }
    }

    /// Scan on the system default adapter.
    #[must_use]
    pub const fn default_adapter() -> Self {
        Self { adapter: None }
    }

    fn label(&self) -> String {
        self.adapter.clone().unwrap_or_else(|| "default".to_string())
    }

    async fn scan(self, sender: DetectionSender, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let label = self.label();
        let failed = |e: bluer::Error| BtrpaError::BluetoothScanFailed {
            adapter: label.clone(),
            message: e.to_string(),
        };

        let session = Session::new().await.map_err(failed)?;
        let adapter = match &self.adapter {
            Some(name) => session
                .adapter(name)
                .map_err(|_| BtrpaError::BluetoothAdapterNotFound)?,
            None => session
                .default_adapter()
                .await
                .map_err(|_| BtrpaError::BluetoothAdapterNotFound)?,
        };
        adapter.set_powered(true).await.map_err(failed)?;
        if !adapter.is_powered().await.map_err(failed)? {
            return Err(BtrpaError::BluetoothAdapterPoweredOff);
        }
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..DiscoveryFilter::default()
            })
            .await
            .map_err(failed)?;

        let adapter_name = adapter.name().to_string();
        info!(adapter = %adapter_name, "Starting BLE discovery");
        let discovery = adapter.discover_devices_with_changes().await.map_err(failed)?;
        pin_mut!(discovery);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = discovery.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if let Some(event) = read_device(&adapter, address, &adapter_name).await {
                            sender.send(event).await?;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        // Dropping the stream ends discovery on this adapter.
        info!(adapter = %adapter_name, "BLE discovery stopped");
        Ok(())
    }
}

/// Snapshot a device's advertisement properties. Devices without a current
/// RSSI are cached entries, not live advertisements, and are skipped.
async fn read_device(
    adapter: &bluer::Adapter,
    address: Address,
    adapter_name: &str,
) -> Option<DetectionEvent> {
    let device = adapter.device(address).ok()?;
    let Some(rssi) = device.rssi().await.ok().flatten() else {
        trace!(%address, "No RSSI, skipping");
        return None;
    };

    let manufacturer_data: BTreeMap<u16, Vec<u8>> = device
        .manufacturer_data()
        .await
        .ok()
        .flatten()
        .map(|data| data.into_iter().collect())
        .unwrap_or_default();
    let mut service_uuids: Vec<String> = device
        .uuids()
        .await
        .ok()
        .flatten()
        .map(|uuids| uuids.into_iter().map(|u| u.to_string()).collect())
        .unwrap_or_default();
    service_uuids.sort();

    debug!(%address, rssi, adapter = adapter_name, "Advertisement");
    Some(DetectionEvent {
        address: address.to_string(),
        rssi,
        tx_power: device.tx_power().await.ok().flatten(),
        name: device.name().await.ok().flatten(),
        manufacturer_data,
        service_uuids,
        timestamp: Utc::now(),
        adapter: Some(adapter_name.to_string()),
    })
}

impl AdvertisementSource for BluezSource {
    fn name(&self) -> String {
        self.label()
    }

    fn run(
        self: Box<Self>,
        sender: DetectionSender,
        shutdown: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin((*self).scan(sender, shutdown))
    }
}

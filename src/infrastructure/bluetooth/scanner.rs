//! BLE device discovery.
//!
//! Passive scan over the platform adapter; every discovered or updated
//! peripheral with an advertised name is forwarded as a
//! [`RadioEvent::DeviceDiscovered`]. Duplicate suppression happens
//! downstream — the radio may legitimately report the same device twice.

use crate::domain::models::DeviceDescriptor;
use crate::infrastructure::bluetooth::radio::RadioEvent;
use anyhow::Result;
use btleplug::api::{Central as _, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// An in-progress scan. Dropping it without [`stop`] leaves the adapter
/// scanning, so the radio always routes through [`stop`].
pub(crate) struct ScanHandle {
    forwarder: JoinHandle<()>,
}

/// Start discovery and spawn the event forwarder.
pub(crate) async fn start(
    adapter: &Adapter,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> Result<ScanHandle> {
    let mut adapter_events = adapter.events().await?;
    adapter.start_scan(ScanFilter::default()).await?;
    info!("scan started");

    let adapter = adapter.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = adapter_events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let Ok(peripheral) = adapter.peripheral(&id).await else {
                continue;
            };
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            // Nameless advertisements are not selectable by the user.
            let Some(name) = props.local_name else {
                continue;
            };

            debug!(device = %name, rssi = ?props.rssi, "device discovered");
            let descriptor = DeviceDescriptor {
                id: id.to_string(),
                name,
                rssi: props.rssi.unwrap_or(0),
            };
            if events.send(RadioEvent::DeviceDiscovered(descriptor)).is_err() {
                break;
            }
        }
    });

    Ok(ScanHandle { forwarder })
}

/// Stop discovery and tear down the forwarder.
pub(crate) async fn stop(adapter: &Adapter, handle: ScanHandle) -> Result<()> {
    handle.forwarder.abort();
    adapter.stop_scan().await?;
    info!("scan stopped");
    Ok(())
}

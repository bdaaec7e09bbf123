//! Peripheral connection and GATT access.
//!
//! Establishes the link, enumerates services/characteristics, locates the
//! Movesense command and data characteristics, and pumps notification
//! payloads and link loss into the radio event channel.

use crate::infrastructure::bluetooth::protocol::{
    COMMAND_CHAR_UUID, DATA_CHAR_UUID, SENSOR_SERVICE_UUID,
};
use crate::infrastructure::bluetooth::radio::RadioEvent;
use anyhow::{anyhow, Result};
use btleplug::api::{Central as _, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One established sensor link and its resolved characteristics.
pub(crate) struct ActiveLink {
    peripheral: Peripheral,
    data_char: Characteristic,
    command_char: Characteristic,
    disconnect_watcher: JoinHandle<()>,
    notification_pump: Option<JoinHandle<()>>,
}

/// Connect to the peripheral with the given platform id and resolve the
/// sensor characteristics. The caller bounds this with its own timeout.
pub(crate) async fn establish(
    adapter: &Adapter,
    device_id: &str,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> Result<ActiveLink> {
    let peripheral = adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.id().to_string() == device_id)
        .ok_or_else(|| anyhow!("device {device_id} is no longer in range"))?;

    peripheral.connect().await?;
    peripheral.discover_services().await?;
    info!(device = device_id, "connected, services discovered");

    // Log the full GATT table; invaluable when a firmware revision moves
    // or renames a characteristic.
    for service in peripheral.services() {
        debug!(service = %service.uuid, "service");
        for characteristic in &service.characteristics {
            debug!(
                characteristic = %characteristic.uuid,
                properties = ?characteristic.properties,
                "  characteristic"
            );
        }
    }

    let characteristics = peripheral.characteristics();
    let find = |uuid| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid && c.service_uuid == SENSOR_SERVICE_UUID)
            .cloned()
            .ok_or_else(|| anyhow!("characteristic {uuid} not found on the sensor service"))
    };
    let data_char = find(DATA_CHAR_UUID)?;
    let command_char = find(COMMAND_CHAR_UUID)?;

    // Surface unsolicited link loss through the same event channel as
    // everything else; the adapter reports it faster than a closing
    // notification stream does.
    let watcher_events = events.clone();
    let peripheral_id = peripheral.id();
    let watcher_adapter = adapter.clone();
    let disconnect_watcher = tokio::spawn(async move {
        let mut adapter_events = match watcher_adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("disconnect watcher unavailable: {e:#}");
                return;
            }
        };
        while let Some(event) = adapter_events.next().await {
            if let CentralEvent::DeviceDisconnected(id) = event {
                if id == peripheral_id {
                    info!("sensor link lost");
                    let _ = watcher_events.send(RadioEvent::Disconnected);
                    break;
                }
            }
        }
    });

    Ok(ActiveLink {
        peripheral,
        data_char,
        command_char,
        disconnect_watcher,
        notification_pump: None,
    })
}

impl ActiveLink {
    pub(crate) async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Acknowledged write; returns once the device has confirmed it, so
    /// successive commands stay ordered.
    pub(crate) async fn write_command(&self, payload: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.command_char, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    /// Enable notifications on the data characteristic and start forwarding
    /// payloads.
    pub(crate) async fn start_notifications(
        &mut self,
        events: mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<()> {
        self.peripheral.subscribe(&self.data_char).await?;
        let mut notifications = self.peripheral.notifications().await?;
        let data_uuid = self.data_char.uuid;

        self.notification_pump = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != data_uuid {
                    continue;
                }
                if events.send(RadioEvent::Frame(notification.value)).is_err() {
                    break;
                }
            }
        }));
        info!("notification delivery active");
        Ok(())
    }

    pub(crate) async fn stop_notifications(&mut self) -> Result<()> {
        if let Some(pump) = self.notification_pump.take() {
            pump.abort();
        }
        self.peripheral.unsubscribe(&self.data_char).await?;
        Ok(())
    }

    /// Release the link. Consumes the handle; the watcher and pump tasks
    /// die with it.
    pub(crate) async fn close(mut self) -> Result<()> {
        self.disconnect_watcher.abort();
        if let Some(pump) = self.notification_pump.take() {
            pump.abort();
        }
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

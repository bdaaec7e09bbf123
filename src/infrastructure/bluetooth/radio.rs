//! Radio abstraction.
//!
//! The session talks to the radio through the [`Radio`] trait and consumes
//! everything the radio produces asynchronously (scan results, notification
//! frames, link loss) as [`RadioEvent`]s on one channel, so a single reactor
//! can dispatch them in received order. [`BtleRadio`] is the production
//! implementation on top of btleplug; tests inject their own.

use crate::domain::models::DeviceDescriptor;
use crate::infrastructure::bluetooth::connection::{self, ActiveLink};
use crate::infrastructure::bluetooth::scanner::{self, ScanHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::Manager as _;
use btleplug::platform::{Adapter, Manager};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Asynchronous deliveries from the radio stack.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    DeviceDiscovered(DeviceDescriptor),
    /// The radio reported a failure while discovery was running.
    ScanFailed(String),
    /// Raw payload from the data characteristic.
    Frame(Vec<u8>),
    /// Unsolicited link loss.
    Disconnected,
}

/// Operations the session needs from a BLE stack. Every implementation
/// feeds its [`RadioEvent`]s into the sender it was constructed with.
#[async_trait]
pub trait Radio: Send + Sync {
    async fn start_scan(&self) -> Result<()>;
    async fn stop_scan(&self) -> Result<()>;
    /// Establish a link and enumerate services and characteristics.
    async fn connect(&self, device_id: &str) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn is_connected(&self) -> bool;
    /// Acknowledged write to the command characteristic.
    async fn write_command(&self, payload: &[u8]) -> Result<()>;
    /// Enable notification delivery on the data characteristic.
    async fn start_notifications(&self) -> Result<()>;
    async fn stop_notifications(&self) -> Result<()>;
}

/// btleplug-backed radio. Owns the platform adapter, at most one scan and
/// at most one peripheral link at a time.
pub struct BtleRadio {
    adapter: Adapter,
    events: mpsc::UnboundedSender<RadioEvent>,
    scan: Mutex<Option<ScanHandle>>,
    link: Mutex<Option<ActiveLink>>,
}

impl BtleRadio {
    /// Bind to the first Bluetooth adapter on the host.
    pub async fn new(events: mpsc::UnboundedSender<RadioEvent>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no bluetooth adapter found"))?;

        Ok(Self {
            adapter,
            events,
            scan: Mutex::new(None),
            link: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn start_scan(&self) -> Result<()> {
        let mut scan = self.scan.lock().await;
        if let Some(active) = scan.take() {
            if let Err(e) = scanner::stop(&self.adapter, active).await {
                warn!("stopping previous scan: {e:#}");
            }
        }
        *scan = Some(scanner::start(&self.adapter, self.events.clone()).await?);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(active) = self.scan.lock().await.take() {
            scanner::stop(&self.adapter, active).await?;
        }
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        let mut link = self.link.lock().await;
        if let Some(stale) = link.take() {
            // A link left behind by an unsolicited disconnect is dead
            // weight; a live one means the caller skipped disconnect().
            if stale.is_connected().await {
                return Err(anyhow!("a sensor is already connected"));
            }
            let _ = stale.close().await;
        }
        *link = Some(connection::establish(&self.adapter, device_id, self.events.clone()).await?);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(active) = self.link.lock().await.take() {
            active.close().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.link.lock().await.as_ref() {
            Some(link) => link.is_connected().await,
            None => false,
        }
    }

    async fn write_command(&self, payload: &[u8]) -> Result<()> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or_else(|| anyhow!("no active link"))?;
        link.write_command(payload).await
    }

    async fn start_notifications(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or_else(|| anyhow!("no active link"))?;
        link.start_notifications(self.events.clone()).await
    }

    async fn stop_notifications(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        match link.as_mut() {
            Some(link) => link.stop_notifications().await,
            None => Ok(()),
        }
    }
}

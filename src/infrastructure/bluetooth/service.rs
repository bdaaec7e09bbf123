//! Sensor session: owns the radio lifecycle and drives scan → connect →
//! stream → disconnect.
//!
//! All radio deliveries arrive on one event channel and are handled by a
//! single reactor task in received order, so decoder, engine, and hub see a
//! serialized view of the world. There is exactly one session per process
//! by ownership: the composition root constructs it and hands out
//! references.

use crate::domain::hub::SessionHub;
use crate::domain::models::{
    DeviceDescriptor, ImuSample, RepetitionState, SessionError, SessionState, Vector3,
};
use crate::domain::exercises::ExerciseConfig;
use crate::domain::repetition::RepetitionEngine;
use crate::infrastructure::bluetooth::commands::CommandChannel;
use crate::infrastructure::bluetooth::protocol::{self, SensorKind, SensorResource, Command};
use crate::infrastructure::bluetooth::radio::{Radio, RadioEvent};
use crate::infrastructure::permissions::PermissionGate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timing knobs for the session. Defaults match the sensor firmware.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Discovery auto-stops after this long.
    pub scan_timeout: Duration,
    /// Bound on link establishment.
    pub connect_timeout: Duration,
    /// Settling delay between consecutive command writes.
    pub command_settle: Duration,
    /// Per-command bound on best-effort teardown writes.
    pub teardown_write_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            command_settle: Duration::from_millis(50),
            teardown_write_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Bumped on every scan start/stop; a stale auto-stop task compares
    /// its generation before firing.
    scan_generation: u64,
    scan_timeout_task: Option<JoinHandle<()>>,
    /// Resources subscribed by the active run, in subscription order.
    subscribed: Vec<SensorResource>,
    /// Message-id → sensor routing learned from the live stream.
    frame_routes: HashMap<u8, SensorKind>,
    latest_accel: Vector3,
    latest_gyro: Vector3,
}

/// The single active sensor session.
pub struct SensorSession {
    radio: Arc<dyn Radio>,
    permissions: Box<dyn PermissionGate>,
    permission_granted: AtomicBool,
    hub: Arc<SessionHub>,
    config: SessionConfig,
    inner: Arc<Mutex<Inner>>,
    engine: Arc<Mutex<Option<RepetitionEngine>>>,
    self_weak: Weak<SensorSession>,
    reactor: JoinHandle<()>,
}

impl SensorSession {
    /// Wire up a session. `events` must be the receiving half of the
    /// channel the radio writes its [`RadioEvent`]s to.
    pub fn new(
        radio: Arc<dyn Radio>,
        permissions: Box<dyn PermissionGate>,
        hub: Arc<SessionHub>,
        events: mpsc::UnboundedReceiver<RadioEvent>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let engine = Arc::new(Mutex::new(None));
        let reactor = tokio::spawn(run_reactor(
            events,
            Arc::clone(&hub),
            Arc::clone(&engine),
            Arc::clone(&inner),
        ));

        Arc::new_cyclic(|weak| Self {
            radio,
            permissions,
            permission_granted: AtomicBool::new(false),
            hub,
            config,
            inner,
            engine,
            self_weak: weak.clone(),
            reactor,
        })
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    /// Begin passive discovery. Requires the permission grant; on denial no
    /// radio operation happens. Clears the device list and auto-stops after
    /// the configured timeout unless cancelled first.
    pub async fn start_scan(&self) -> Result<(), SessionError> {
        if !self.permission_granted.load(Ordering::Acquire) {
            if self.permissions.request_permission().await {
                self.permission_granted.store(true, Ordering::Release);
            } else {
                let error = SessionError::PermissionDenied;
                self.hub.update(|s| s.last_error = Some(error.to_string()));
                return Err(error);
            }
        }

        // Cancel a pending auto-stop from a previous scan before it can
        // fire into the new one.
        let stale = {
            let mut inner = self.inner.lock().unwrap();
            inner.scan_generation += 1;
            inner.scan_timeout_task.take()
        };
        if let Some(task) = stale {
            task.abort();
        }

        if let Err(e) = self.radio.start_scan().await {
            let error = SessionError::ScanError(e.to_string());
            self.hub.update(|s| s.last_error = Some(error.to_string()));
            return Err(error);
        }

        self.hub.update(|s| {
            s.state = SessionState::Scanning;
            s.devices.clear();
            s.last_error = None;
        });

        let generation = self.inner.lock().unwrap().scan_generation;
        let weak = self.self_weak.clone();
        let timeout = self.config.scan_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(session) = weak.upgrade() else { return };
            let current = session.inner.lock().unwrap().scan_generation == generation;
            if current {
                debug!("scan timeout elapsed");
                let _ = session.stop_scan().await;
            }
        });
        self.inner.lock().unwrap().scan_timeout_task = Some(task);

        Ok(())
    }

    /// Stop discovery. Safe to call when not scanning; state is left
    /// unchanged in that case.
    pub async fn stop_scan(&self) -> Result<(), SessionError> {
        let pending = {
            let mut inner = self.inner.lock().unwrap();
            inner.scan_generation += 1;
            inner.scan_timeout_task.take()
        };
        if let Some(task) = pending {
            task.abort();
        }

        if self.hub.state() != SessionState::Scanning {
            return Ok(());
        }

        if let Err(e) = self.radio.stop_scan().await {
            warn!("stopping scan: {e:#}");
        }
        self.hub.update(|s| s.state = SessionState::Idle);
        Ok(())
    }

    /// Connect to a discovered device. A scan in progress is stopped first;
    /// the attempt fails with [`SessionError::ConnectTimeout`] if the link
    /// is not up within the configured bound.
    pub async fn connect(&self, device: &DeviceDescriptor) -> Result<(), SessionError> {
        self.stop_scan().await?;
        if matches!(
            self.hub.state(),
            SessionState::Connected | SessionState::Streaming
        ) {
            self.disconnect().await?;
        }

        info!(device = %device.name, "connecting");
        self.hub.update(|s| {
            s.state = SessionState::Connecting;
            s.last_error = None;
        });

        let attempt =
            tokio::time::timeout(self.config.connect_timeout, self.radio.connect(&device.id)).await;
        let error = match attempt {
            Ok(Ok(())) => {
                self.hub.update(|s| s.state = SessionState::Connected);
                return Ok(());
            }
            Ok(Err(e)) => SessionError::ConnectFailed(e.to_string()),
            Err(_) => SessionError::ConnectTimeout,
        };

        warn!("connect failed: {error}");
        self.hub.update(|s| {
            s.state = SessionState::Idle;
            s.last_error = Some(error.to_string());
        });
        Err(error)
    }

    /// Tear down the active link. Idempotent; ends any active stream first
    /// and clears retained sample data.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        if !matches!(
            self.hub.state(),
            SessionState::Connected | SessionState::Streaming
        ) {
            return Ok(());
        }

        self.end_streaming().await?;
        if let Err(e) = self.radio.disconnect().await {
            warn!("disconnecting: {e:#}");
        }

        *self.engine.lock().unwrap() = None;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribed.clear();
            inner.frame_routes.clear();
        }

        info!("disconnected");
        self.hub.update(|s| {
            s.state = SessionState::Idle;
            s.last_sample = None;
            s.repetition = RepetitionState::default();
        });
        Ok(())
    }

    /// Start a collection run for one exercise. Valid only when connected.
    ///
    /// Notification delivery is confirmed active before the hardware
    /// Subscribe commands go out; the reverse order can lose the first
    /// samples of the run.
    pub async fn begin_streaming(&self, exercise: &ExerciseConfig) -> Result<(), SessionError> {
        if self.hub.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }

        info!(exercise = %exercise.name, "starting data collection");
        {
            let mut inner = self.inner.lock().unwrap();
            inner.frame_routes.clear();
            inner.latest_accel = Default::default();
            inner.latest_gyro = Default::default();
        }
        *self.engine.lock().unwrap() = Some(RepetitionEngine::new(exercise.clone()));
        self.hub.update(|s| s.repetition = RepetitionState::default());

        if let Err(e) = self.radio.start_notifications().await {
            *self.engine.lock().unwrap() = None;
            let error = SessionError::WriteFailed(e.to_string());
            self.hub.update(|s| s.last_error = Some(error.to_string()));
            return Err(error);
        }

        let channel = CommandChannel::new(self.radio.as_ref(), self.config.command_settle);
        for resource in [SensorResource::accelerometer(), SensorResource::gyroscope()] {
            match channel.send(&Command::Subscribe(resource.clone())).await {
                Ok(()) => {
                    debug!(resource = %resource.path(), "subscribed");
                    self.inner.lock().unwrap().subscribed.push(resource);
                }
                Err(error) => {
                    // A failed Subscribe means the run never started; undo
                    // what already went through.
                    warn!(resource = %resource.path(), "subscribe failed: {error}");
                    self.abort_streaming_setup().await;
                    self.hub.update(|s| s.last_error = Some(error.to_string()));
                    return Err(error);
                }
            }
        }

        self.hub.update(|s| s.state = SessionState::Streaming);
        Ok(())
    }

    /// End the collection run: best-effort Unsubscribe for every resource
    /// subscribed by `begin_streaming`, then cancel notification delivery.
    /// Idempotent; write failures never block teardown.
    pub async fn end_streaming(&self) -> Result<(), SessionError> {
        let subscribed: Vec<SensorResource> = {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribed.drain(..).collect()
        };
        if subscribed.is_empty() && self.hub.state() != SessionState::Streaming {
            return Ok(());
        }

        info!("stopping data collection");
        let channel = CommandChannel::new(self.radio.as_ref(), self.config.command_settle);
        for resource in &subscribed {
            let unsubscribe = Command::Unsubscribe(resource.clone());
            match tokio::time::timeout(self.config.teardown_write_wait, channel.send(&unsubscribe))
                .await
            {
                Ok(Ok(())) => debug!(resource = %resource.path(), "unsubscribed"),
                Ok(Err(e)) => warn!(resource = %resource.path(), "unsubscribe failed: {e}"),
                Err(_) => warn!(resource = %resource.path(), "unsubscribe timed out"),
            }
        }

        if let Err(e) = self.radio.stop_notifications().await {
            warn!("cancelling notifications: {e:#}");
        }

        *self.engine.lock().unwrap() = None;
        self.hub.update(|s| {
            if s.state == SessionState::Streaming {
                s.state = SessionState::Connected;
            }
        });
        Ok(())
    }

    /// Zero the repetition counter of the active run without touching the
    /// stream.
    pub fn reset_repetitions(&self) {
        if let Some(engine) = self.engine.lock().unwrap().as_mut() {
            engine.reset();
        }
        self.hub
            .update(|s| s.repetition = RepetitionState::default());
    }

    async fn abort_streaming_setup(&self) {
        let subscribed: Vec<SensorResource> = {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribed.drain(..).collect()
        };
        let channel = CommandChannel::new(self.radio.as_ref(), self.config.command_settle);
        for resource in subscribed {
            let unsubscribe = Command::Unsubscribe(resource);
            let _ = tokio::time::timeout(self.config.teardown_write_wait, channel.send(&unsubscribe))
                .await;
        }
        if let Err(e) = self.radio.stop_notifications().await {
            warn!("cancelling notifications: {e:#}");
        }
        *self.engine.lock().unwrap() = None;
    }
}

impl Drop for SensorSession {
    fn drop(&mut self) {
        self.reactor.abort();
        if let Some(task) = self.inner.lock().unwrap().scan_timeout_task.take() {
            task.abort();
        }
    }
}

/// Consume radio events in received order and dispatch to decoder, engine,
/// and hub.
async fn run_reactor(
    mut events: mpsc::UnboundedReceiver<RadioEvent>,
    hub: Arc<SessionHub>,
    engine: Arc<Mutex<Option<RepetitionEngine>>>,
    inner: Arc<Mutex<Inner>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RadioEvent::DeviceDiscovered(device) => {
                if hub.state() == SessionState::Scanning {
                    hub.add_device(device);
                }
            }
            RadioEvent::ScanFailed(message) => {
                warn!("scan failed: {message}");
                hub.update(|s| {
                    if s.state == SessionState::Scanning {
                        s.state = SessionState::Idle;
                    }
                    s.last_error = Some(SessionError::ScanError(message.clone()).to_string());
                });
            }
            RadioEvent::Frame(bytes) => {
                let frame = match protocol::decode_frame(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // One bad frame must not interrupt the stream.
                        debug!("discarding frame: {e}");
                        continue;
                    }
                };

                let sample = {
                    let mut inner = inner.lock().unwrap();
                    let kind = classify_frame(&mut inner, frame.message_id);
                    match kind {
                        SensorKind::Accelerometer => inner.latest_accel = frame.vector,
                        SensorKind::Gyroscope => inner.latest_gyro = frame.vector,
                    }
                    ImuSample {
                        timestamp_ms: u64::from(frame.timestamp),
                        accelerometer: inner.latest_accel,
                        gyroscope: inner.latest_gyro,
                    }
                };

                let repetition = engine
                    .lock()
                    .unwrap()
                    .as_mut()
                    .map(|e| e.process_sample(&sample));

                hub.update(|s| {
                    s.last_sample = Some(sample);
                    if let Some(repetition) = repetition {
                        s.repetition = repetition;
                    }
                });
            }
            RadioEvent::Disconnected => {
                // Stop mutating immediately; keep the last published counts.
                *engine.lock().unwrap() = None;
                {
                    let mut inner = inner.lock().unwrap();
                    inner.subscribed.clear();
                    inner.frame_routes.clear();
                }
                hub.update(|s| {
                    if matches!(s.state, SessionState::Connected | SessionState::Streaming) {
                        warn!("unsolicited disconnect");
                        s.state = SessionState::Disconnected;
                        s.last_error = Some(SessionError::Disconnected.to_string());
                    }
                });
            }
        }
    }
}

/// Map a message id to a sensor. Ids are handed out by the firmware per
/// subscription, so unseen ids are assigned to resources in subscription
/// order; a lone stream therefore reads as accelerometer data.
fn classify_frame(inner: &mut Inner, message_id: u8) -> SensorKind {
    if let Some(kind) = inner.frame_routes.get(&message_id) {
        return *kind;
    }
    let kind = inner
        .subscribed
        .get(inner.frame_routes.len())
        .map(|r| r.kind)
        .unwrap_or(SensorKind::Accelerometer);
    inner.frame_routes.insert(message_id, kind);
    kind
}

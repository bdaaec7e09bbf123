//! End-to-end session behavior against an in-test radio.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use movesense_trainer_rust::domain::hub::SessionHub;
use movesense_trainer_rust::domain::models::{
    DeviceDescriptor, RepetitionPhase, SessionError, SessionState,
};
use movesense_trainer_rust::exercises;
use movesense_trainer_rust::infrastructure::bluetooth::radio::{Radio, RadioEvent};
use movesense_trainer_rust::infrastructure::bluetooth::{SensorSession, SessionConfig};
use movesense_trainer_rust::infrastructure::permissions::PermissionGate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

struct FakeRadio {
    calls: Mutex<Vec<String>>,
    connected: AtomicBool,
    fail_writes: AtomicBool,
    hang_connect: AtomicBool,
}

impl FakeRadio {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hang_connect: AtomicBool::new(false),
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("write:").map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl Radio for FakeRadio {
    async fn start_scan(&self) -> Result<()> {
        self.record("start_scan");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record("stop_scan");
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<()> {
        self.record(format!("connect:{device_id}"));
        if self.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record("disconnect");
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write_command(&self, payload: &[u8]) -> Result<()> {
        let json = String::from_utf8(BASE64.decode(payload).unwrap()).unwrap();
        self.record(format!("write:{json}"));
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("write rejected");
        }
        Ok(())
    }

    async fn start_notifications(&self) -> Result<()> {
        self.record("start_notifications");
        Ok(())
    }

    async fn stop_notifications(&self) -> Result<()> {
        self.record("stop_notifications");
        Ok(())
    }
}

struct Granted(bool);

#[async_trait]
impl PermissionGate for Granted {
    async fn request_permission(&self) -> bool {
        self.0
    }
}

struct Harness {
    radio: Arc<FakeRadio>,
    events: mpsc::UnboundedSender<RadioEvent>,
    hub: Arc<SessionHub>,
    session: Arc<SensorSession>,
}

fn harness_with_permission(granted: bool) -> Harness {
    let radio = FakeRadio::new();
    let (events, events_rx) = mpsc::unbounded_channel();
    let hub = SessionHub::new();
    let config = SessionConfig {
        scan_timeout: Duration::from_millis(80),
        connect_timeout: Duration::from_millis(80),
        command_settle: Duration::from_millis(1),
        teardown_write_wait: Duration::from_millis(50),
    };
    let session = SensorSession::new(
        Arc::clone(&radio) as Arc<dyn Radio>,
        Box::new(Granted(granted)),
        Arc::clone(&hub),
        events_rx,
        config,
    );
    Harness {
        radio,
        events,
        hub,
        session,
    }
}

fn harness() -> Harness {
    harness_with_permission(true)
}

fn device(id: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.into(),
        name: "Movesense 174630000192".into(),
        rssi: -55,
    }
}

/// A valid 17-byte notification frame.
fn frame(message_id: u8, timestamp: u32, x: f32, y: f32, z: f32) -> Vec<u8> {
    let mut bytes = vec![message_id];
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&x.to_le_bytes());
    bytes.extend_from_slice(&y.to_le_bytes());
    bytes.extend_from_slice(&z.to_le_bytes());
    bytes
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

async fn streaming_harness() -> Harness {
    let h = harness();
    h.session.connect(&device("aa:bb")).await.unwrap();
    h.session.begin_streaming(&exercises::squat()).await.unwrap();
    h
}

#[tokio::test]
async fn permission_denial_performs_no_radio_operation() {
    let h = harness_with_permission(false);

    let result = h.session.start_scan().await;
    assert!(matches!(result, Err(SessionError::PermissionDenied)));
    assert!(h.radio.calls().is_empty());

    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.last_error.unwrap().contains("permission"));
}

#[tokio::test]
async fn scanning_deduplicates_by_identifier() {
    let h = harness();
    h.session.start_scan().await.unwrap();
    assert_eq!(h.hub.state(), SessionState::Scanning);

    h.events
        .send(RadioEvent::DeviceDiscovered(device("aa:bb")))
        .unwrap();
    h.events
        .send(RadioEvent::DeviceDiscovered(device("aa:bb")))
        .unwrap();
    h.events
        .send(RadioEvent::DeviceDiscovered(device("cc:dd")))
        .unwrap();

    wait_for(|| h.hub.snapshot().devices.len() == 2).await;
    let ids: Vec<String> = h.hub.snapshot().devices.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids, vec!["aa:bb".to_string(), "cc:dd".to_string()]);
}

#[tokio::test]
async fn a_new_scan_clears_the_device_list() {
    let h = harness();
    h.session.start_scan().await.unwrap();
    h.events
        .send(RadioEvent::DeviceDiscovered(device("aa:bb")))
        .unwrap();
    wait_for(|| !h.hub.snapshot().devices.is_empty()).await;

    h.session.start_scan().await.unwrap();
    assert!(h.hub.snapshot().devices.is_empty());
}

#[tokio::test]
async fn a_radio_reported_scan_failure_ends_the_scan() {
    let h = harness();
    h.session.start_scan().await.unwrap();

    h.events
        .send(RadioEvent::ScanFailed("adapter powered off".into()))
        .unwrap();

    wait_for(|| h.hub.state() == SessionState::Idle).await;
    assert!(h.hub.snapshot().last_error.unwrap().contains("scan failed"));
}

#[tokio::test]
async fn stop_scan_when_idle_changes_nothing() {
    let h = harness();
    h.session.stop_scan().await.unwrap();

    assert_eq!(h.hub.state(), SessionState::Idle);
    assert!(h.radio.calls().is_empty());
}

#[tokio::test]
async fn scanning_stops_automatically_after_the_timeout() {
    let h = harness();
    h.session.start_scan().await.unwrap();

    wait_for(|| h.hub.state() == SessionState::Idle).await;
    assert!(h.radio.calls().contains(&"stop_scan".to_string()));
}

#[tokio::test]
async fn connect_stops_the_scan_first() {
    let h = harness();
    h.session.start_scan().await.unwrap();
    h.session.connect(&device("aa:bb")).await.unwrap();

    assert_eq!(h.hub.state(), SessionState::Connected);
    let calls = h.radio.calls();
    let stop = calls.iter().position(|c| c == "stop_scan").unwrap();
    let connect = calls.iter().position(|c| c.starts_with("connect:")).unwrap();
    assert!(stop < connect);
}

#[tokio::test]
async fn connect_times_out_against_a_stuck_radio() {
    let h = harness();
    h.radio.hang_connect.store(true, Ordering::SeqCst);

    let result = h.session.connect(&device("aa:bb")).await;
    assert!(matches!(result, Err(SessionError::ConnectTimeout)));

    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn streaming_requires_a_connection() {
    let h = harness();
    let result = h.session.begin_streaming(&exercises::squat()).await;
    assert!(matches!(result, Err(SessionError::NotConnected)));
}

#[tokio::test]
async fn notifications_are_active_before_the_hardware_subscribe() {
    let h = streaming_harness().await;
    assert_eq!(h.hub.state(), SessionState::Streaming);

    let calls = h.radio.calls();
    let notify = calls
        .iter()
        .position(|c| c == "start_notifications")
        .unwrap();
    let first_write = calls.iter().position(|c| c.starts_with("write:")).unwrap();
    assert!(notify < first_write);

    assert_eq!(
        h.radio.writes(),
        vec![
            r#"{"Op":2,"Path":"Meas/Acc/52"}"#.to_string(),
            r#"{"Op":2,"Path":"Meas/Gyro/52"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn a_failed_subscribe_rolls_the_run_back() {
    let h = harness();
    h.session.connect(&device("aa:bb")).await.unwrap();
    h.radio.fail_writes.store(true, Ordering::SeqCst);

    let result = h.session.begin_streaming(&exercises::squat()).await;
    assert!(matches!(result, Err(SessionError::WriteFailed(_))));
    assert_eq!(h.hub.state(), SessionState::Connected);
    assert!(h
        .radio
        .calls()
        .contains(&"stop_notifications".to_string()));
}

#[tokio::test]
async fn end_streaming_attempts_every_unsubscribe_despite_failures() {
    let h = streaming_harness().await;
    h.radio.fail_writes.store(true, Ordering::SeqCst);

    h.session.end_streaming().await.unwrap();

    let unsubscribes: Vec<String> = h
        .radio
        .writes()
        .into_iter()
        .filter(|w| w.contains("\"Op\":3"))
        .collect();
    assert_eq!(
        unsubscribes,
        vec![
            r#"{"Op":3,"Path":"Meas/Acc/52"}"#.to_string(),
            r#"{"Op":3,"Path":"Meas/Gyro/52"}"#.to_string(),
        ]
    );
    assert_eq!(h.hub.state(), SessionState::Connected);
}

#[tokio::test]
async fn disconnect_when_not_connected_changes_nothing() {
    let h = harness();
    h.session.disconnect().await.unwrap();

    assert_eq!(h.hub.state(), SessionState::Idle);
    assert!(h.radio.calls().is_empty());
}

#[tokio::test]
async fn frames_flow_through_decoder_and_engine_to_the_hub() {
    let h = streaming_harness().await;

    for (timestamp, z) in [(0u32, 2.0f32), (400, 0.5), (700, 0.5), (1300, 0.3)] {
        h.events
            .send(RadioEvent::Frame(frame(1, timestamp, 0.01, 0.01, z)))
            .unwrap();
    }

    wait_for(|| {
        h.hub
            .snapshot()
            .last_sample
            .is_some_and(|s| s.timestamp_ms == 1300)
    })
    .await;
    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.repetition.count, 1);
    assert_eq!(snapshot.repetition.phase, RepetitionPhase::Rest);
}

#[tokio::test]
async fn malformed_frames_are_skipped_without_stopping_the_stream() {
    let h = streaming_harness().await;

    h.events.send(RadioEvent::Frame(vec![0u8; 5])).unwrap();
    h.events
        .send(RadioEvent::Frame(frame(1, 20, 0.01, 0.01, 0.4)))
        .unwrap();

    wait_for(|| h.hub.snapshot().last_sample.is_some()).await;
    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.last_sample.unwrap().timestamp_ms, 20);
    assert_eq!(snapshot.repetition.count, 0);
    assert_eq!(h.hub.state(), SessionState::Streaming);
}

#[tokio::test]
async fn second_message_id_routes_to_the_gyroscope() {
    let h = harness();
    h.session.connect(&device("aa:bb")).await.unwrap();
    h.session
        .begin_streaming(&exercises::hip_thrust())
        .await
        .unwrap();

    // First id seen is the accelerometer stream, second the gyroscope.
    h.events
        .send(RadioEvent::Frame(frame(1, 0, 0.0, 0.0, 0.0)))
        .unwrap();
    h.events
        .send(RadioEvent::Frame(frame(2, 10, 0.0, 90.0, 0.0)))
        .unwrap();

    wait_for(|| h.hub.snapshot().repetition.phase == RepetitionPhase::Concentric).await;
    let sample = h.hub.snapshot().last_sample.unwrap();
    assert_eq!(sample.gyroscope.y, 90.0);
    assert_eq!(sample.accelerometer.y, 0.0);
}

#[tokio::test]
async fn unsolicited_disconnect_keeps_the_last_published_counts() {
    let h = streaming_harness().await;

    for (timestamp, z) in [(0u32, 2.0f32), (400, 0.5), (700, 0.3)] {
        h.events
            .send(RadioEvent::Frame(frame(1, timestamp, 0.01, 0.01, z)))
            .unwrap();
    }
    wait_for(|| h.hub.snapshot().repetition.count == 1).await;

    h.events.send(RadioEvent::Disconnected).unwrap();
    wait_for(|| h.hub.state() == SessionState::Disconnected).await;

    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.repetition.count, 1);
    assert!(snapshot.last_error.unwrap().contains("link lost"));

    // Teardown already happened; ending the stream again is a no-op.
    h.session.end_streaming().await.unwrap();
    assert_eq!(h.hub.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn reset_zeroes_the_published_repetition_state() {
    let h = streaming_harness().await;

    for (timestamp, z) in [(0u32, 2.0f32), (400, 0.5), (700, 0.3)] {
        h.events
            .send(RadioEvent::Frame(frame(1, timestamp, 0.01, 0.01, z)))
            .unwrap();
    }
    wait_for(|| h.hub.snapshot().repetition.count == 1).await;

    h.session.reset_repetitions();
    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.repetition.count, 0);
    assert_eq!(snapshot.repetition.phase, RepetitionPhase::Rest);
}

#[tokio::test]
async fn disconnect_clears_retained_sample_data() {
    let h = streaming_harness().await;
    h.events
        .send(RadioEvent::Frame(frame(1, 10, 0.01, 0.01, 0.4)))
        .unwrap();
    wait_for(|| h.hub.snapshot().last_sample.is_some()).await;

    h.session.disconnect().await.unwrap();

    let snapshot = h.hub.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.last_sample.is_none());
    assert_eq!(snapshot.repetition.count, 0);
    assert!(h.radio.calls().contains(&"disconnect".to_string()));
}

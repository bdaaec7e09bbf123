use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One spatial axis of the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A 3-axis vector as reported by the IMU.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn component(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Euclidean norm, accumulated in f64 so extreme components don't
    /// overflow the intermediate squares.
    pub fn magnitude(&self) -> f64 {
        let x = f64::from(self.x);
        let y = f64::from(self.y);
        let z = f64::from(self.z);
        (x * x + y * y + z * z).sqrt()
    }
}

/// One decoded IMU sample. Produced by the frame decoder, consumed by the
/// repetition engine, retained only in the engine's small rolling buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Device timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub accelerometer: Vector3,
    /// All-zero when the device only streams accelerometer frames.
    pub gyroscope: Vector3,
}

/// A device seen during a scan. Ephemeral; the list is cleared whenever a
/// new scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Platform BLE identifier (UUID string on macOS/Windows, MAC on Linux).
    pub id: String,
    /// Advertised name.
    pub name: String,
    /// Signal strength in dBm at discovery time.
    pub rssi: i16,
}

/// Lifecycle state of the single active sensor session. Only the session
/// itself moves this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Streaming,
    Disconnected,
}

/// Phase of the repetition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepetitionPhase {
    #[default]
    Rest,
    Concentric,
    Eccentric,
}

/// Repetition counter output, published to the hub on every sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RepetitionState {
    /// Never decreases within a run except through an explicit reset.
    pub count: u32,
    pub phase: RepetitionPhase,
    /// Device timestamp of the last phase transition.
    pub last_transition_ms: u64,
}

/// Failures surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bluetooth permission was not granted")]
    PermissionDenied,
    #[error("scan failed: {0}")]
    ScanError(String),
    #[error("connection attempt timed out")]
    ConnectTimeout,
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("no sensor is connected")]
    NotConnected,
    #[error("characteristic write failed: {0}")]
    WriteFailed(String),
    #[error("sensor link lost")]
    Disconnected,
}

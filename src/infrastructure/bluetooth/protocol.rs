//! Movesense wire protocol.
//!
//! Commands are `{"Op": <int>, "Path": "Meas/<Sensor>/<RateHz>"}` JSON,
//! UTF-8 encoded and then radix-64 encoded before the characteristic write.
//! Data notifications are binary: a 1-byte message id, a 4-byte
//! little-endian timestamp, and one 3-axis vector of little-endian f32.

use crate::domain::models::Vector3;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Movesense primary service.
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x34802252_7185_4d5d_b431_630e7050e8f0);

/// Write characteristic for subscribe/unsubscribe commands.
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x34800001_7185_4d5d_b431_630e7050e8f0);

/// Notify characteristic carrying sensor frames.
pub const DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x34800002_7185_4d5d_b431_630e7050e8f0);

/// Sample rate requested from every sensor stream.
pub const DEFAULT_SAMPLE_RATE_HZ: u16 = 52;

/// Smallest decodable frame: id byte + u32 timestamp + three f32.
pub const MIN_FRAME_LEN: usize = 17;

const OP_SUBSCRIBE: u8 = 2;
const OP_UNSUBSCRIBE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
}

impl SensorKind {
    fn wire_name(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "Acc",
            SensorKind::Gyroscope => "Gyro",
        }
    }
}

/// One subscribable sensor stream at a given rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorResource {
    pub kind: SensorKind,
    pub rate_hz: u16,
}

impl SensorResource {
    pub const fn new(kind: SensorKind, rate_hz: u16) -> Self {
        Self { kind, rate_hz }
    }

    pub fn accelerometer() -> Self {
        Self::new(SensorKind::Accelerometer, DEFAULT_SAMPLE_RATE_HZ)
    }

    pub fn gyroscope() -> Self {
        Self::new(SensorKind::Gyroscope, DEFAULT_SAMPLE_RATE_HZ)
    }

    /// Resource path as the firmware expects it, e.g. `Meas/Acc/52`.
    pub fn path(&self) -> String {
        format!("Meas/{}/{}", self.kind.wire_name(), self.rate_hz)
    }
}

/// A command for the sensor's command characteristic. Constructed,
/// serialized, sent, discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(SensorResource),
    Unsubscribe(SensorResource),
}

#[derive(Serialize)]
struct WireCommand<'a> {
    #[serde(rename = "Op")]
    op: u8,
    #[serde(rename = "Path")]
    path: &'a str,
}

impl Command {
    pub fn resource(&self) -> &SensorResource {
        match self {
            Command::Subscribe(r) | Command::Unsubscribe(r) => r,
        }
    }

    fn op_code(&self) -> u8 {
        match self {
            Command::Subscribe(_) => OP_SUBSCRIBE,
            Command::Unsubscribe(_) => OP_UNSUBSCRIBE,
        }
    }

    /// Bytes to write to the command characteristic.
    pub fn encode(&self) -> Vec<u8> {
        let path = self.resource().path();
        let wire = WireCommand {
            op: self.op_code(),
            path: &path,
        };
        let json = serde_json::to_string(&wire).expect("command serialization is infallible");
        BASE64.encode(json.as_bytes()).into_bytes()
    }
}

/// Decode failures for a single notification payload. The caller logs and
/// discards; a bad frame never interrupts the stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need at least {MIN_FRAME_LEN}")]
    ShortFrame { len: usize },
    #[error("invalid transport encoding: {0}")]
    Encoding(String),
}

/// One decoded notification. Which sensor the vector belongs to is decided
/// by the session from the message id; the decoder keeps no state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawFrame {
    pub message_id: u8,
    /// Device timestamp in milliseconds.
    pub timestamp: u32,
    pub vector: Vector3,
}

/// Decode one raw notification payload.
pub fn decode_frame(bytes: &[u8]) -> Result<RawFrame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::ShortFrame { len: bytes.len() });
    }

    let message_id = bytes[0];
    let timestamp = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let vector = Vector3::new(read_f32(bytes, 5), read_f32(bytes, 9), read_f32(bytes, 13));

    Ok(RawFrame {
        message_id,
        timestamp,
        vector,
    })
}

/// Decode a payload delivered in the transport's radix-64 text form.
pub fn decode_base64_frame(text: &str) -> Result<RawFrame, FrameError> {
    let bytes = BASE64
        .decode(text)
        .map_err(|e| FrameError::Encoding(e.to_string()))?;
    decode_frame(&bytes)
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a valid frame from known float bit patterns.
    fn frame_bytes(message_id: u8, timestamp: u32, x: f32, y: f32, z: f32) -> Vec<u8> {
        let mut bytes = vec![message_id];
        bytes.extend_from_slice(&timestamp.to_le_bytes());
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&z.to_le_bytes());
        bytes
    }

    #[test]
    fn subscribe_command_encodes_to_known_wire_form() {
        let bytes = Command::Subscribe(SensorResource::accelerometer()).encode();
        let json = BASE64.decode(&bytes).unwrap();
        assert_eq!(json, br#"{"Op":2,"Path":"Meas/Acc/52"}"#);
    }

    #[test]
    fn unsubscribe_command_uses_op_three() {
        let bytes = Command::Unsubscribe(SensorResource::gyroscope()).encode();
        let json = BASE64.decode(&bytes).unwrap();
        assert_eq!(json, br#"{"Op":3,"Path":"Meas/Gyro/52"}"#);
    }

    #[test]
    fn every_short_buffer_yields_short_frame() {
        for len in 0..MIN_FRAME_LEN {
            let bytes = vec![0u8; len];
            assert_eq!(decode_frame(&bytes), Err(FrameError::ShortFrame { len }));
        }
    }

    #[test]
    fn decoding_is_bit_exact() {
        let bytes = frame_bytes(1, 123_456, 0.25, -9.81, f32::MIN_POSITIVE);
        let frame = decode_frame(&bytes).unwrap();

        assert_eq!(frame.message_id, 1);
        assert_eq!(frame.timestamp, 123_456);
        assert_eq!(frame.vector.x.to_bits(), 0.25f32.to_bits());
        assert_eq!(frame.vector.y.to_bits(), (-9.81f32).to_bits());
        assert_eq!(frame.vector.z.to_bits(), f32::MIN_POSITIVE.to_bits());
    }

    #[test]
    fn trailing_bytes_are_tolerated() {
        let mut bytes = frame_bytes(2, 7, 1.0, 2.0, 3.0);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let frame = decode_frame(&bytes).unwrap();
        assert_eq!(frame.vector, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn base64_frames_round_trip() {
        let bytes = frame_bytes(1, 42, 0.5, 1.5, -2.5);
        let encoded = BASE64.encode(&bytes);
        let frame = decode_base64_frame(&encoded).unwrap();
        assert_eq!(frame.timestamp, 42);
        assert_eq!(frame.vector, Vector3::new(0.5, 1.5, -2.5));
    }

    #[test]
    fn malformed_base64_is_an_encoding_error() {
        assert!(matches!(
            decode_base64_frame("not-base64!!"),
            Err(FrameError::Encoding(_))
        ));
    }

    #[test]
    fn magnitude_survives_extreme_components() {
        let v = Vector3::new(f32::MAX, f32::MAX, f32::MAX);
        assert!(v.magnitude().is_finite());
    }
}

//! Sensor-session core for a Movesense-based training tracker.
//!
//! Manages one BLE connection to a wearable motion sensor, speaks the
//! subscribe/unsubscribe command protocol over the Movesense command
//! characteristic, decodes binary IMU frames from the data characteristic,
//! and counts exercise repetitions in real time with a three-phase state
//! machine. The UI layer observes everything through the
//! [`SessionHub`](domain::hub::SessionHub) snapshot and drives the session
//! through [`SensorSession`](infrastructure::bluetooth::SensorSession).
//!
//! Typical wiring at the composition root:
//!
//! ```no_run
//! use movesense_trainer_rust::domain::hub::SessionHub;
//! use movesense_trainer_rust::infrastructure::bluetooth::radio::BtleRadio;
//! use movesense_trainer_rust::infrastructure::bluetooth::{SensorSession, SessionConfig};
//! use movesense_trainer_rust::infrastructure::permissions::AlwaysGranted;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let hub = SessionHub::new();
//! let (events_tx, events_rx) = mpsc::unbounded_channel();
//! let radio = Arc::new(BtleRadio::new(events_tx).await?);
//! let session = SensorSession::new(
//!     radio,
//!     Box::new(AlwaysGranted),
//!     Arc::clone(&hub),
//!     events_rx,
//!     SessionConfig::default(),
//! );
//! session.start_scan().await?;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod infrastructure;

pub use domain::exercises::{self, ExerciseConfig};
pub use domain::hub::{SessionHub, SessionSnapshot, Subscription};
pub use domain::models::{
    Axis, DeviceDescriptor, ImuSample, RepetitionPhase, RepetitionState, SessionError,
    SessionState, Vector3,
};
pub use domain::repetition::RepetitionEngine;
pub use infrastructure::bluetooth::{SensorSession, SessionConfig};

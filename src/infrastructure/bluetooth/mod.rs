//! Bluetooth Module
//!
//! Provides BLE communication with the Movesense motion sensor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     SensorSession                        │
//! │  (owns the lifecycle; public API for the caller)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ RadioEvent channel + Radio trait
//!         ┌─────────────┼─────────────┬─────────────┐
//!         │             │             │             │
//!         ▼             ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Commands │  │ Protocol │
//! │           │  │            │  │          │  │          │
//! │ - BLE     │  │ - GATT     │  │ - ordered│  │ - UUIDs  │
//! │  discovery│  │   access   │  │   writes │  │ - encode │
//! │           │  │ - notify   │  │ - settle │  │ - decode │
//! └───────────┘  └────────────┘  └──────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Movesense UUIDs, command encoding, frame decoding
//! - [`commands`] - Ordered, acknowledged command channel
//! - [`radio`] - Radio trait, event types, and the btleplug implementation
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - Peripheral link and GATT characteristic handling
//! - [`service`] - The sensor session coordinating all of it

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod radio;
pub mod scanner;
pub mod service;

// Re-export the session for convenience
pub use service::{SensorSession, SessionConfig};

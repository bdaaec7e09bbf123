//! Command channel: serialize a [`Command`] and write it to the command
//! characteristic.
//!
//! Every send is awaited to completion before the caller proceeds, so
//! consecutive commands reach the firmware strictly in order. A short
//! settling delay follows each write; the firmware drops commands that
//! arrive back-to-back.

use crate::domain::models::SessionError;
use crate::infrastructure::bluetooth::protocol::Command;
use crate::infrastructure::bluetooth::radio::Radio;
use std::time::Duration;
use tracing::debug;

pub struct CommandChannel<'a> {
    radio: &'a dyn Radio,
    settle: Duration,
}

impl<'a> CommandChannel<'a> {
    pub fn new(radio: &'a dyn Radio, settle: Duration) -> Self {
        Self { radio, settle }
    }

    /// Encode and write one command, acknowledged.
    pub async fn send(&self, command: &Command) -> Result<(), SessionError> {
        if !self.radio.is_connected().await {
            return Err(SessionError::NotConnected);
        }

        debug!(command = ?command, "sending command");
        self.radio
            .write_command(&command.encode())
            .await
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        tokio::time::sleep(self.settle).await;
        Ok(())
    }
}

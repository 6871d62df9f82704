//! Core types for the WSN light bridge
//!
//! This module defines the values that flow between the ingestion side and the
//! output side of the bridge, the crate error type, and the cooperative stop
//! flag shared by both loops.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Timestamp type used throughout the bridge
pub type Timestamp = DateTime<Utc>;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Start marker of a sensor frame on the wire
pub const FRAME_START: u8 = b'/';

/// End marker of a sensor frame on the wire
pub const FRAME_END: u8 = b'\\';

/// Separator between the address and value fields
pub const FIELD_SEPARATOR: u8 = b',';

/// One decoded reading from a sensor node
///
/// Built by the frame codec from a well-formed `/<address>,<value>\` run.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    /// Network address of the reporting sensor
    pub source_address: u16,
    /// Raw reading as sent by the sensor
    pub raw_value: i64,
    /// Payload text between the markers (useful for debugging)
    pub raw_text: String,
    /// When the end marker was seen
    pub received_at: Timestamp,
}

impl SensorFrame {
    /// Create a frame stamped with the current time
    pub fn new(source_address: u16, raw_value: i64) -> Self {
        Self {
            source_address,
            raw_value,
            raw_text: format!("{},{}", source_address, raw_value),
            received_at: Utc::now(),
        }
    }

    /// Render the frame in its wire format
    pub fn to_wire(&self) -> Vec<u8> {
        format!("/{},{}\\", self.source_address, self.raw_value).into_bytes()
    }
}

impl fmt::Display for SensorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor {} = {}", self.source_address, self.raw_value)
    }
}

/// Errors that can occur while running the bridge
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Command {command:?} not acknowledged (response: {response:?})")]
    CommandRejected { command: String, response: String },

    #[error("Modem did not enter command mode after {0} attempts")]
    EscapeFailed(u32),

    #[error("Modem initialization failed: {0}")]
    InitFailed(String),

    #[error("Transport lock poisoned")]
    LockPoisoned,

    #[error("Transport closed")]
    TransportClosed,

    #[error("Output sink error: {0}")]
    Sink(String),
}

/// Single-set, idempotent cooperative stop flag
///
/// Cloning shares the same flag. Both the ingestion loop and the pacing loop
/// check it once per outer iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a new, unset stop signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Calling this more than once has no further effect.
    pub fn request(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            log::debug!("Stop requested");
        }
    }

    /// Check whether a stop has been requested
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

//! Sensor frame codec
//!
//! Sensors report over the modem's transparent serial link as
//! `/<address>,<value>\`, both fields decimal ASCII. The link is lossy: bytes
//! are dropped, frames are cut short and a new frame can start before the
//! previous one ended. The codec is a byte-at-a-time push parser that
//! recovers from all of these without surfacing errors to the caller.

use crate::types::{SensorFrame, FIELD_SEPARATOR, FRAME_END, FRAME_START};
use chrono::Utc;

/// Longest payload accepted between the markers
///
/// A 16-bit address and a 64-bit value fit comfortably; anything longer means
/// the end marker was lost.
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Outcome of feeding one byte to the codec
#[derive(Debug, Clone, PartialEq)]
pub enum Scan {
    /// No complete frame yet
    Pending,
    /// A well-formed frame was closed by this byte
    Frame(SensorFrame),
    /// A start marker arrived inside a frame; the partial frame was dropped
    Conflict,
    /// The frame was closed but its payload was unusable
    Corrupted(String),
}

/// Counters kept by the codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub frames: u64,
    pub conflicts: u64,
    pub corrupted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    InFrame,
}

/// Push parser turning a byte stream into [`SensorFrame`]s
#[derive(Debug)]
pub struct FrameCodec {
    state: ScanState,
    payload: Vec<u8>,
    stats: CodecStats,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            payload: Vec::with_capacity(MAX_PAYLOAD_LEN),
            stats: CodecStats::default(),
        }
    }

    /// Feed one byte
    pub fn push(&mut self, byte: u8) -> Scan {
        match self.state {
            ScanState::Idle => {
                if byte == FRAME_START {
                    self.payload.clear();
                    self.state = ScanState::InFrame;
                }
                Scan::Pending
            }
            ScanState::InFrame => match byte {
                FRAME_START => {
                    log::warn!(
                        "Frame conflict, dropping partial frame {:?}",
                        String::from_utf8_lossy(&self.payload)
                    );
                    self.stats.conflicts += 1;
                    // The conflicting marker opens the next candidate frame
                    self.payload.clear();
                    Scan::Conflict
                }
                FRAME_END => {
                    self.state = ScanState::Idle;
                    let scan = match parse_payload(&self.payload) {
                        Ok(frame) => {
                            log::trace!("Frame received: {}", frame);
                            self.stats.frames += 1;
                            Scan::Frame(frame)
                        }
                        Err(reason) => {
                            log::warn!("Corrupted frame: {}", reason);
                            self.stats.corrupted += 1;
                            Scan::Corrupted(reason)
                        }
                    };
                    self.payload.clear();
                    scan
                }
                _ => {
                    if self.payload.len() >= MAX_PAYLOAD_LEN {
                        log::warn!("Frame payload exceeds {} bytes, dropping", MAX_PAYLOAD_LEN);
                        self.stats.corrupted += 1;
                        self.payload.clear();
                        self.state = ScanState::Idle;
                        return Scan::Corrupted("payload too long".to_string());
                    }
                    self.payload.push(byte);
                    Scan::Pending
                }
            },
        }
    }

    /// Feed a slice, returning every frame it completes
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<SensorFrame> {
        bytes
            .iter()
            .filter_map(|&b| match self.push(b) {
                Scan::Frame(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// True while between a start marker and an end marker
    pub fn in_frame(&self) -> bool {
        self.state == ScanState::InFrame
    }

    /// Drop any partial frame and return to idle
    pub fn reset(&mut self) {
        self.payload.clear();
        self.state = ScanState::Idle;
    }

    pub fn stats(&self) -> CodecStats {
        self.stats
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a payload into exactly an address and a value
fn parse_payload(payload: &[u8]) -> Result<SensorFrame, String> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| format!("payload is not ASCII: {:?}", payload))?;

    let fields: Vec<&str> = text.split(FIELD_SEPARATOR as char).collect();
    if fields.len() != 2 {
        return Err(format!("expected 2 fields, got {} in {:?}", fields.len(), text));
    }

    let source_address = fields[0]
        .parse::<u16>()
        .map_err(|e| format!("bad address {:?}: {}", fields[0], e))?;
    let raw_value = fields[1]
        .parse::<i64>()
        .map_err(|e| format!("bad value {:?}: {}", fields[1], e))?;

    Ok(SensorFrame {
        source_address,
        raw_value,
        raw_text: text.to_string(),
        received_at: Utc::now(),
    })
}

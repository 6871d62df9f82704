//! Sensor frame ingestion
//!
//! The ingestion thread owns a [`FrameReader`] and forwards decoded frames to
//! the output thread over a bounded queue. It never blocks on the queue: when
//! the output side falls behind, frames are dropped with a warning.

use crate::codec::FrameCodec;
use crate::transport::{SharedTransport, Transport};
use crate::types::{Result, SensorFrame, StopSignal};
use crossbeam_channel::{Sender, TrySendError};
use std::collections::VecDeque;

/// Capacity of the queue between ingestion and output
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// Bytes requested per transport read
const READ_CHUNK: usize = 64;

/// Pulls bytes from the shared transport and decodes them into frames
pub struct FrameReader {
    transport: SharedTransport,
    codec: FrameCodec,
    pending: VecDeque<SensorFrame>,
    buffer: [u8; READ_CHUNK],
}

impl FrameReader {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(),
            pending: VecDeque::new(),
            buffer: [0; READ_CHUNK],
        }
    }

    /// Next decoded frame, if one is available
    ///
    /// Frames left over from an earlier read are returned first. Otherwise
    /// exactly one transport read is made; `Ok(None)` means that read did not
    /// complete a frame.
    pub fn poll_frame(&mut self) -> Result<Option<SensorFrame>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let n = {
            let mut transport = self.transport.lock()?;
            transport.read(&mut self.buffer)?
        };
        if n > 0 {
            log::trace!("Read {} byte(s) from transport", n);
            let frames = self.codec.push_slice(&self.buffer[..n]);
            self.pending.extend(frames);
        }

        Ok(self.pending.pop_front())
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}

/// Counters gathered by the ingestion loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub queue_full: u64,
    pub conflicts: u64,
    pub corrupted: u64,
}

/// Forward frames to `sender` until `stop` is set
///
/// A transport error requests a stop (so the output side shuts down too) and
/// is returned.
pub fn run_ingestion(
    mut reader: FrameReader,
    sender: Sender<SensorFrame>,
    stop: StopSignal,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    log::info!("Ingestion started");

    while !stop.is_requested() {
        let frame = match reader.poll_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                log::error!("Transport read failed, stopping: {}", e);
                stop.request();
                return Err(e);
            }
        };

        match sender.try_send(frame) {
            Ok(()) => stats.frames += 1,
            Err(TrySendError::Full(frame)) => {
                log::warn!("Frame queue full, dropping {}", frame);
                stats.queue_full += 1;
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Frame queue closed, ending ingestion");
                break;
            }
        }
    }

    let codec = reader.codec().stats();
    stats.conflicts = codec.conflicts;
    stats.corrupted = codec.corrupted;
    log::info!(
        "Ingestion stopped: {} frame(s) forwarded, {} dropped",
        stats.frames,
        stats.queue_full
    );
    Ok(stats)
}

//! Lighting output sink
//!
//! The bridge hands every computed vector to an [`OutputSink`]: once at
//! startup (blackout), once per tick, and once at shutdown (blackout).

use crate::types::Result;
use std::sync::{Arc, Mutex, MutexGuard};

/// Destination for output vectors
pub trait OutputSink: Send {
    /// Transmit `data` to `universe`
    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        (**self).send(universe, data)
    }
}

/// Sink that records every vector it receives
///
/// Clones share the recording, so a test can keep one clone while the bridge
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<(u16, Vec<u8>)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(universe, data)` pair, in send order
    pub fn sent(&self) -> Vec<(u16, Vec<u8>)> {
        self.lock().clone()
    }

    /// Just the data of every send
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().iter().map(|(_, data)| data.clone()).collect()
    }

    pub fn last(&self) -> Option<Vec<u8>> {
        self.lock().last().map(|(_, data)| data.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u16, Vec<u8>)>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputSink for MemorySink {
    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        self.lock().push((universe, data.to_vec()));
        Ok(())
    }
}

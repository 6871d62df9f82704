//! Byte transport to the radio modem
//!
//! The core only depends on the [`Transport`] capability. Configuration
//! exchanges and sensor-frame reads share one [`SharedTransport`] so the two
//! never interleave on the wire.

use crate::types::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod mock;
mod serial;

pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Raw byte transport
pub trait Transport: Send {
    /// Read into `buffer`, returning the number of bytes read
    ///
    /// Returns `Ok(0)` when nothing arrived within the transport's timeout.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write all of `data`
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying device
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Mutex-guarded transport handle shared by configuration and ingestion
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl SharedTransport {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Take exclusive use of the wire
    pub fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Transport>>> {
        self.inner.lock().map_err(|_| Error::LockPoisoned)
    }
}

//! Mock transport for testing
//!
//! Clones share state, so a test can hand one clone to the bridge and keep
//! another to inject sensor bytes and inspect what was written.

use super::Transport;
use crate::types::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// In-memory transport with a scripted reply hook
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    read_delay: Duration,
    closed: bool,
}

impl MockTransport {
    /// Create a silent mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                writes: Vec::new(),
                responder: None,
                read_delay: Duration::ZERO,
                closed: false,
            })),
        }
    }

    /// Create a mock modem that acknowledges the escape sequence and every
    /// AT command with `OK\r`
    pub fn modem() -> Self {
        Self::new().with_responder(|written| {
            if written == b"+++" || written.starts_with(b"AT") {
                Some(b"OK\r".to_vec())
            } else {
                None
            }
        })
    }

    /// Queue the responder's reply (if any) after every write
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
        self
    }

    /// Simulate a blocking read timeout when no data is queued
    pub fn with_read_delay(self, delay: Duration) -> Self {
        self.lock().read_delay = delay;
        self
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
    }

    /// Every write call, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Every write call rendered as text
    pub fn written_text(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.lock().writes.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        // A test that panicked while holding the lock already failed
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let delay = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(Error::TransportClosed);
            }
            let available = inner.read_buffer.len().min(buffer.len());
            if available > 0 {
                for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
                    *slot = byte;
                }
                return Ok(available);
            }
            inner.read_delay
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(0)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::TransportClosed);
        }
        inner.writes.push(data.to_vec());
        let reply = inner.responder.as_mut().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            inner.read_buffer.extend(reply);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_feeds_read_buffer() {
        let mock = MockTransport::modem();
        let mut transport = mock.clone();

        transport.write_all(b"+++").unwrap();
        let mut buf = [0u8; 8];
        let n = transport.read(&mut buf).unwrap();

        assert_eq!(&buf[..n], b"OK\r");
        assert_eq!(mock.written_text(), vec!["+++".to_string()]);
    }

    #[test]
    fn test_empty_read_and_close() {
        let mut transport = MockTransport::new();
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);

        transport.close().unwrap();
        assert!(transport.is_closed());
        assert!(matches!(transport.read(&mut buf), Err(Error::TransportClosed)));
    }
}

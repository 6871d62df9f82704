//! WSN Light Core Library
//!
//! Turns readings from a wireless sensor network into a continuously updated
//! lighting output vector.
//!
//! # Architecture
//!
//! - A radio modem on a serial link delivers `/<address>,<value>\` frames
//! - Each configured sensor address drives one output slot through a rolling
//!   window with hold and smooth fall-off
//! - The output vector is recomputed and sent at a fixed frame rate
//!
//! The library does NOT:
//! - Talk to a particular lighting protocol (sinks are pluggable)
//! - Load configuration files
//! - Install signal handlers
//!
//! Those live in the application layer (wsn-light-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use wsn_light_core::{LightBridge, LightConfig, MemorySink, SerialTransport, SharedTransport};
//!
//! let config = LightConfig::new().with_addresses(vec![19, 20]);
//! let serial = SerialTransport::open(
//!     &config.link.port,
//!     config.link.baud_rate().unwrap(),
//!     config.link.read_timeout(),
//! )
//! .unwrap();
//!
//! let bridge = LightBridge::new(config, SharedTransport::new(serial), MemorySink::new());
//! let stop = bridge.stop_signal();
//! // Hand `stop` to a signal handler, then:
//! let report = bridge.run().unwrap();
//! println!("{} ticks", report.pacing.ticks);
//! ```

// Public modules
pub mod bridge;
pub mod channel;
pub mod codec;
pub mod config;
pub mod ingest;
pub mod link;
pub mod pacing;
pub mod registry;
pub mod sink;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use bridge::{BridgeReport, LightBridge};
pub use channel::SensorChannel;
pub use codec::{FrameCodec, Scan};
pub use config::{LightConfig, LinkConfig, OutputConfig, SensorConfig, BAUD_RATES};
pub use ingest::{FrameReader, IngestStats};
pub use link::{ConfiguratorState, LinkConfigurator};
pub use pacing::{pace, Clock, PaceDecision, PacingScheduler, PacingStats, SystemClock, TickSource};
pub use registry::{OutputVector, SensorRegistry};
pub use sink::{MemorySink, OutputSink};
pub use transport::{MockTransport, SerialTransport, SharedTransport, Transport};
pub use types::{Error, Result, SensorFrame, StopSignal, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_builds_registry() {
        let registry = SensorRegistry::new(&LightConfig::default()).unwrap();
        assert_eq!(registry.len(), 2);
    }
}

//! End-to-end bridge: modem in, lighting out
//!
//! [`LightBridge::run`] configures the modem, starts the ingestion thread and
//! runs the output loop on the calling thread until the stop signal is set.
//! Frames cross between the two threads over a bounded queue, so the
//! registry and its output vector have a single owner.

use crate::config::LightConfig;
use crate::ingest::{run_ingestion, FrameReader, IngestStats, FRAME_QUEUE_CAPACITY};
use crate::link::{ConfiguratorState, LinkConfigurator};
use crate::pacing::{PacingScheduler, PacingStats, TickSource};
use crate::registry::SensorRegistry;
use crate::sink::OutputSink;
use crate::transport::{SharedTransport, Transport};
use crate::types::{Error, Result, SensorFrame, StopSignal, Timestamp};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver};
use std::thread;

/// Summary of a bridge run
#[derive(Debug, Clone)]
pub struct BridgeReport {
    pub pacing: PacingStats,
    pub ingest: IngestStats,
    pub unknown_frames: u64,
    pub link_state: ConfiguratorState,
    /// Receive time of each sensor's latest frame, by address
    pub last_seen: Vec<(u16, Option<Timestamp>)>,
}

/// Drains queued frames into the registry before each compute step
struct RegistryFeed {
    registry: SensorRegistry,
    frames: Receiver<SensorFrame>,
}

impl TickSource for RegistryFeed {
    fn tick(&mut self) -> &[u8] {
        for frame in self.frames.try_iter() {
            let age = Utc::now() - frame.received_at;
            log::trace!(
                "Frame from {} queued for {} ms",
                frame.source_address,
                age.num_milliseconds()
            );
            self.registry.recv_frame(&frame);
        }
        self.registry.compute_all().as_slice()
    }

    fn width(&self) -> usize {
        self.registry.output().len()
    }
}

/// Wires the modem link, the sensor registry and an output sink together
pub struct LightBridge<S: OutputSink> {
    config: LightConfig,
    transport: SharedTransport,
    sink: S,
    stop: StopSignal,
}

impl<S: OutputSink> LightBridge<S> {
    pub fn new(config: LightConfig, transport: SharedTransport, sink: S) -> Self {
        Self {
            config,
            transport,
            sink,
            stop: StopSignal::new(),
        }
    }

    /// Use an externally owned stop signal (e.g. one set by a signal handler)
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that stops a running bridge
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &LightConfig {
        &self.config
    }

    /// Run until stopped
    ///
    /// Returns an error if the configuration is invalid, the modem cannot be
    /// configured, or the transport fails while reading. In the last case the
    /// output is still blacked out and the link released before returning.
    pub fn run(mut self) -> Result<BridgeReport> {
        self.config.validate()?;
        let registry = SensorRegistry::new(&self.config)?;
        let universe = self.config.output.universe;

        let mut link = LinkConfigurator::new(self.transport.clone(), self.config.link.clone());
        if self.config.link.configure {
            if let Err(e) = link.configure() {
                self.release_link(&mut link);
                return Err(e);
            }
        } else {
            log::info!("Modem configuration disabled, using current settings");
        }

        let blackout = vec![0u8; registry.output().len()];
        if let Err(e) = self.sink.send(universe, &blackout) {
            log::error!("Failed to send startup blackout: {}", e);
        }

        let (sender, frames) = bounded(FRAME_QUEUE_CAPACITY);
        let reader = FrameReader::new(self.transport.clone());
        let ingest_stop = self.stop.clone();
        let spawned = thread::Builder::new()
            .name("wsn-ingest".to_string())
            .spawn(move || run_ingestion(reader, sender, ingest_stop));
        let ingestion = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.release_link(&mut link);
                return Err(e.into());
            }
        };

        let mut feed = RegistryFeed { registry, frames };
        let mut scheduler =
            PacingScheduler::new(self.config.frame_period(), universe, self.stop.clone());
        let pacing = scheduler.run(&mut feed, &mut self.sink);

        self.stop.request();
        let ingest = match ingestion.join() {
            Ok(result) => result,
            Err(_) => Err(Error::InitFailed("ingestion thread panicked".to_string())),
        };
        self.release_link(&mut link);

        let ingest = ingest?;
        let report = BridgeReport {
            pacing,
            ingest,
            unknown_frames: feed.registry.unknown_frames(),
            link_state: link.state(),
            last_seen: feed.registry.last_seen(),
        };
        log::info!(
            "Bridge stopped: {} ticks, {} dropped, {} frames, {} unknown",
            report.pacing.ticks,
            report.pacing.dropped,
            report.ingest.frames,
            report.unknown_frames
        );
        Ok(report)
    }

    fn release_link(&self, link: &mut LinkConfigurator) {
        let result = if self.config.link.configure {
            link.close()
        } else {
            self.transport.lock().and_then(|mut transport| transport.close())
        };
        if let Err(e) = result {
            log::warn!("Failed to release modem link: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::sink::MemorySink;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn fast_link() -> LinkConfig {
        let mut link = LinkConfig::default()
            .with_timing(1, 20)
            .with_escape_retries(Some(2));
        link.read_timeout_ms = 5;
        link
    }

    fn test_config() -> LightConfig {
        LightConfig::new()
            .with_timing(1, 0.5)
            .with_frame_rate(50)
            .with_sensor_range(0, 100)
            .with_link(fast_link())
    }

    #[test]
    fn test_invalid_config_is_rejected_before_io() {
        let mock = MockTransport::modem();
        let bridge = LightBridge::new(
            test_config().with_frame_rate(0),
            SharedTransport::new(mock.clone()),
            MemorySink::new(),
        );

        assert!(matches!(bridge.run(), Err(Error::InvalidConfig(_))));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_silent_modem_fails_init() {
        let mock = MockTransport::new();
        let sink = MemorySink::new();
        let bridge = LightBridge::new(test_config(), SharedTransport::new(mock.clone()), sink.clone());

        assert!(matches!(bridge.run(), Err(Error::InitFailed(_))));
        assert!(sink.is_empty());
        assert!(mock.is_closed());
    }

    #[test]
    fn test_runs_until_stopped() {
        let mock = MockTransport::modem().with_read_delay(Duration::from_millis(2));
        let sink = MemorySink::new();
        let bridge = LightBridge::new(test_config(), SharedTransport::new(mock.clone()), sink.clone());
        let stop = bridge.stop_signal();

        let handle = thread::spawn(move || bridge.run());
        thread::sleep(Duration::from_millis(200));
        stop.request();
        let report = handle.join().unwrap().unwrap();

        assert!(report.pacing.ticks > 0);
        assert_eq!(report.link_state, ConfiguratorState::Configured);
        assert!(mock.is_closed());

        let frames = sink.frames();
        assert!(frames.first().unwrap().iter().all(|&v| v == 0));
        assert!(frames.last().unwrap().iter().all(|&v| v == 0));
        assert!(frames.iter().all(|f| f.len() == 255));
    }

    #[test]
    fn test_transport_failure_stops_cleanly() {
        let mock = MockTransport::modem().with_read_delay(Duration::from_millis(2));
        let sink = MemorySink::new();
        let bridge = LightBridge::new(test_config(), SharedTransport::new(mock.clone()), sink.clone());
        let stop = bridge.stop_signal();

        let handle = thread::spawn(move || bridge.run());
        let mut waited = 0;
        while !mock.written_text().iter().any(|w| w == "ATCN\r") && waited < 200 {
            thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        mock.inject_read(b"/19,100\\");
        thread::sleep(Duration::from_millis(100));

        // Pull the port out from under the running bridge
        mock.clone().close().unwrap();
        let result = handle.join().unwrap();

        assert!(matches!(result, Err(Error::TransportClosed)));
        assert!(stop.is_requested());
        assert!(mock.is_closed());

        let frames = sink.frames();
        assert!(frames.iter().any(|f| f[0] > 0), "address 19 never lit up");
        assert!(frames.last().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_report_carries_last_seen() {
        let mock = MockTransport::modem().with_read_delay(Duration::from_millis(2));
        let mut config = test_config();
        config.link.configure = false;
        let bridge = LightBridge::new(config, SharedTransport::new(mock.clone()), MemorySink::new());
        let stop = bridge.stop_signal();

        let before = Utc::now();
        mock.inject_read(b"/20,40\\");
        let handle = thread::spawn(move || bridge.run());
        thread::sleep(Duration::from_millis(150));
        stop.request();
        let report = handle.join().unwrap().unwrap();

        assert_eq!(report.ingest.frames, 1);
        assert_eq!(report.last_seen.len(), 2);
        assert_eq!(report.last_seen[0], (19, None));
        let (address, seen) = report.last_seen[1];
        assert_eq!(address, 20);
        assert!(seen.unwrap() >= before);
        assert!(mock.is_closed());
    }
}

//! Per-sensor signal conditioning
//!
//! Sensors report in bursts and go quiet for long stretches. Each channel
//! keeps a rolling window of the last `depth_seconds × frame_rate` readings and
//! turns its sum into an intensity. When readings stop, the last intensity is
//! held for `auto_fall_seconds` and then falls smoothly towards zero by
//! feeding the window a shrinking synthetic sample every tick.

use crate::config::LightConfig;
use crate::types::{SensorFrame, Timestamp};

/// Fixed-size ring of samples with a running sum
#[derive(Debug, Clone)]
pub struct RingWindow {
    samples: Vec<i64>,
    head: usize,
    sum: i64,
}

impl RingWindow {
    /// Create a zero-filled window of `len` samples
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0; len.max(1)],
            head: 0,
            sum: 0,
        }
    }

    /// Push a sample, displacing the oldest one
    pub fn push(&mut self, sample: i64) {
        let oldest = std::mem::replace(&mut self.samples[self.head], sample);
        self.sum += sample - oldest;
        self.head = (self.head + 1) % self.samples.len();
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0);
        self.head = 0;
        self.sum = 0;
    }
}

/// Conditioning state of one sensor
#[derive(Debug, Clone)]
pub struct SensorChannel {
    address: u16,
    output_index: usize,
    window: RingWindow,
    /// Last computed intensity, always within `[0, max_output]`
    cache: u8,
    /// Ticks since the last reading; 0 means a reading arrived this tick
    since_update: u32,
    scale_factor: f64,
    sensor_min: i64,
    max_output: u8,
    auto_fall_ticks: u32,
    last_seen: Option<Timestamp>,
}

impl SensorChannel {
    /// Create the channel for `address`, writing to `output_index`
    pub fn new(address: u16, output_index: usize, config: &LightConfig) -> Self {
        Self {
            address,
            output_index,
            window: RingWindow::new(config.window_len()),
            cache: 0,
            // Nothing received yet: behave as if the fall-off already finished
            since_update: u32::MAX,
            scale_factor: config.scale_factor(),
            sensor_min: config.sensors.min_value,
            max_output: config.output.max_value,
            auto_fall_ticks: config.auto_fall_ticks(),
            last_seen: None,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    pub fn since_update(&self) -> u32 {
        self.since_update
    }

    /// Last value returned by [`compute`](Self::compute)
    pub fn cached(&self) -> u8 {
        self.cache
    }

    pub fn window(&self) -> &RingWindow {
        &self.window
    }

    /// Receive time of the last frame given to [`put_frame`](Self::put_frame)
    pub fn last_seen(&self) -> Option<Timestamp> {
        self.last_seen
    }

    /// Record a decoded frame's reading and its receive time
    pub fn put_frame(&mut self, frame: &SensorFrame) {
        self.put_data(frame.raw_value);
        self.last_seen = Some(frame.received_at);
    }

    /// Record one raw reading
    pub fn put_data(&mut self, raw: i64) {
        let mut delta = raw.saturating_sub(self.sensor_min);
        if delta < 0 {
            log::trace!(
                "Sensor {}: reading {} below minimum {}, saturating",
                self.address,
                raw,
                self.sensor_min
            );
            delta = 0;
        }
        // Keep the window sum from overflowing on absurd readings
        let ceiling = i64::MAX / self.window.len() as i64;
        self.window.push(delta.min(ceiling));
        self.since_update = 0;
    }

    /// Current intensity; advances the decay clock by one tick
    pub fn compute(&mut self) -> u8 {
        if self.since_update == 0 {
            self.cache = self.level();
            self.since_update = 1;
            return self.cache;
        }

        if self.since_update <= self.auto_fall_ticks {
            self.since_update = self.since_update.saturating_add(1);
            return self.cache;
        }

        if self.cache > 0 || self.window.sum() > 0 {
            let injected = (self.cache as f64 / self.since_update as f64).round() as i64;
            self.window.push(injected);
            // The fall-off never climbs back up
            self.cache = self.cache.min(self.level());
        }
        self.since_update = self.since_update.saturating_add(1);
        self.cache
    }

    /// Intensity of the current window, clamped to `[0, max_output]`
    pub fn level(&self) -> u8 {
        let scaled = (self.window.sum() as f64 * self.scale_factor).round();
        scaled.clamp(0.0, self.max_output as f64) as u8
    }

    /// Forget all readings
    pub fn reset(&mut self) {
        self.window.clear();
        self.cache = 0;
        self.since_update = u32::MAX;
        self.last_seen = None;
    }
}

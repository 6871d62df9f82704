//! Bridge configuration types
//!
//! This module defines the static configuration record the bridge is built
//! from. It is constructed once at startup (from a file or from defaults) and
//! passed into each component; nothing in the core mutates it.
//!
//! Defaults match a stock deployment: an XBee on `/dev/ttyAMA0`, two sensors
//! at addresses 19 and 20 and a 30 FPS DMX output.

use crate::types::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Modem baud rates indexed by the `BD` parameter
pub const BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Slots in one lighting universe
pub const MAX_UNIVERSE_CHANNELS: usize = 512;

/// Complete bridge configuration
///
/// Field aliases also accept the JSON layout of legacy `~/.wsnlight.conf`
/// files (`xbee`, `sensor`, `dmx` sections with `ATxx`, `addr`, `fps` keys).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    #[serde(default, alias = "xbee")]
    pub link: LinkConfig,
    #[serde(default, alias = "sensor")]
    pub sensors: SensorConfig,
    #[serde(default, alias = "dmx")]
    pub output: OutputConfig,
}

/// Radio modem link parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path
    #[serde(default = "default_port", alias = "serial")]
    pub port: String,

    /// Index into [`BAUD_RATES`] (the modem's `BD` value)
    #[serde(
        default = "default_baud_index",
        alias = "ATBD",
        deserialize_with = "de_baud_index"
    )]
    pub baud_index: u8,

    /// PAN identifier, hex (the modem's `ID` value)
    #[serde(default = "default_network_id", alias = "ATID")]
    pub network_id: String,

    /// Radio channel, hex (the modem's `CH` value)
    #[serde(default = "default_channel_id", alias = "ATCH")]
    pub channel_id: String,

    /// Our 16-bit source address, hex (the modem's `MY` value)
    #[serde(default = "default_local_address", alias = "ATMY")]
    pub local_address: String,

    /// Apply the parameters above at startup (false for pre-configured modems)
    #[serde(default = "default_true")]
    pub configure: bool,

    /// Silence required before and after the escape sequence
    #[serde(default = "default_guard_time_ms")]
    pub guard_time_ms: u64,

    /// How long to wait for a command response
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Idle time after which the modem leaves command mode on its own
    #[serde(default = "default_command_mode_timeout_ms")]
    pub command_mode_timeout_ms: u64,

    /// Maximum escape attempts; `None` retries forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape_retries: Option<u32>,

    /// Extra attempts for a rejected command issued with retry enabled
    #[serde(default = "default_command_retries")]
    pub command_retries: u32,

    /// Serial read timeout; bounds how long ingestion takes to notice a stop
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Sensor signal-conditioning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor network addresses, in output channel order
    #[serde(default = "default_addresses", alias = "addr")]
    pub addresses: Vec<u16>,

    /// Length of the rolling window in seconds
    #[serde(default = "default_depth_seconds", alias = "depth")]
    pub depth_seconds: u32,

    /// Silence after which a channel starts falling towards zero
    #[serde(default = "default_auto_fall_seconds", alias = "auto_fall")]
    pub auto_fall_seconds: f64,

    /// Raw reading that maps to zero intensity
    #[serde(default)]
    pub min_value: i64,

    /// Raw reading that maps to full intensity
    #[serde(default = "default_sensor_max")]
    pub max_value: i64,
}

/// Lighting output parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Maximum channel intensity
    #[serde(default = "default_output_max")]
    pub max_value: u8,

    /// Output frames per second
    #[serde(default = "default_frame_rate", alias = "fps")]
    pub frame_rate: u32,

    /// Lighting universe the vector is sent to
    #[serde(default)]
    pub universe: u16,

    /// Length of the output vector
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Output slot of the first sensor address
    #[serde(default)]
    pub start_channel: usize,
}

/// Baud index as a number, or as the hex string the modem's `BD` takes
fn de_baud_index<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BaudIndex {
        Number(u8),
        Hex(String),
    }

    match BaudIndex::deserialize(deserializer)? {
        BaudIndex::Number(index) => Ok(index),
        BaudIndex::Hex(text) => u8::from_str_radix(text.trim(), 16).map_err(|_| {
            serde::de::Error::custom(format!("invalid baud index {:?}", text))
        }),
    }
}

fn default_port() -> String {
    "/dev/ttyAMA0".to_string()
}

fn default_baud_index() -> u8 {
    3
}

fn default_network_id() -> String {
    "1111".to_string()
}

fn default_channel_id() -> String {
    "0C".to_string()
}

fn default_local_address() -> String {
    "3210".to_string()
}

fn default_true() -> bool {
    true
}

fn default_guard_time_ms() -> u64 {
    1100
}

fn default_response_timeout_ms() -> u64 {
    1000
}

fn default_command_mode_timeout_ms() -> u64 {
    10_000
}

fn default_command_retries() -> u32 {
    3
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_addresses() -> Vec<u16> {
    vec![19, 20]
}

fn default_depth_seconds() -> u32 {
    3
}

fn default_auto_fall_seconds() -> f64 {
    0.5
}

fn default_sensor_max() -> i64 {
    1024
}

fn default_output_max() -> u8 {
    255
}

fn default_frame_rate() -> u32 {
    30
}

fn default_channels() -> usize {
    255
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_index: default_baud_index(),
            network_id: default_network_id(),
            channel_id: default_channel_id(),
            local_address: default_local_address(),
            configure: true,
            guard_time_ms: default_guard_time_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            command_mode_timeout_ms: default_command_mode_timeout_ms(),
            escape_retries: None,
            command_retries: default_command_retries(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            addresses: default_addresses(),
            depth_seconds: default_depth_seconds(),
            auto_fall_seconds: default_auto_fall_seconds(),
            min_value: 0,
            max_value: default_sensor_max(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_value: default_output_max(),
            frame_rate: default_frame_rate(),
            universe: 0,
            channels: default_channels(),
            start_channel: 0,
        }
    }
}

impl LinkConfig {
    /// Serial baud rate selected by `baud_index`
    pub fn baud_rate(&self) -> Result<u32> {
        BAUD_RATES
            .get(self.baud_index as usize)
            .copied()
            .ok_or_else(|| {
                Error::InvalidConfig(format!("baud index {} out of range", self.baud_index))
            })
    }

    pub fn guard_time(&self) -> Duration {
        Duration::from_millis(self.guard_time_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn command_mode_timeout(&self) -> Duration {
        Duration::from_millis(self.command_mode_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Modem parameters in the order they are applied
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ID", self.network_id.clone()),
            ("CH", self.channel_id.clone()),
            ("MY", self.local_address.clone()),
            ("BD", format!("{:X}", self.baud_index)),
        ]
    }

    /// Builder method: set the serial device path
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    /// Builder method: set the escape/response timing
    pub fn with_timing(mut self, guard_time_ms: u64, response_timeout_ms: u64) -> Self {
        self.guard_time_ms = guard_time_ms;
        self.response_timeout_ms = response_timeout_ms;
        self
    }

    /// Builder method: bound the escape sequence retries
    pub fn with_escape_retries(mut self, retries: Option<u32>) -> Self {
        self.escape_retries = retries;
        self
    }

    fn validate(&self) -> Result<()> {
        self.baud_rate()?;
        for (name, value) in [
            ("network_id", &self.network_id),
            ("channel_id", &self.channel_id),
            ("local_address", &self.local_address),
        ] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be a hex value, got {:?}",
                    name, value
                )));
            }
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl LightConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the sensor addresses
    pub fn with_addresses(mut self, addresses: Vec<u16>) -> Self {
        self.sensors.addresses = addresses;
        self
    }

    /// Builder method: set the raw sensor range
    pub fn with_sensor_range(mut self, min_value: i64, max_value: i64) -> Self {
        self.sensors.min_value = min_value;
        self.sensors.max_value = max_value;
        self
    }

    /// Builder method: set the window depth and auto-fall delay
    pub fn with_timing(mut self, depth_seconds: u32, auto_fall_seconds: f64) -> Self {
        self.sensors.depth_seconds = depth_seconds;
        self.sensors.auto_fall_seconds = auto_fall_seconds;
        self
    }

    /// Builder method: set the output frame rate
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.output.frame_rate = frame_rate;
        self
    }

    /// Builder method: set the maximum output intensity
    pub fn with_max_output(mut self, max_value: u8) -> Self {
        self.output.max_value = max_value;
        self
    }

    /// Builder method: replace the link parameters
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Number of samples in each sensor window
    pub fn window_len(&self) -> usize {
        self.sensors.depth_seconds as usize * self.output.frame_rate as usize
    }

    /// Number of silent ticks before a channel starts falling
    pub fn auto_fall_ticks(&self) -> u32 {
        self.auto_fall_ticks_exact().round() as u32
    }

    fn auto_fall_ticks_exact(&self) -> f64 {
        self.output.frame_rate as f64 * self.sensors.auto_fall_seconds
    }

    /// Output tick period
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.output.frame_rate.max(1) as u64)
    }

    /// Factor mapping a window sum to an output intensity
    pub fn scale_factor(&self) -> f64 {
        let span = self.sensors.max_value as f64 - self.sensors.min_value as f64;
        self.output.max_value as f64 / (self.window_len() as f64 * span)
    }

    /// Check that the configuration can drive a bridge
    pub fn validate(&self) -> Result<()> {
        if self.output.frame_rate == 0 {
            return Err(Error::InvalidConfig("frame_rate must be greater than zero".to_string()));
        }
        if self.window_len() == 0 {
            return Err(Error::InvalidConfig("depth_seconds must be greater than zero".to_string()));
        }
        if self.sensors.max_value <= self.sensors.min_value {
            return Err(Error::InvalidConfig(format!(
                "sensor max_value ({}) must exceed min_value ({})",
                self.sensors.max_value, self.sensors.min_value
            )));
        }
        if !self.sensors.auto_fall_seconds.is_finite() || self.sensors.auto_fall_seconds < 0.0 {
            return Err(Error::InvalidConfig(
                "auto_fall_seconds must be a non-negative number".to_string(),
            ));
        }
        // u32::MAX marks a channel that has never reported
        if self.auto_fall_ticks_exact().round() >= u32::MAX as f64 {
            return Err(Error::InvalidConfig(format!(
                "auto_fall_seconds {} is too long at {} fps",
                self.sensors.auto_fall_seconds, self.output.frame_rate
            )));
        }
        if self.output.channels > MAX_UNIVERSE_CHANNELS {
            return Err(Error::InvalidConfig(format!(
                "{} output channels exceed the {} channel universe",
                self.output.channels, MAX_UNIVERSE_CHANNELS
            )));
        }

        let mut seen = HashSet::new();
        for address in &self.sensors.addresses {
            if !seen.insert(*address) {
                return Err(Error::InvalidConfig(format!("duplicate sensor address {}", address)));
            }
        }

        let last_slot = self.output.start_channel + self.sensors.addresses.len();
        if last_slot > self.output.channels {
            return Err(Error::InvalidConfig(format!(
                "{} sensors starting at channel {} do not fit in {} output channels",
                self.sensors.addresses.len(),
                self.output.start_channel,
                self.output.channels
            )));
        }

        self.link.validate()
    }
}

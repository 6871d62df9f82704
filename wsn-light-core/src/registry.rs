//! Sensor registry and output vector
//!
//! The registry maps sensor addresses to their conditioning channels and owns
//! the lighting [`OutputVector`]. It is the only writer of that vector.

use crate::channel::SensorChannel;
use crate::config::LightConfig;
use crate::types::{Error, Result, SensorFrame, Timestamp};
use std::collections::BTreeMap;

/// Intensities sent to the lighting universe, one byte per slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputVector {
    slots: Vec<u8>,
}

impl OutputVector {
    /// Create an all-zero vector of `len` slots
    pub fn new(len: usize) -> Self {
        Self { slots: vec![0; len] }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.slots.get(index).copied()
    }

    /// Set every slot to zero
    pub fn blackout(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = 0);
    }

    /// True when every slot is zero
    pub fn is_dark(&self) -> bool {
        self.slots.iter().all(|&s| s == 0)
    }

    fn set(&mut self, index: usize, value: u8) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = value;
        }
    }
}

/// Routes frames to channels and assembles the output vector
#[derive(Debug)]
pub struct SensorRegistry {
    channels: BTreeMap<u16, SensorChannel>,
    output: OutputVector,
    unknown_frames: u64,
}

impl SensorRegistry {
    /// Build one channel per configured address
    ///
    /// The n-th address drives output slot `start_channel + n`.
    pub fn new(config: &LightConfig) -> Result<Self> {
        config.validate()?;

        let mut channels = BTreeMap::new();
        for (position, &address) in config.sensors.addresses.iter().enumerate() {
            let index = config.output.start_channel + position;
            let channel = SensorChannel::new(address, index, config);
            if channels.insert(address, channel).is_some() {
                return Err(Error::InvalidConfig(format!("duplicate sensor address {}", address)));
            }
        }

        log::info!(
            "Sensor registry: {} channel(s) over {} output slots",
            channels.len(),
            config.output.channels
        );

        Ok(Self {
            channels,
            output: OutputVector::new(config.output.channels),
            unknown_frames: 0,
        })
    }

    /// Route a frame to its channel
    ///
    /// Returns false (and leaves all state untouched) for unknown addresses.
    pub fn recv_frame(&mut self, frame: &SensorFrame) -> bool {
        match self.channels.get_mut(&frame.source_address) {
            Some(channel) => {
                log::debug!("Routing {}", frame);
                channel.put_frame(frame);
                true
            }
            None => {
                log::debug!("Ignoring frame from unknown sensor {}", frame.source_address);
                self.unknown_frames += 1;
                false
            }
        }
    }

    /// Advance every channel by one tick and write its intensity
    pub fn compute_all(&mut self) -> &OutputVector {
        for channel in self.channels.values_mut() {
            let value = channel.compute();
            self.output.set(channel.output_index(), value);
        }
        &self.output
    }

    /// The vector produced by the last [`compute_all`](Self::compute_all)
    pub fn output(&self) -> &OutputVector {
        &self.output
    }

    pub fn channel(&self, address: u16) -> Option<&SensorChannel> {
        self.channels.get(&address)
    }

    /// Configured addresses in ascending order
    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.channels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Receive time of each channel's latest frame, by address
    pub fn last_seen(&self) -> Vec<(u16, Option<Timestamp>)> {
        self.channels
            .iter()
            .map(|(&address, channel)| (address, channel.last_seen()))
            .collect()
    }

    /// Frames dropped because their address is not configured
    pub fn unknown_frames(&self) -> u64 {
        self.unknown_frames
    }

    /// Reset every channel and black out the output
    pub fn reset(&mut self) {
        self.channels.values_mut().for_each(SensorChannel::reset);
        self.output.blackout();
    }
}

//! Radio modem configuration
//!
//! The modem boots in transparent mode: everything written is radioed out and
//! everything received is passed through. Parameters are changed in command
//! mode, entered with the `+++` escape sequence surrounded by a guard time of
//! silence, and left with `ATCN`. Each command is acknowledged with `OK`
//! terminated by a carriage return.
//!
//! # Liveness
//!
//! With `escape_retries = None` an unresponsive modem stalls [`LinkConfigurator::configure`]
//! forever, retrying the escape with fresh guard waits. Each failed attempt
//! is logged at warn level. Teardown never retries.

use crate::config::LinkConfig;
use crate::transport::{SharedTransport, Transport};
use crate::types::{Error, Result};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// Escape sequence switching the modem into command mode
pub const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Leave command mode, applying changed parameters
pub const CMD_EXIT: &str = "CN";

/// Restore factory parameters
pub const CMD_RESTORE_DEFAULTS: &str = "RE";

/// Longest response line we are willing to buffer
const MAX_RESPONSE_LEN: usize = 64;

/// Lifecycle of the modem configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfiguratorState {
    Unconfigured,
    EnteringConfigMode,
    InConfigMode,
    Configured,
    Failed,
}

impl fmt::Display for ConfiguratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfiguratorState::Unconfigured => write!(f, "Unconfigured"),
            ConfiguratorState::EnteringConfigMode => write!(f, "EnteringConfigMode"),
            ConfiguratorState::InConfigMode => write!(f, "InConfigMode"),
            ConfiguratorState::Configured => write!(f, "Configured"),
            ConfiguratorState::Failed => write!(f, "Failed"),
        }
    }
}

/// Drives the modem from power-on to an operational state
pub struct LinkConfigurator {
    transport: SharedTransport,
    config: LinkConfig,
    state: ConfiguratorState,
    /// Set while the modem is (believed to be) in command mode
    in_config_mode: bool,
    last_exchange: Option<Instant>,
    command_mode_entries: u32,
}

impl LinkConfigurator {
    pub fn new(transport: SharedTransport, config: LinkConfig) -> Self {
        Self {
            transport,
            config,
            state: ConfiguratorState::Unconfigured,
            in_config_mode: false,
            last_exchange: None,
            command_mode_entries: 0,
        }
    }

    pub fn state(&self) -> ConfiguratorState {
        self.state
    }

    pub fn in_config_mode(&self) -> bool {
        self.in_config_mode
    }

    /// How many times the escape sequence succeeded
    pub fn command_mode_entries(&self) -> u32 {
        self.command_mode_entries
    }

    /// Apply the link parameters and commit them
    ///
    /// Any failure leaves the configurator in [`ConfiguratorState::Failed`]
    /// and is reported as [`Error::InitFailed`].
    pub fn configure(&mut self) -> Result<()> {
        log::info!(
            "Configuring modem: ID={} CH={} MY={} BD={}",
            self.config.network_id,
            self.config.channel_id,
            self.config.local_address,
            self.config.baud_index
        );

        match self.apply_parameters() {
            Ok(()) => {
                self.state = ConfiguratorState::Configured;
                log::info!("Modem configured");
                Ok(())
            }
            Err(e) => {
                self.state = ConfiguratorState::Failed;
                log::error!("Modem configuration failed: {}", e);
                Err(Error::InitFailed(e.to_string()))
            }
        }
    }

    fn apply_parameters(&mut self) -> Result<()> {
        self.state = ConfiguratorState::EnteringConfigMode;
        self.enter_config_mode(self.config.escape_retries)?;
        self.state = ConfiguratorState::InConfigMode;

        for (name, value) in self.config.parameters() {
            self.command(&format!("{}{}", name, value), true)?;
        }

        self.command(CMD_EXIT, false)?;
        self.in_config_mode = false;
        Ok(())
    }

    /// Send `AT<command>\r` and wait for `OK`
    ///
    /// Re-enters command mode first if the modem is not (or no longer) in it.
    /// With `retry`, a rejected command re-enters command mode and is resent
    /// up to `command_retries` more times.
    pub fn command(&mut self, command: &str, retry: bool) -> Result<()> {
        let attempts = if retry { self.config.command_retries + 1 } else { 1 };
        let mut last_error = None;

        for attempt in 1..=attempts {
            if !self.command_mode_active() {
                log::debug!("Not in command mode, re-entering before AT{}", command);
                self.enter_config_mode(self.config.escape_retries)?;
            }

            match self.exchange(command) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("AT{} attempt {}/{} failed: {}", command, attempt, attempts, e);
                    // The modem may have silently dropped out of command mode
                    self.in_config_mode = false;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::CommandRejected {
            command: format!("AT{}", command),
            response: String::new(),
        }))
    }

    /// Restore factory parameters and release the transport
    ///
    /// Best-effort: an unresponsive modem only produces warnings.
    pub fn close(&mut self) -> Result<()> {
        if !self.command_mode_active() {
            if let Err(e) = self.enter_config_mode(Some(1)) {
                log::warn!("Could not enter command mode for teardown: {}", e);
            }
        }

        if self.in_config_mode {
            if let Err(e) = self.exchange(CMD_RESTORE_DEFAULTS) {
                log::warn!("Modem did not acknowledge restore defaults: {}", e);
            }
            if let Err(e) = self.exchange(CMD_EXIT) {
                log::warn!("Modem did not acknowledge command mode exit: {}", e);
            }
            self.in_config_mode = false;
        }

        self.transport.lock()?.close()
    }

    fn command_mode_active(&self) -> bool {
        self.in_config_mode
            && self
                .last_exchange
                .map(|at| at.elapsed() < self.config.command_mode_timeout())
                .unwrap_or(false)
    }

    /// Send the escape sequence until it is acknowledged
    fn enter_config_mode(&mut self, max_attempts: Option<u32>) -> Result<()> {
        let guard = self.config.guard_time();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = {
                let mut transport = self.transport.lock()?;
                thread::sleep(guard);
                transport.write_all(ESCAPE_SEQUENCE)?;
                transport.flush()?;
                thread::sleep(guard);
                read_response(&mut **transport, self.config.response_timeout())
            };

            match result {
                Ok(response) if is_ok(&response) => {
                    self.in_config_mode = true;
                    self.last_exchange = Some(Instant::now());
                    self.command_mode_entries += 1;
                    log::debug!("Entered command mode after {} attempt(s)", attempt);
                    return Ok(());
                }
                Ok(response) => {
                    log::warn!("Escape attempt {} not acknowledged: {:?}", attempt, response);
                }
                Err(e) => return Err(e),
            }

            if let Some(max) = max_attempts {
                if attempt >= max {
                    return Err(Error::EscapeFailed(attempt));
                }
            }
        }
    }

    /// One command/response exchange under the transport lock
    fn exchange(&mut self, command: &str) -> Result<()> {
        let line = format!("AT{}\r", command);
        let response = {
            let mut transport = self.transport.lock()?;
            transport.write_all(line.as_bytes())?;
            transport.flush()?;
            read_response(&mut **transport, self.config.response_timeout())?
        };

        if is_ok(&response) {
            self.last_exchange = Some(Instant::now());
            log::trace!("AT{} -> {}", command, response);
            Ok(())
        } else {
            Err(Error::CommandRejected {
                command: format!("AT{}", command),
                response,
            })
        }
    }
}

fn is_ok(response: &str) -> bool {
    response.starts_with("OK")
}

/// Read one CR/LF-terminated line, or whatever arrived before the timeout
fn read_response(transport: &mut dyn Transport, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while Instant::now() < deadline && line.len() < MAX_RESPONSE_LEN {
        if transport.read(&mut byte)? == 0 {
            continue;
        }
        match byte[0] {
            b'\r' | b'\n' if line.is_empty() => continue,
            b'\r' | b'\n' => break,
            b => line.push(b),
        }
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

// Bridge Session - Reading source built from the driver, clock sync and decoder
//
// Owns everything that talks to the bridge. Upper layers see only commands
// and fully stamped readings.

use crate::clock::{ClockSync, WallClock};
use crate::config::ConfigError;
use crate::event::{decode, Event, Reading};
use crate::link::Link;
use crate::protocol::{Command, Driver, ProtocolError, TimeSample};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, info};

// ============================================================================
// BRIDGE CONFIG
// ============================================================================

/// Session settings sent to the bridge on every (re)initialisation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Firmware log verbosity; 4 silences debug output
    pub verbosity: u8,
    /// Only report transmitters the bridge has been told about
    pub known_only: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            verbosity: 4,
            known_only: true,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_known_only(mut self, known_only: bool) -> Self {
        self.known_only = known_only;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verbosity > 9 {
            return Err(ConfigError::Invalid("verbosity must be a single digit".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// BRIDGE
// ============================================================================

/// A live session with the bridge
pub struct Bridge<L: Link> {
    driver: Driver<L>,
    clock: ClockSync,
    config: BridgeConfig,
}

impl<L: Link> Bridge<L> {
    /// Wrap a driver without talking to the bridge
    pub fn new(driver: Driver<L>, clock: ClockSync, config: BridgeConfig) -> Self {
        Self {
            driver,
            clock,
            config,
        }
    }

    /// Wrap a driver and initialise the bridge.
    ///
    /// A restart reported during initialisation means the bridge was still
    /// booting; initialisation is repeated once.
    pub fn connect(driver: Driver<L>, clock: ClockSync, config: BridgeConfig) -> Result<Self, ProtocolError> {
        let mut bridge = Self::new(driver, clock, config);
        match bridge.init() {
            Err(ProtocolError::Restarted) => bridge.init()?,
            other => other?,
        }
        Ok(bridge)
    }

    pub fn driver(&self) -> &Driver<L> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut Driver<L> {
        &mut self.driver
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        self.driver.link()
    }

    pub fn link_mut(&mut self) -> &mut L {
        self.driver.link_mut()
    }

    /// Current wall-clock time
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Put the bridge into our session state and synchronise clocks.
    ///
    /// Resets whatever the firmware defaults to after a reboot; the caller is
    /// responsible for re-registering transmitters.
    pub fn init(&mut self) -> Result<(), ProtocolError> {
        debug!("Sending init commands to bridge");
        self.driver.flush_input()?;
        self.driver.write_raw(b"\r")?;

        // Firmware built without logging NAKs this
        match self.driver.send_with(Command::SetVerbosity, self.config.verbosity) {
            Ok(()) => {}
            Err(e @ (ProtocolError::Restarted | ProtocolError::Cancelled | ProtocolError::Link(_))) => {
                return Err(e)
            }
            Err(e) => debug!(error = %e, "Bridge did not accept verbosity setting"),
        }

        self.driver.send(Command::ManualPairing)?;
        self.set_receive_mode(self.config.known_only)?;

        self.clock.prime(&mut self.driver)?;
        self.clock.resync(&mut self.driver)?;
        info!("Bridge initialised");
        Ok(())
    }

    /// Choose between known-only and promiscuous reception
    pub fn set_receive_mode(&mut self, known_only: bool) -> Result<(), ProtocolError> {
        let command = if known_only {
            Command::KnownOnly
        } else {
            Command::Promiscuous
        };
        self.driver.send(command)?;
        self.config.known_only = known_only;
        Ok(())
    }

    /// Send a command without parameter
    pub fn send(&mut self, command: Command) -> Result<(), ProtocolError> {
        self.driver.send(command)
    }

    /// Send a command with a parameter
    pub fn send_with<P: Display>(&mut self, command: Command, param: P) -> Result<(), ProtocolError> {
        self.driver.send_with(command, param)
    }

    /// Read and decode the next event.
    ///
    /// `Ok(None)` means a line arrived but was not a usable event, or the
    /// cancel token was raised. Samples are stamped with wall-clock time,
    /// resyncing first when needed.
    pub fn read_event(&mut self, retries: u32) -> Result<Option<Reading>, ProtocolError> {
        match self.driver.read_event_line(retries)? {
            Some(line) => self.process_line(&line),
            None => Ok(None),
        }
    }

    /// Decode and stamp a line obtained elsewhere (e.g. a `DataWaiting` payload)
    pub fn process_line(&mut self, line: &str) -> Result<Option<Reading>, ProtocolError> {
        debug!(line = %line, "LINE");
        let Some(event) = decode(line) else {
            return Ok(None);
        };

        let timecode = match &event {
            Event::Sample { counter, .. } => self.clock.stamp(&mut self.driver, *counter)?,
            _ => self.clock.now().round() as i64,
        };
        Ok(Some(event.into_reading(timecode)))
    }

    /// Ask for the counter once; used as a liveness probe
    pub fn probe_time(&mut self) -> Result<TimeSample, ProtocolError> {
        let clock: &dyn WallClock = self.clock.clock();
        let config = self.clock.config();
        self.driver
            .query_time(clock, config.max_latency(), config.query_retries)
    }

    /// Close and reopen the connection
    pub fn reopen(&mut self) -> Result<(), ProtocolError> {
        self.driver.reopen()
    }
}

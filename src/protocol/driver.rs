// Driver - Half-duplex command/response exchange with the bridge
//
// One exchange at a time: flush, write a command, read lines until ACK or NAK.
// Every read goes through `recv`, which watches for the startup banner and
// turns a bridge reset into `ProtocolError::Restarted` wherever it happens.

use crate::cancel::CancelToken;
use crate::clock::WallClock;
use crate::config::ConfigError;
use crate::link::Link;
use crate::protocol::line::{classify, parse_counter, LineClass, STARTUP_BANNER};
use crate::protocol::{Command, ProtocolError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

// ============================================================================
// DRIVER CONFIG
// ============================================================================

/// Retry budgets and timeouts for the protocol driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Read attempts while waiting for ACK/NAK or a parameter echo
    pub control_retries: u32,
    /// Read attempts on the data path
    pub data_retries: u32,
    /// Per-line timeout in milliseconds
    pub line_timeout_ms: u64,
    /// Per-line timeout while consuming the startup banner
    pub startup_line_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            control_retries: 5,
            data_retries: 20,
            line_timeout_ms: 1_000,
            startup_line_timeout_ms: 2_000,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control_retries(mut self, retries: u32) -> Self {
        self.control_retries = retries;
        self
    }

    pub fn with_data_retries(mut self, retries: u32) -> Self {
        self.data_retries = retries;
        self
    }

    pub fn with_line_timeout_ms(mut self, ms: u64) -> Self {
        self.line_timeout_ms = ms;
        self
    }

    pub fn with_startup_line_timeout_ms(mut self, ms: u64) -> Self {
        self.startup_line_timeout_ms = ms;
        self
    }

    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }

    pub fn startup_line_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_line_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_retries == 0 {
            return Err(ConfigError::Invalid("control_retries cannot be 0".to_string()));
        }
        if self.line_timeout_ms == 0 || self.startup_line_timeout_ms == 0 {
            return Err(ConfigError::Invalid("driver timeouts cannot be 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// DRIVER STATE
// ============================================================================

/// Where the driver is within a command exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    #[default]
    Idle,
    AwaitingResponse,
}

/// Terminal outcome of the most recent exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Acked,
    Nakked,
    Restarted,
    RetriesExhausted,
}

/// One time-query round trip, in wall-clock seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Wall clock immediately before the query was written
    pub start: f64,
    /// Bridge millisecond counter
    pub counter: u32,
    /// Wall clock immediately after the reply was received
    pub end: f64,
}

impl TimeSample {
    pub fn latency(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Exchange counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverStats {
    pub commands_sent: u64,
    pub acks: u64,
    pub naks: u64,
    pub restarts: u64,
    pub retries_exhausted: u64,
    pub event_lines: u64,
    pub deferred_lines: u64,
}

// ============================================================================
// DRIVER
// ============================================================================

/// Protocol driver over an exclusively owned link
pub struct Driver<L: Link> {
    link: L,
    config: DriverConfig,
    cancel: CancelToken,
    state: DriverState,
    last_outcome: Option<ExchangeOutcome>,
    deferred: VecDeque<String>,
    stats: DriverStats,
}

impl<L: Link> Driver<L> {
    pub fn new(link: L, config: DriverConfig, cancel: CancelToken) -> Self {
        Self {
            link,
            config,
            cancel,
            state: DriverState::Idle,
            last_outcome: None,
            deferred: VecDeque::new(),
            stats: DriverStats::default(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<ExchangeOutcome> {
        self.last_outcome
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Drop unread input on the link
    pub fn flush_input(&mut self) -> Result<(), ProtocolError> {
        self.link.flush_input()?;
        Ok(())
    }

    /// Write raw bytes with no response handling
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.link.write(bytes)?;
        Ok(())
    }

    /// Close and reopen the underlying connection
    pub fn reopen(&mut self) -> Result<(), ProtocolError> {
        warn!("Reopening connection to bridge");
        self.state = DriverState::Idle;
        self.link.reopen()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Send a command without parameter and wait for ACK
    pub fn send(&mut self, command: Command) -> Result<(), ProtocolError> {
        self.send_command(command, None)
    }

    /// Send a command with a parameter and wait for ACK
    pub fn send_with<P: Display>(&mut self, command: Command, param: P) -> Result<(), ProtocolError> {
        self.send_command(command, Some(&param.to_string()))
    }

    /// Send a command, then its optional parameter line.
    ///
    /// The bridge ACKs the command code, echoes the parameter verbatim and
    /// ACKs again.
    pub fn send_command(&mut self, command: Command, param: Option<&str>) -> Result<(), ProtocolError> {
        debug!(command = %command, param = ?param, "send_command");
        self.link.flush_input()?;
        self.link.write(command.code().to_string().as_bytes())?;
        self.stats.commands_sent += 1;
        self.exchange()?;

        if let Some(param) = param {
            self.link.write(format!("{}\r", param).as_bytes())?;
            let echo = self.read_control_line()?;
            if echo != param {
                warn!(command = %command, sent = param, echo = %echo, "Parameter echo mismatch");
                return Err(ProtocolError::EchoMismatch {
                    expected: param.to_string(),
                    received: echo,
                });
            }
            self.exchange()?;
        }
        Ok(())
    }

    fn exchange(&mut self) -> Result<(), ProtocolError> {
        self.state = DriverState::AwaitingResponse;
        let result = self.await_response();
        self.state = DriverState::Idle;

        let outcome = match &result {
            Ok(()) => Some(ExchangeOutcome::Acked),
            Err(ProtocolError::Rejected(_)) => Some(ExchangeOutcome::Nakked),
            Err(ProtocolError::Restarted) => Some(ExchangeOutcome::Restarted),
            Err(ProtocolError::TooManyRetries(_)) => Some(ExchangeOutcome::RetriesExhausted),
            Err(_) => None,
        };
        match outcome {
            Some(ExchangeOutcome::Acked) => self.stats.acks += 1,
            Some(ExchangeOutcome::Nakked) => self.stats.naks += 1,
            Some(ExchangeOutcome::RetriesExhausted) => self.stats.retries_exhausted += 1,
            _ => {}
        }
        if outcome.is_some() {
            self.last_outcome = outcome;
        }
        result
    }

    fn await_response(&mut self) -> Result<(), ProtocolError> {
        let budget = self.config.control_retries;
        for _ in 0..budget {
            if self.cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            let Some(line) = self.recv(self.config.line_timeout())? else {
                continue;
            };
            match classify(&line) {
                LineClass::Ack => return Ok(()),
                LineClass::Nak(detail) => return Err(ProtocolError::Rejected(detail)),
                LineClass::Event => {
                    self.stats.event_lines += 1;
                    debug!(line = %line, "Discarding event while awaiting ACK");
                }
                LineClass::Blank => {}
                _ => trace!(line = %line, "Unexpected line while awaiting ACK"),
            }
        }
        Err(ProtocolError::TooManyRetries(budget))
    }

    /// Read the next non-blank, non-event line on the control path
    fn read_control_line(&mut self) -> Result<String, ProtocolError> {
        let budget = self.config.control_retries;
        for _ in 0..budget {
            if self.cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            let Some(line) = self.recv(self.config.line_timeout())? else {
                continue;
            };
            match classify(&line) {
                LineClass::Blank => {}
                LineClass::Event => {
                    self.stats.event_lines += 1;
                    debug!(line = %line, "Discarding event while awaiting echo");
                }
                _ => return Ok(line),
            }
        }
        self.stats.retries_exhausted += 1;
        Err(ProtocolError::TooManyRetries(budget))
    }

    // ------------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------------

    /// Hand a line back so the next `read_event_line` returns it
    pub fn defer(&mut self, line: String) {
        debug!(line = %line, "Deferring line to the event path");
        self.stats.deferred_lines += 1;
        self.deferred.push_back(line);
    }

    /// Number of deferred lines not yet consumed
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Read the next event line.
    ///
    /// Deferred lines come first. Otherwise up to `retries + 1` reads are
    /// attempted; the first non-blank line ends the read, and is returned
    /// only if it is an event. Cancellation returns `Ok(None)`.
    pub fn read_event_line(&mut self, retries: u32) -> Result<Option<String>, ProtocolError> {
        if let Some(line) = self.deferred.pop_front() {
            return Ok(Some(line));
        }

        for remaining in (0..=retries).rev() {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            trace!(retries_left = remaining, "Waiting for line from bridge");
            let Some(line) = self.recv(self.config.line_timeout())? else {
                continue;
            };
            match classify(&line) {
                LineClass::Blank => continue,
                LineClass::Event => {
                    self.stats.event_lines += 1;
                    return Ok(Some(line));
                }
                _ => {
                    debug!(line = %line, "bridge");
                    return Ok(None);
                }
            }
        }
        self.stats.retries_exhausted += 1;
        Err(ProtocolError::TooManyRetries(retries))
    }

    /// Query the bridge's millisecond counter.
    ///
    /// Replies slower than `max_latency` seconds are retried. A non-numeric
    /// reply is returned unread as `DataWaiting` so it can be processed as an
    /// event.
    pub fn query_time(
        &mut self,
        clock: &dyn WallClock,
        max_latency: f64,
        retries: u32,
    ) -> Result<TimeSample, ProtocolError> {
        for _ in 0..=retries {
            if self.cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            self.link.flush_input()?;
            let start = clock.now();
            self.link.write(Command::QueryTime.code().to_string().as_bytes())?;
            let reply = self.recv(self.config.line_timeout())?;
            let end = clock.now();

            let line = match reply {
                Some(line) if !line.is_empty() => line,
                _ => continue,
            };
            let Some(counter) = parse_counter(&line) else {
                return Err(ProtocolError::DataWaiting(line));
            };

            let sample = TimeSample { start, counter, end };
            if sample.latency() > max_latency {
                debug!(latency_ms = sample.latency() * 1000.0, "Time query latency too high");
                continue;
            }
            trace!(counter, latency_ms = sample.latency() * 1000.0, "Time query");
            return Ok(sample);
        }
        self.stats.retries_exhausted += 1;
        Err(ProtocolError::TooManyRetries(retries))
    }

    // ------------------------------------------------------------------------
    // Restart detection
    // ------------------------------------------------------------------------

    /// Read one line, turning any startup banner line into `Restarted`
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, ProtocolError> {
        let line = self.link.read_line(timeout)?;
        if let Some(line) = &line {
            if let LineClass::Banner(index) = classify(line) {
                return Err(self.consume_startup(index));
            }
        }
        Ok(line)
    }

    /// Consume the rest of the banner after seeing entry `index`.
    ///
    /// A missing or wrong banner line means the bridge crashed while booting;
    /// the connection is reopened. The restart is reported either way.
    fn consume_startup(&mut self, index: usize) -> ProtocolError {
        info!(line = STARTUP_BANNER[index], "Bridge startup detected");
        let timeout = self.config.startup_line_timeout();

        for expected in &STARTUP_BANNER[index + 1..] {
            match self.link.read_line(timeout) {
                Ok(Some(line)) if line == *expected => info!(line = %line, "Bridge"),
                Ok(other) => {
                    warn!(expected = *expected, got = ?other, "Bridge crash during boot. Reopening connection");
                    if let Err(e) = self.link.reopen() {
                        return ProtocolError::Link(e);
                    }
                    break;
                }
                Err(e) => return ProtocolError::Link(e),
            }
        }

        info!("Bridge restart detected");
        self.stats.restarts += 1;
        self.last_outcome = Some(ExchangeOutcome::Restarted);
        ProtocolError::Restarted
    }
}

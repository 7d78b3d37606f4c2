// Clock Sync - Maps the bridge's millisecond counter onto wall-clock time
//
// Events carry only the bridge's free-running u32 millisecond counter, which
// wraps roughly every 49.7 days. We keep offset = wall - counter/1000 and
// refresh it periodically, and immediately whenever the counter goes
// backwards.

use crate::clock::WallClock;
use crate::config::ConfigError;
use crate::link::Link;
use crate::protocol::{Driver, ProtocolError, TimeSample};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// CLOCK CONFIG
// ============================================================================

/// Bounds for accepting a new offset estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Round trips slower than this are discarded
    pub max_latency_ms: u64,
    /// Largest accepted jump between successive offsets
    pub max_drift_ms: u64,
    /// Mandatory resync interval
    pub resync_period_secs: u64,
    /// Candidate offsets tried per resync
    pub sync_attempts: u32,
    /// Retries inside a single time query
    pub query_retries: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 15,
            max_drift_ms: 500,
            resync_period_secs: 600,
            sync_attempts: 20,
            query_retries: 20,
        }
    }
}

impl ClockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.max_latency_ms = ms;
        self
    }

    pub fn with_max_drift_ms(mut self, ms: u64) -> Self {
        self.max_drift_ms = ms;
        self
    }

    pub fn with_resync_period_secs(mut self, secs: u64) -> Self {
        self.resync_period_secs = secs;
        self
    }

    pub fn with_sync_attempts(mut self, attempts: u32) -> Self {
        self.sync_attempts = attempts;
        self
    }

    pub fn with_query_retries(mut self, retries: u32) -> Self {
        self.query_retries = retries;
        self
    }

    pub fn max_latency(&self) -> f64 {
        self.max_latency_ms as f64 / 1000.0
    }

    pub fn max_drift(&self) -> f64 {
        self.max_drift_ms as f64 / 1000.0
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_latency_ms == 0 {
            return Err(ConfigError::Invalid("max_latency_ms cannot be 0".to_string()));
        }
        if self.sync_attempts == 0 {
            return Err(ConfigError::Invalid("sync_attempts cannot be 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// CLOCK STATE
// ============================================================================

/// Current offset estimate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockState {
    /// wall-clock seconds minus counter seconds
    pub offset: Option<f64>,
    pub last_counter: u32,
    /// Wall-clock time by which the next resync must happen
    pub deadline_to_resync: f64,
}

/// Judgement on one time sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accept { offset: f64, rollover: bool },
    RejectLatency,
    RejectDrift { candidate: f64 },
}

/// Synchronisation counters
#[derive(Debug, Clone, Default)]
pub struct ClockStats {
    pub resyncs: u64,
    pub rollovers: u64,
    pub rejected_samples: u64,
}

// ============================================================================
// CLOCK SYNC
// ============================================================================

/// Owner of the offset estimate
pub struct ClockSync {
    config: ClockConfig,
    state: ClockState,
    clock: Box<dyn WallClock>,
    stats: ClockStats,
}

impl ClockSync {
    pub fn new(config: ClockConfig, clock: Box<dyn WallClock>) -> Self {
        Self {
            config,
            state: ClockState::default(),
            clock,
            stats: ClockStats::default(),
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    pub fn stats(&self) -> &ClockStats {
        &self.stats
    }

    pub fn clock(&self) -> &dyn WallClock {
        self.clock.as_ref()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Forget the offset; the next resync accepts unconditionally
    pub fn reset(&mut self) {
        self.state = ClockState::default();
    }

    /// Judge a sample against the current estimate
    pub fn evaluate(&self, sample: &TimeSample) -> Verdict {
        if sample.latency() > self.config.max_latency() {
            return Verdict::RejectLatency;
        }

        let candidate = sample.midpoint() - sample.counter as f64 / 1000.0;
        let rollover = sample.counter < self.state.last_counter;

        match self.state.offset {
            Some(prior) if !rollover && (candidate - prior).abs() > self.config.max_drift() => {
                Verdict::RejectDrift { candidate }
            }
            _ => Verdict::Accept {
                offset: candidate,
                rollover,
            },
        }
    }

    /// Check a candidate offset against a second, independent counter reading
    pub fn confirm(&self, offset: f64, check: &TimeSample) -> bool {
        let estimate = offset + check.counter as f64 / 1000.0;
        (estimate - check.end).abs() <= self.config.max_drift()
    }

    /// Adopt `offset`, measured by `sample`
    pub fn commit(&mut self, sample: &TimeSample, offset: f64) {
        match self.state.offset {
            Some(prior) => debug!(offset, was = prior, diff = offset - prior, "Updated time offset"),
            None => debug!(offset, "Set time offset"),
        }
        self.state.offset = Some(offset);
        self.state.last_counter = sample.counter;
        self.state.deadline_to_resync = sample.start + self.config.resync_period_secs as f64;
        self.stats.resyncs += 1;
    }

    /// Whether a reading carrying `counter` must wait for a resync first
    pub fn needs_resync(&self, counter: u32, now: f64) -> bool {
        self.state.offset.is_none()
            || counter < self.state.last_counter
            || self.state.deadline_to_resync < now
    }

    /// Record the counter of an accepted reading
    pub fn observe(&mut self, counter: u32) {
        self.state.last_counter = counter;
    }

    /// Wall-clock seconds, rounded, for a counter value
    pub fn timecode(&self, counter: u32) -> Option<i64> {
        self.state
            .offset
            .map(|offset| (offset + counter as f64 / 1000.0).round() as i64)
    }

    // ------------------------------------------------------------------------
    // Bridge interaction
    // ------------------------------------------------------------------------

    fn query<L: Link>(&self, driver: &mut Driver<L>) -> Result<TimeSample, ProtocolError> {
        driver.query_time(
            self.clock.as_ref(),
            self.config.max_latency(),
            self.config.query_retries,
        )
    }

    /// Forget the offset and record the bridge's current counter
    pub fn prime<L: Link>(&mut self, driver: &mut Driver<L>) -> Result<(), ProtocolError> {
        self.reset();
        for _ in 0..self.config.sync_attempts {
            match self.query(driver) {
                Ok(sample) => {
                    self.state.last_counter = sample.counter;
                    return Ok(());
                }
                Err(ProtocolError::DataWaiting(line)) => driver.defer(line),
                Err(e) => return Err(e),
            }
        }
        Err(ProtocolError::TooManyRetries(self.config.sync_attempts))
    }

    /// Estimate a new offset.
    ///
    /// Returns `Ok(true)` once a candidate is accepted and confirmed,
    /// `Ok(false)` if every attempt was rejected but an older estimate is
    /// still in force. Lines that race a time query are deferred to the
    /// event path.
    pub fn resync<L: Link>(&mut self, driver: &mut Driver<L>) -> Result<bool, ProtocolError> {
        let mut latest_counter = None;

        for _ in 0..self.config.sync_attempts {
            if driver.cancel_token().is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }

            let sample = match self.query(driver) {
                Ok(sample) => sample,
                Err(ProtocolError::DataWaiting(line)) => {
                    driver.defer(line);
                    continue;
                }
                Err(e) => return Err(e),
            };
            latest_counter = Some(sample.counter);

            let (offset, rollover) = match self.evaluate(&sample) {
                Verdict::Accept { offset, rollover } => (offset, rollover),
                Verdict::RejectLatency => {
                    self.stats.rejected_samples += 1;
                    continue;
                }
                Verdict::RejectDrift { candidate } => {
                    self.stats.rejected_samples += 1;
                    debug!(candidate, prior = ?self.state.offset, "New offset too dissimilar to previous one");
                    continue;
                }
            };

            let check = match self.query(driver) {
                Ok(check) => check,
                Err(ProtocolError::DataWaiting(line)) => {
                    driver.defer(line);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !self.confirm(offset, &check) {
                self.stats.rejected_samples += 1;
                debug!(
                    diff = offset + check.counter as f64 / 1000.0 - check.end,
                    "Offset estimate disagrees with wall clock"
                );
                continue;
            }

            if rollover {
                self.stats.rollovers += 1;
                info!(counter = sample.counter, previous = self.state.last_counter, "Bridge counter rollover detected");
            }
            self.commit(&sample, offset);
            return Ok(true);
        }

        if let Some(counter) = latest_counter {
            self.state.last_counter = counter;
        }
        if self.state.offset.is_none() {
            return Err(ProtocolError::TooManyRetries(self.config.sync_attempts));
        }
        warn!(attempts = self.config.sync_attempts, "Could not refresh time offset, keeping previous estimate");
        Ok(false)
    }

    /// Wall-clock timecode for an event counter, resyncing first if the
    /// counter rolled over or the resync deadline passed.
    ///
    /// After a rollover the previous offset is no longer valid, so a resync
    /// that keeps it fails the stamp instead.
    pub fn stamp<L: Link>(&mut self, driver: &mut Driver<L>, counter: u32) -> Result<i64, ProtocolError> {
        let now = self.clock.now();
        if self.needs_resync(counter, now) {
            let rolled_over = self.state.offset.is_some() && counter < self.state.last_counter;
            if !self.resync(driver)? && rolled_over {
                warn!(counter, "Counter rolled over but no new offset was confirmed, dropping event");
                return Err(ProtocolError::TooManyRetries(self.config.sync_attempts));
            }
        }
        self.observe(counter);

        let timecode = self
            .timecode(counter)
            .ok_or(ProtocolError::TooManyRetries(self.config.sync_attempts))?;
        debug!(counter, timecode, diff = timecode as f64 - now, "Stamped event");
        Ok(timecode)
    }
}

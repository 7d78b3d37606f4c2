// Manager - Run loop, restart recovery and registry editing
//
// Recovery ladder for the logging loop:
//   Restarted       -> reinitialise the bridge and replay its configuration
//   TooManyRetries  -> probe with a time query; a reply that is really an
//                      event is processed, a restart is recovered as above,
//                      silence escalates to reopening the connection
//   link failure    -> reopen the connection and reinitialise
// Only repeated reopen failures end the loop.

use crate::bridge::Bridge;
use crate::cancel::CancelToken;
use crate::config::ConfigError;
use crate::event::{PowerState, Reading, TransmitterKind};
use crate::link::Link;
use crate::manager::ManagerError;
use crate::protocol::{Command, ProtocolError};
use crate::registry::{ReconcilePolicy, Registry, RegistryError, StateDecision};
use crate::sink::SampleSink;
use crate::storage::RegistryStore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// MANAGER CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// How long to wait for a pairing acknowledgement
    pub pairing_deadline_ms: u64,
    /// How long to listen for a new transmitter
    pub listen_window_secs: u64,
    /// Consecutive failed reopen attempts before giving up
    pub max_reopen_failures: u32,
    /// Pause before each reopen attempt
    pub reopen_backoff_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pairing_deadline_ms: 5_000,
            listen_window_secs: 30,
            max_reopen_failures: 5,
            reopen_backoff_ms: 1_000,
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pairing_deadline_ms(mut self, ms: u64) -> Self {
        self.pairing_deadline_ms = ms;
        self
    }

    pub fn with_listen_window_secs(mut self, secs: u64) -> Self {
        self.listen_window_secs = secs;
        self
    }

    pub fn with_max_reopen_failures(mut self, max: u32) -> Self {
        self.max_reopen_failures = max;
        self
    }

    pub fn with_reopen_backoff_ms(mut self, ms: u64) -> Self {
        self.reopen_backoff_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pairing_deadline_ms == 0 {
            return Err(ConfigError::Invalid("pairing_deadline_ms cannot be 0".to_string()));
        }
        if self.max_reopen_failures == 0 {
            return Err(ConfigError::Invalid("max_reopen_failures cannot be 0".to_string()));
        }
        Ok(())
    }
}

/// Counters kept by the run loop
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    pub readings: u64,
    pub unknown_transmitter: u64,
    pub restarts: u64,
    pub probes: u64,
    pub reopens: u64,
    pub restores: u64,
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct Manager<L: Link, S: SampleSink> {
    pub(super) bridge: Bridge<L>,
    pub(super) registry: Registry,
    pub(super) store: RegistryStore,
    pub(super) sink: S,
    pub(super) policy: ReconcilePolicy,
    pub(super) config: ManagerConfig,
    pub(super) cancel: CancelToken,
    pub(super) stats: ManagerStats,
    reopen_failures: u32,
}

impl<L: Link, S: SampleSink> Manager<L, S> {
    /// Build a manager around a connected bridge, loading the stored registry
    pub fn new(
        bridge: Bridge<L>,
        store: RegistryStore,
        sink: S,
        policy: ReconcilePolicy,
        config: ManagerConfig,
    ) -> Result<Self, ManagerError> {
        let registry = store.load_registry()?;
        let (tx, trx) = registry.counts();
        info!(tx, trx, "Loaded transmitter registry");
        let cancel = bridge.driver().cancel_token().clone();

        Ok(Self {
            bridge,
            registry,
            store,
            sink,
            policy,
            config,
            cancel,
            stats: ManagerStats::default(),
            reopen_failures: 0,
        })
    }

    pub fn bridge(&self) -> &Bridge<L> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<L> {
        &mut self.bridge
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    /// Replay configuration and write the labels file
    pub fn start(&mut self) -> Result<(), ManagerError> {
        self.configure_bridge()?;
        self.sink.write_labels(&self.registry.labels())?;
        Ok(())
    }

    // ========================================================================
    // BRIDGE CONFIGURATION
    // ========================================================================

    /// Tell the bridge about every registered transmitter, from scratch
    pub fn configure_bridge(&mut self) -> Result<(), ManagerError> {
        debug!("Replaying bridge configuration");
        self.bridge.send(Command::DeleteAllTx)?;
        self.bridge.send(Command::DeleteAllTrx)?;

        let (tx, trx) = self.registry.counts();
        if tx > 0 {
            self.bridge.send_with(Command::SetTxCount, tx)?;
        }
        if trx > 0 {
            self.bridge.send_with(Command::SetTrxCount, trx)?;
        }

        let adds: Vec<(Command, u32)> = self
            .registry
            .iter()
            .map(|t| (t.add_command(), t.id()))
            .collect();
        for (command, id) in adds {
            self.bridge.send_with(command, id)?;
        }
        info!(tx, trx, "Bridge configured");
        Ok(())
    }

    /// Reinitialise the bridge after it lost its session state
    pub fn restart_bridge(&mut self) -> Result<(), ManagerError> {
        match self.bridge.init() {
            Err(ProtocolError::Restarted) => self.bridge.init()?,
            other => other?,
        }
        self.configure_bridge()
    }

    // ========================================================================
    // RUN LOOP
    // ========================================================================

    /// Log readings until the cancel token is raised
    pub fn run(&mut self) -> Result<(), ManagerError> {
        let retries = self.bridge.driver().config().data_retries;
        info!(retries, "Logging started");

        while !self.cancel.is_cancelled() {
            let result = match self.bridge.read_event(retries) {
                Ok(Some(reading)) => self.handle_reading(&reading),
                Ok(None) => Ok(()),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => {}
                Err(ManagerError::Protocol(e)) => self.recover(e)?,
                Err(e) => return Err(e),
            }
        }

        self.persist()?;
        info!(readings = self.stats.readings, "Logging stopped");
        Ok(())
    }

    /// Climb the recovery ladder until the session is usable again
    fn recover(&mut self, error: ProtocolError) -> Result<(), ManagerError> {
        let mut error = error;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let step = match error {
                ProtocolError::Cancelled => return Ok(()),
                ProtocolError::Restarted => {
                    self.stats.restarts += 1;
                    warn!("Bridge restarted, replaying configuration");
                    self.restart_bridge()
                }
                ProtocolError::TooManyRetries(_) => self.probe(),
                ProtocolError::DataWaiting(line) => self.process_line(&line),
                e if e.needs_reopen() => self.reopen_and_reinit(&e),
                e => {
                    warn!(error = %e, "Bridge error");
                    Ok(())
                }
            };
            match step {
                Ok(()) => return Ok(()),
                Err(ManagerError::Protocol(next)) => error = next,
                Err(e) => return Err(e),
            }
        }
    }

    /// Check whether a silent bridge is still alive
    fn probe(&mut self) -> Result<(), ManagerError> {
        self.stats.probes += 1;
        warn!("No data from bridge, probing");
        match self.bridge.probe_time() {
            Ok(sample) => {
                debug!(counter = sample.counter, "Bridge answered probe");
                Ok(())
            }
            Err(ProtocolError::DataWaiting(line)) => self.process_line(&line),
            Err(ProtocolError::TooManyRetries(n)) => {
                error!(retries = n, "Bridge not responding");
                self.reopen_and_reinit(&ProtocolError::TooManyRetries(n))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reopen_and_reinit(&mut self, cause: &ProtocolError) -> Result<(), ManagerError> {
        self.stats.reopens += 1;
        error!(cause = %cause, "Reopening bridge connection");
        if self.config.reopen_backoff_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.reopen_backoff_ms));
        }

        let result = self
            .bridge
            .reopen()
            .map_err(ManagerError::from)
            .and_then(|()| self.restart_bridge());
        match result {
            Ok(()) => {
                self.reopen_failures = 0;
                Ok(())
            }
            Err(ManagerError::Protocol(ProtocolError::Cancelled)) => Ok(()),
            Err(ManagerError::Protocol(e)) => {
                self.reopen_failures += 1;
                if self.reopen_failures >= self.config.max_reopen_failures {
                    return Err(ManagerError::ReopenFailed {
                        attempts: self.reopen_failures,
                        reason: e.to_string(),
                    });
                }
                warn!(attempt = self.reopen_failures, error = %e, "Reopen did not recover the bridge");
                Err(ManagerError::Protocol(e))
            }
            Err(e) => Err(e),
        }
    }

    fn process_line(&mut self, line: &str) -> Result<(), ManagerError> {
        match self.bridge.process_line(line)? {
            Some(reading) => self.handle_reading(&reading),
            None => Ok(()),
        }
    }

    /// Route one reading to its transmitter
    pub fn handle_reading(&mut self, reading: &Reading) -> Result<(), ManagerError> {
        if !reading.is_sample() {
            debug!(tx_id = reading.source_id, kind = ?reading.kind, "Ignoring pairing message while logging");
            return Ok(());
        }

        let outcome = match self.registry.apply(reading, &self.policy, &mut self.sink) {
            Ok(outcome) => outcome,
            Err(e @ RegistryError::UnknownTransmitter(_)) => {
                self.stats.unknown_transmitter += 1;
                warn!(error = %e, "Dropping reading");
                return Ok(());
            }
            Err(RegistryError::Sink(e)) => {
                error!(tx_id = reading.source_id, error = %e, "Lost sample");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.stats.readings += 1;

        match outcome.decision {
            StateDecision::Accepted { .. } => self.persist_quietly(),
            StateDecision::Restore { state } => {
                self.stats.restores += 1;
                match self.send_switch(reading.source_id, state) {
                    Err(ManagerError::Protocol(e)) if e.is_command_local() => {
                        warn!(tx_id = reading.source_id, error = %e, "Could not restore power state");
                    }
                    other => other?,
                }
            }
            StateDecision::Unchanged | StateDecision::Ignored => {}
        }
        Ok(())
    }

    // ========================================================================
    // REGISTRY EDITING
    // ========================================================================

    /// Rewrite the stored registry and the labels file
    pub fn persist(&mut self) -> Result<(), ManagerError> {
        self.store.save_registry(&self.registry)?;
        self.sink.write_labels(&self.registry.labels())?;
        Ok(())
    }

    fn persist_quietly(&mut self) {
        if let Err(e) = self.persist() {
            error!(error = %e, "Failed to save registry");
        }
    }

    /// Register a transmitter by hand and tell the bridge about it
    pub fn add_transmitter(&mut self, id: u32, kind: TransmitterKind, ports: &[u8]) -> Result<(), ManagerError> {
        let command = self.registry.add(id, kind, ports)?.add_command();
        if let Err(e) = self.bridge.send_with(command, id) {
            self.registry.remove(id)?;
            return Err(e.into());
        }
        self.persist()
    }

    /// Forget a transmitter here and on the bridge
    pub fn delete_transmitter(&mut self, id: u32) -> Result<(), ManagerError> {
        let command = self
            .registry
            .get(id)
            .ok_or(RegistryError::UnknownTransmitter(id))?
            .delete_command();
        match self.bridge.send_with(command, id) {
            Ok(()) => {}
            Err(e) if e.is_command_local() => {
                warn!(tx_id = id, error = %e, "Bridge did not delete transmitter")
            }
            Err(e) => return Err(e.into()),
        }
        self.registry.remove(id)?;
        self.persist()
    }

    pub fn rename_sensor(&mut self, id: u32, port: u8, name: &str) -> Result<(), ManagerError> {
        self.registry.rename_sensor(id, port, name)?;
        self.persist()
    }

    pub fn set_log_channel(&mut self, id: u32, port: u8, channel: u32) -> Result<(), ManagerError> {
        self.registry.set_log_channel(id, port, channel)?;
        self.persist()
    }

    pub fn set_aggregate(&mut self, id: u32, port: u8, aggregate: bool) -> Result<(), ManagerError> {
        self.registry.set_aggregate(id, port, aggregate)?;
        self.persist()
    }

    /// Switch a TRX on or off
    pub fn switch(&mut self, id: u32, state: PowerState) -> Result<(), ManagerError> {
        let transmitter = self
            .registry
            .get(id)
            .ok_or(RegistryError::UnknownTransmitter(id))?;
        if transmitter.as_trx().is_none() {
            return Err(RegistryError::NotSwitchable(id).into());
        }
        self.send_switch(id, state)?;
        self.registry.set_power_state(id, state)?;
        self.persist()
    }

    fn send_switch(&mut self, id: u32, state: PowerState) -> Result<(), ManagerError> {
        let command = match state {
            PowerState::On => Command::SwitchOn,
            PowerState::Off => Command::SwitchOff,
        };
        info!(tx_id = id, state = %state, "Switching transmitter");
        self.bridge.send_with(command, id)?;
        Ok(())
    }

    /// Report only known transmitters, or everything the bridge hears
    pub fn set_receive_mode(&mut self, known_only: bool) -> Result<(), ManagerError> {
        self.bridge.set_receive_mode(known_only)?;
        Ok(())
    }

    /// Table of every registered sensor
    pub fn list(&self) -> String {
        self.registry.summary()
    }
}

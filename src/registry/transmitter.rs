// Transmitter - TX and TRX units with their sensors
//
// A closed two-case enum. Both cases accept readings, know the bridge
// command codes that add and delete them, and describe themselves in a
// summary table. TRX units additionally reconcile reported on/off state.

use crate::config::ConfigError;
use crate::event::{PowerState, Reading, TransmitterKind};
use crate::protocol::Command;
use crate::registry::{RegistryError, SampleOutcome, Sensor};
use crate::sink::SampleSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Sensor ports a TX unit may carry
pub const TX_PORTS: [u8; 3] = [1, 2, 3];

/// The single sensor port of a TRX unit
pub const TRX_PORT: u8 = 1;

const TRX_PORTS: [u8; 1] = [TRX_PORT];

// ============================================================================
// RECONCILE POLICY
// ============================================================================

/// Tunables for deciding what an unexpected Off report means
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilePolicy {
    /// A packet seen within this many seconds before an Off report means the
    /// device was not unplugged
    pub silence_window_secs: i64,
    /// Switch a unit back to its previous state when it appears to have
    /// been repowered
    pub switch_on_repower: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            silence_window_secs: 12,
            switch_on_repower: true,
        }
    }
}

impl ReconcilePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_silence_window_secs(mut self, secs: i64) -> Self {
        self.silence_window_secs = secs;
        self
    }

    pub fn with_switch_on_repower(mut self, enabled: bool) -> Self {
        self.switch_on_repower = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.silence_window_secs <= 0 {
            return Err(ConfigError::Invalid(
                "silence_window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Why a reported state change was believed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// On is only ever reported after a button press
    SwitchedOn,
    /// A poll answer confirmed there was no missed event
    PollConfirmed,
    /// The unit was heard from recently, so it was not unplugged
    RecentPacket,
    /// Nothing was known to restore
    NoPriorState,
}

/// What the reconciliation decided for a reported state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateDecision {
    /// No state reported, or the same state as already known
    Unchanged,
    Accepted {
        state: PowerState,
        cause: TransitionCause,
    },
    /// The unit looks repowered; the caller should switch it to `state`
    Restore { state: PowerState },
    /// Looks repowered but restoring is disabled; the report is not believed
    Ignored,
}

/// Summary of applying one reading to a transmitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingOutcome {
    pub recorded: usize,
    pub filtered: usize,
    pub unknown_ports: Vec<u8>,
    pub decision: StateDecision,
}

impl ReadingOutcome {
    fn new() -> Self {
        Self {
            recorded: 0,
            filtered: 0,
            unknown_ports: Vec::new(),
            decision: StateDecision::Unchanged,
        }
    }

    /// Switch command the caller must send, if any
    pub fn restore(&self) -> Option<PowerState> {
        match self.decision {
            StateDecision::Restore { state } => Some(state),
            _ => None,
        }
    }
}

// ============================================================================
// UNITS
// ============================================================================

/// Passive sender with up to three sensors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxUnit {
    id: u32,
    sensors: BTreeMap<u8, Sensor>,
}

/// Switchable unit with one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrxUnit {
    id: u32,
    sensors: BTreeMap<u8, Sensor>,
    power_state: Option<PowerState>,
    time_of_last_packet: Option<i64>,
    #[serde(skip)]
    state_just_changed: bool,
}

impl TrxUnit {
    pub fn power_state(&self) -> Option<PowerState> {
        self.power_state
    }

    pub fn time_of_last_packet(&self) -> Option<i64> {
        self.time_of_last_packet
    }

    pub fn state_just_changed(&self) -> bool {
        self.state_just_changed
    }

    /// Record a state we commanded ourselves
    pub fn set_power_state(&mut self, state: PowerState) {
        self.power_state = Some(state);
    }

    fn reconcile(&self, reading: &Reading, policy: &ReconcilePolicy) -> StateDecision {
        let Some(reported) = reading.reported_state else {
            return StateDecision::Unchanged;
        };
        if Some(reported) == self.power_state {
            return StateDecision::Unchanged;
        }

        let accept = |cause| StateDecision::Accepted {
            state: reported,
            cause,
        };

        if reported == PowerState::On {
            return accept(TransitionCause::SwitchedOn);
        }
        if reading.reply_to_poll == Some(false) {
            return accept(TransitionCause::PollConfirmed);
        }
        if let Some(last) = self.time_of_last_packet {
            if last + policy.silence_window_secs > reading.timecode {
                return accept(TransitionCause::RecentPacket);
            }
        }
        match self.power_state {
            None => accept(TransitionCause::NoPriorState),
            Some(previous) if policy.switch_on_repower => StateDecision::Restore { state: previous },
            Some(_) => StateDecision::Ignored,
        }
    }
}

// ============================================================================
// TRANSMITTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transmitter {
    Tx(TxUnit),
    Trx(TrxUnit),
}

impl Transmitter {
    /// Create a TX unit with the given sensors
    pub fn tx(id: u32, sensors: BTreeMap<u8, Sensor>) -> Result<Self, RegistryError> {
        check_ports(TransmitterKind::Tx, sensors.keys())?;
        Ok(Self::Tx(TxUnit { id, sensors }))
    }

    /// Create a TRX unit whose single sensor is `sensor`
    pub fn trx(id: u32, sensor: Sensor) -> Self {
        let mut sensors = BTreeMap::new();
        sensors.insert(TRX_PORT, sensor);
        Self::Trx(TrxUnit {
            id,
            sensors,
            power_state: None,
            time_of_last_packet: None,
            state_just_changed: false,
        })
    }

    pub fn id(&self) -> u32 {
        match self {
            Self::Tx(u) => u.id,
            Self::Trx(u) => u.id,
        }
    }

    pub fn kind(&self) -> TransmitterKind {
        match self {
            Self::Tx(_) => TransmitterKind::Tx,
            Self::Trx(_) => TransmitterKind::Trx,
        }
    }

    pub fn sensors(&self) -> &BTreeMap<u8, Sensor> {
        match self {
            Self::Tx(u) => &u.sensors,
            Self::Trx(u) => &u.sensors,
        }
    }

    pub fn sensors_mut(&mut self) -> &mut BTreeMap<u8, Sensor> {
        match self {
            Self::Tx(u) => &mut u.sensors,
            Self::Trx(u) => &mut u.sensors,
        }
    }

    pub fn sensor(&self, port: u8) -> Option<&Sensor> {
        self.sensors().get(&port)
    }

    pub fn sensor_mut(&mut self, port: u8) -> Result<&mut Sensor, RegistryError> {
        let (id, kind) = (self.id(), self.kind());
        self.sensors_mut()
            .get_mut(&port)
            .ok_or(RegistryError::UnknownSensorPort { id, kind, port })
    }

    pub fn as_trx(&self) -> Option<&TrxUnit> {
        match self {
            Self::Trx(u) => Some(u),
            Self::Tx(_) => None,
        }
    }

    pub fn as_trx_mut(&mut self) -> Option<&mut TrxUnit> {
        match self {
            Self::Trx(u) => Some(u),
            Self::Tx(_) => None,
        }
    }

    /// Bridge command that registers this unit
    pub fn add_command(&self) -> Command {
        match self {
            Self::Tx(_) => Command::AddTx,
            Self::Trx(_) => Command::AddTrx,
        }
    }

    /// Bridge command that forgets this unit
    pub fn delete_command(&self) -> Command {
        match self {
            Self::Tx(_) => Command::DeleteTx,
            Self::Trx(_) => Command::DeleteTrx,
        }
    }

    /// Whether a pairing request can be refused.
    ///
    /// The bridge has no refuse primitive; a TRX is refused by pairing and
    /// then deleting it. A TX keeps no pairing state so there is nothing to do.
    pub fn can_reject_pairing(&self) -> bool {
        matches!(self, Self::Trx(_))
    }

    /// One table row per sensor, matching [`summary_header`]
    pub fn summary(&self) -> Vec<String> {
        let state = match self.as_trx().and_then(|u| u.power_state) {
            Some(s) => s.to_string(),
            None => "-".to_string(),
        };
        self.sensors()
            .iter()
            .map(|(port, sensor)| {
                format!(
                    "{:>12} {:>4} {:>4} {:>5} {:>7} {:>5}  {}",
                    self.id(),
                    self.kind(),
                    port,
                    if sensor.is_aggregate() { "agg" } else { "iam" },
                    sensor.log_channel(),
                    state,
                    sensor.name()
                )
            })
            .collect()
    }

    /// Apply a sample reading: reconcile state (TRX) then log every sensor value
    pub fn apply(
        &mut self,
        reading: &Reading,
        policy: &ReconcilePolicy,
        sink: &mut dyn SampleSink,
    ) -> Result<ReadingOutcome, RegistryError> {
        let mut outcome = ReadingOutcome::new();
        let id = self.id();
        let kind = self.kind();

        let state_column = match self {
            Self::Trx(unit) => {
                unit.state_just_changed = false;
                outcome.decision = unit.reconcile(reading, policy);
                match outcome.decision {
                    StateDecision::Accepted { state, cause } => {
                        info!(
                            tx_id = id,
                            from = ?unit.power_state,
                            to = %state,
                            cause = ?cause,
                            "Power state changed"
                        );
                        unit.power_state = Some(state);
                        unit.state_just_changed = true;
                    }
                    StateDecision::Restore { state } => {
                        info!(tx_id = id, restore = %state, "Unit appears repowered, restoring state");
                    }
                    StateDecision::Ignored => {
                        debug!(tx_id = id, "Off report after long silence ignored");
                    }
                    StateDecision::Unchanged => {}
                }
                if unit.state_just_changed && unit.time_of_last_packet.is_some() {
                    unit.power_state
                } else {
                    None
                }
            }
            Self::Tx(_) => None,
        };

        for (&port, &watts) in &reading.sensor_values {
            let Some(sensor) = self.sensors_mut().get_mut(&port) else {
                warn!(error = %RegistryError::UnknownSensorPort { id, kind, port }, "Dropping sensor value");
                outcome.unknown_ports.push(port);
                continue;
            };
            match sensor.log_sample(reading.timecode, watts, state_column, sink)? {
                SampleOutcome::Recorded => outcome.recorded += 1,
                _ => outcome.filtered += 1,
            }
        }

        if let Self::Trx(unit) = self {
            unit.time_of_last_packet = Some(reading.timecode);
        }
        Ok(outcome)
    }
}

/// Column header for [`Transmitter::summary`] rows
pub fn summary_header() -> String {
    format!(
        "{:>12} {:>4} {:>4} {:>5} {:>7} {:>5}  {}",
        "ID", "TYPE", "PORT", "KIND", "CHANNEL", "STATE", "NAME"
    )
}

/// Ports valid for a unit of `kind`
pub fn valid_ports(kind: TransmitterKind) -> &'static [u8] {
    match kind {
        TransmitterKind::Tx => &TX_PORTS,
        TransmitterKind::Trx => &TRX_PORTS,
    }
}

pub(crate) fn check_ports<'a, I: IntoIterator<Item = &'a u8>>(
    kind: TransmitterKind,
    ports: I,
) -> Result<(), RegistryError> {
    let valid = valid_ports(kind);
    for &port in ports {
        if !valid.contains(&port) {
            return Err(RegistryError::InvalidSensorPort { kind, port });
        }
    }
    Ok(())
}

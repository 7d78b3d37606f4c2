// Registry - Every known transmitter, keyed by id
//
// Owns transmitter state exclusively. Enforces that log channels are unique
// across all sensors, except channel 0 which means "do not record".

use crate::event::{PowerState, Reading, TransmitterKind};
use crate::registry::transmitter::{check_ports, summary_header, valid_ports};
use crate::registry::{ReadingOutcome, ReconcilePolicy, RegistryError, Sensor, Transmitter};
use crate::sink::SampleSink;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    transmitters: BTreeMap<u32, Transmitter>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transmitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transmitters.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.transmitters.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Transmitter> {
        self.transmitters.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Transmitter> {
        self.transmitters.get_mut(&id)
    }

    /// Transmitters in id order
    pub fn iter(&self) -> impl Iterator<Item = &Transmitter> {
        self.transmitters.values()
    }

    /// (TX count, TRX count)
    pub fn counts(&self) -> (usize, usize) {
        let trx = self
            .iter()
            .filter(|t| t.kind() == TransmitterKind::Trx)
            .count();
        (self.len() - trx, trx)
    }

    // ========================================================================
    // LOG CHANNELS
    // ========================================================================

    /// Every enabled log channel in use, ascending
    pub fn log_channels(&self) -> Vec<u32> {
        let mut channels: Vec<u32> = self
            .iter()
            .flat_map(|t| t.sensors().values().map(|s| s.log_channel()))
            .filter(|&c| c != 0)
            .collect();
        channels.sort_unstable();
        channels
    }

    /// One past the highest channel in use, or 1 when there are none
    pub fn next_free_log_channel(&self) -> u32 {
        self.log_channels().last().map_or(1, |c| c + 1)
    }

    fn channel_owner(&self, channel: u32, except: Option<(u32, u8)>) -> Option<u32> {
        if channel == 0 {
            return None;
        }
        self.iter().find_map(|t| {
            t.sensors()
                .iter()
                .any(|(&port, s)| s.log_channel() == channel && except != Some((t.id(), port)))
                .then(|| t.id())
        })
    }

    /// Channel-to-name mapping for every enabled channel
    pub fn labels(&self) -> Vec<(u32, String)> {
        let mut labels: Vec<(u32, String)> = self
            .iter()
            .flat_map(|t| t.sensors().values())
            .filter(|s| s.log_channel() != 0)
            .map(|s| (s.log_channel(), s.name().to_string()))
            .collect();
        labels.sort_by_key(|(c, _)| *c);
        labels
    }

    // ========================================================================
    // MUTATION
    // ========================================================================

    /// Insert a fully built transmitter
    pub fn insert(&mut self, transmitter: Transmitter) -> Result<(), RegistryError> {
        let id = transmitter.id();
        if self.contains(id) {
            return Err(RegistryError::DuplicateTransmitter(id));
        }
        for sensor in transmitter.sensors().values() {
            if let Some(owner) = self.channel_owner(sensor.log_channel(), None) {
                return Err(RegistryError::LogChannelInUse {
                    channel: sensor.log_channel(),
                    owner,
                });
            }
        }
        self.transmitters.insert(id, transmitter);
        Ok(())
    }

    /// Register a new transmitter with one fresh sensor per port.
    ///
    /// An empty port list means every port the kind supports. Each sensor
    /// gets the next free log channel.
    pub fn add(&mut self, id: u32, kind: TransmitterKind, ports: &[u8]) -> Result<&Transmitter, RegistryError> {
        if self.contains(id) {
            return Err(RegistryError::DuplicateTransmitter(id));
        }
        let ports = if ports.is_empty() { valid_ports(kind) } else { ports };
        check_ports(kind, ports)?;

        let mut next = self.next_free_log_channel();
        let mut fresh = || {
            let sensor = Sensor::new(next);
            next += 1;
            sensor
        };
        let transmitter = match kind {
            TransmitterKind::Tx => {
                let sensors: BTreeMap<u8, Sensor> = ports.iter().map(|&p| (p, fresh())).collect();
                Transmitter::tx(id, sensors)?
            }
            TransmitterKind::Trx => Transmitter::trx(id, fresh()),
        };

        info!(tx_id = id, kind = %kind, sensors = transmitter.sensors().len(), "Added transmitter");
        self.transmitters.insert(id, transmitter);
        Ok(&self.transmitters[&id])
    }

    pub fn remove(&mut self, id: u32) -> Result<Transmitter, RegistryError> {
        let removed = self
            .transmitters
            .remove(&id)
            .ok_or(RegistryError::UnknownTransmitter(id))?;
        info!(tx_id = id, "Removed transmitter");
        Ok(removed)
    }

    fn sensor_mut(&mut self, id: u32, port: u8) -> Result<&mut Sensor, RegistryError> {
        self.transmitters
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTransmitter(id))?
            .sensor_mut(port)
    }

    pub fn rename_sensor(&mut self, id: u32, port: u8, name: &str) -> Result<(), RegistryError> {
        self.sensor_mut(id, port)?.set_name(name);
        Ok(())
    }

    /// Move a sensor to another log channel; 0 disables logging
    pub fn set_log_channel(&mut self, id: u32, port: u8, channel: u32) -> Result<(), RegistryError> {
        self.sensor_mut(id, port)?;
        if let Some(owner) = self.channel_owner(channel, Some((id, port))) {
            return Err(RegistryError::LogChannelInUse { channel, owner });
        }
        self.sensor_mut(id, port)?.set_log_channel(channel);
        Ok(())
    }

    pub fn set_aggregate(&mut self, id: u32, port: u8, aggregate: bool) -> Result<(), RegistryError> {
        self.sensor_mut(id, port)?.set_aggregate(aggregate);
        Ok(())
    }

    /// Record a power state we commanded
    pub fn set_power_state(&mut self, id: u32, state: PowerState) -> Result<(), RegistryError> {
        let transmitter = self
            .transmitters
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTransmitter(id))?;
        transmitter
            .as_trx_mut()
            .ok_or(RegistryError::NotSwitchable(id))?
            .set_power_state(state);
        Ok(())
    }

    // ========================================================================
    // READINGS
    // ========================================================================

    /// Route a sample reading to its transmitter
    pub fn apply(
        &mut self,
        reading: &Reading,
        policy: &ReconcilePolicy,
        sink: &mut dyn SampleSink,
    ) -> Result<ReadingOutcome, RegistryError> {
        let transmitter = self
            .transmitters
            .get_mut(&reading.source_id)
            .ok_or(RegistryError::UnknownTransmitter(reading.source_id))?;
        transmitter.apply(reading, policy, sink)
    }

    /// Human-readable table of every sensor
    pub fn summary(&self) -> String {
        let mut lines = vec![summary_header()];
        lines.extend(self.iter().flat_map(|t| t.summary()));
        lines.join("\n")
    }
}

impl FromIterator<Transmitter> for Registry {
    fn from_iter<I: IntoIterator<Item = Transmitter>>(iter: I) -> Self {
        Self {
            transmitters: iter.into_iter().map(|t| (t.id(), t)).collect(),
        }
    }
}

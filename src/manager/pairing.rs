// Pairing - Handshake with new transmitters
//
// The bridge has no "refuse" primitive. A TRX is refused by pairing and
// immediately deleting it; a TX keeps no pairing state.

use crate::event::{Reading, TransmitterKind};
use crate::link::Link;
use crate::manager::{Manager, ManagerError};
use crate::protocol::{Command, ProtocolError};
use crate::registry::valid_ports;
use crate::sink::SampleSink;
use tracing::{debug, info, warn};

impl<L: Link, S: SampleSink> Manager<L, S> {
    /// Reads of one line timeout that fit in `millis`
    fn read_budget(&self, millis: u64) -> u64 {
        let per_read = self.bridge.driver().config().line_timeout_ms.max(1);
        millis.div_ceil(per_read).max(1)
    }

    /// Pair with `id` and register it with sensors on `ports`.
    ///
    /// The registry entry is tentative until the bridge acknowledges the
    /// pairing; on failure it is discarded and nothing is persisted.
    pub fn accept_pair_request(&mut self, id: u32, kind: TransmitterKind, ports: &[u8]) -> Result<(), ManagerError> {
        self.registry.add(id, kind, ports)?;
        info!(tx_id = id, kind = %kind, "Pairing");

        let result = self
            .bridge
            .send_with(Command::Pair, id)
            .map_err(ManagerError::from)
            .and_then(|()| self.await_pair_ack(id));
        if let Err(e) = result {
            warn!(tx_id = id, error = %e, "Pairing failed, discarding transmitter");
            self.registry.remove(id)?;
            return Err(e);
        }

        info!(tx_id = id, "Pairing acknowledged");
        self.persist()
    }

    /// Wait for the bridge to confirm pairing with `id`
    fn await_pair_ack(&mut self, id: u32) -> Result<(), ManagerError> {
        let deadline = self.bridge.now() + self.config.pairing_deadline_ms as f64 / 1000.0;
        let mut reads = self.read_budget(self.config.pairing_deadline_ms);

        while reads > 0 && self.bridge.now() < deadline {
            reads -= 1;
            if self.cancel.is_cancelled() {
                return Err(ProtocolError::Cancelled.into());
            }
            let reading = match self.bridge.read_event(0) {
                Ok(Some(reading)) => reading,
                Ok(None) | Err(ProtocolError::TooManyRetries(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            if reading.source_id != id {
                debug!(expected = id, got = reading.source_id, "Ignoring message from another transmitter while pairing");
                continue;
            }
            if reading.is_pairing_ack() {
                return Ok(());
            }
            return Err(ManagerError::PairingFailed {
                id,
                reason: format!("expected pairing acknowledgement, got {:?}", reading.kind),
            });
        }

        Err(ManagerError::PairingFailed {
            id,
            reason: "no acknowledgement before the deadline".to_string(),
        })
    }

    /// Refuse a pairing request
    pub fn reject_pair_request(&mut self, id: u32, kind: TransmitterKind) -> Result<(), ManagerError> {
        match kind {
            TransmitterKind::Tx => {
                debug!(tx_id = id, "Ignoring TX pairing request");
            }
            TransmitterKind::Trx => {
                info!(tx_id = id, "Refusing TRX pairing request");
                self.bridge.send_with(Command::Pair, id)?;
                self.bridge.send_with(Command::DeleteTrx, id)?;
            }
        }
        Ok(())
    }

    /// Listen for a transmitter that is not yet registered.
    ///
    /// Pairing requests, and in promiscuous mode plain samples, from unknown
    /// ids are offered to `decide`. The first accepted one is registered and
    /// its id returned. Pairing requests from known ids are ignored.
    pub fn listen_for_new_transmitter<F>(&mut self, mut decide: F) -> Result<Option<u32>, ManagerError>
    where
        F: FnMut(&Reading) -> bool,
    {
        let promiscuous = !self.bridge.config().known_only;
        let mut reads = self.read_budget(self.config.listen_window_secs * 1000);
        let deadline = self.bridge.now() + self.config.listen_window_secs as f64;
        info!(window_secs = self.config.listen_window_secs, promiscuous, "Listening for new transmitters");

        while reads > 0 && self.bridge.now() < deadline {
            reads -= 1;
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let reading = match self.bridge.read_event(0) {
                Ok(Some(reading)) => reading,
                Ok(None) | Err(ProtocolError::TooManyRetries(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let pair_request = reading.is_pairing_request();
            if !pair_request && !(promiscuous && reading.is_sample()) {
                continue;
            }
            let id = reading.source_id;
            let kind = reading.source_kind;

            if self.registry.contains(id) {
                if pair_request {
                    info!(tx_id = id, "Ignoring pairing request from a known transmitter");
                }
                continue;
            }

            if !decide(&reading) {
                if pair_request {
                    self.reject_pair_request(id, kind)?;
                }
                continue;
            }

            let ports = detected_ports(&reading);
            if pair_request {
                self.accept_pair_request(id, kind, &ports)?;
            } else {
                self.add_transmitter(id, kind, &ports)?;
            }
            return Ok(Some(id));
        }

        info!("No new transmitter heard");
        Ok(None)
    }
}

/// Sensor ports a transmitter reported, port 1 if it reported none
pub fn detected_ports(reading: &Reading) -> Vec<u8> {
    let valid = valid_ports(reading.source_kind);
    let ports: Vec<u8> = reading
        .sensor_values
        .keys()
        .copied()
        .filter(|port| valid.contains(port))
        .collect();
    if ports.is_empty() {
        vec![valid[0]]
    } else {
        ports
    }
}

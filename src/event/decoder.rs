// Decoder - Event line to typed Event
//
// Wire format, one JSON object per line:
//   {"id": 5, "type": "trx", "t": 12345, "sensors": {"1": 150}, "state": 1,
//    "reply_to_poll": 0}
//   {"pr": {"id": 5, "type": "trx", "sensors": {"1": 0}}}   pairing request
//   {"pw": {"id": 5, "type": "trx"}}                          pairing ack

use crate::event::{PowerState, Reading, ReadingKind, TransmitterKind};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: Option<u32>,
    #[serde(rename = "type")]
    kind: Option<String>,
    t: Option<u32>,
    #[serde(default)]
    sensors: BTreeMap<String, Value>,
    state: Option<u64>,
    reply_to_poll: Option<u64>,
    pr: Option<Box<WireEvent>>,
    pw: Option<WirePairAck>,
}

#[derive(Debug, Deserialize)]
struct WirePairAck {
    id: u32,
    #[serde(rename = "type")]
    kind: String,
}

/// A decoded event line, not yet placed in wall-clock time
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PairAck {
        id: u32,
        kind: TransmitterKind,
    },
    PairRequest {
        id: u32,
        kind: TransmitterKind,
        sensors: BTreeMap<u8, u32>,
    },
    Sample {
        id: u32,
        kind: TransmitterKind,
        counter: u32,
        sensors: BTreeMap<u8, u32>,
        state: Option<PowerState>,
        reply_to_poll: Option<bool>,
    },
}

impl Event {
    pub fn id(&self) -> u32 {
        match self {
            Self::PairAck { id, .. } | Self::PairRequest { id, .. } | Self::Sample { id, .. } => *id,
        }
    }

    /// Bridge counter, only carried by samples
    pub fn counter(&self) -> Option<u32> {
        match self {
            Self::Sample { counter, .. } => Some(*counter),
            _ => None,
        }
    }

    /// Place the event at `timecode`
    pub fn into_reading(self, timecode: i64) -> Reading {
        match self {
            Self::PairAck { id, kind } => {
                Reading::sample(id, kind, timecode).with_kind(ReadingKind::PairingAck)
            }
            Self::PairRequest { id, kind, sensors } => {
                let mut reading =
                    Reading::sample(id, kind, timecode).with_kind(ReadingKind::PairingRequest);
                reading.sensor_values = sensors;
                reading
            }
            Self::Sample {
                id,
                kind,
                sensors,
                state,
                reply_to_poll,
                ..
            } => {
                let mut reading = Reading::sample(id, kind, timecode);
                reading.sensor_values = sensors;
                reading.reported_state = state;
                reading.reply_to_poll = reply_to_poll;
                reading
            }
        }
    }
}

/// Decode one line from the bridge.
///
/// Returns `None` for anything that is not a well-formed event.
pub fn decode(line: &str) -> Option<Event> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    let wire: WireEvent = match serde_json::from_str(line) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(line = %line, error = %e, "Dropping malformed event line");
            return None;
        }
    };

    if let Some(ack) = wire.pw {
        let kind = parse_kind(&ack.kind)?;
        return Some(Event::PairAck { id: ack.id, kind });
    }

    if let Some(inner) = wire.pr {
        let (Some(id), Some(kind)) = (inner.id, inner.kind.as_deref()) else {
            warn!(line = %line, "Pairing request without id or type");
            return None;
        };
        return Some(Event::PairRequest {
            id,
            kind: parse_kind(kind)?,
            sensors: parse_sensors(&inner.sensors),
        });
    }

    let (Some(id), Some(kind), Some(counter)) = (wire.id, wire.kind.as_deref(), wire.t) else {
        warn!(line = %line, "Event without id, type or time");
        return None;
    };
    Some(Event::Sample {
        id,
        kind: parse_kind(kind)?,
        counter,
        sensors: parse_sensors(&wire.sensors),
        state: wire.state.map(PowerState::from_flag),
        reply_to_poll: wire.reply_to_poll.map(|flag| flag != 0),
    })
}

fn parse_kind(kind: &str) -> Option<TransmitterKind> {
    match kind.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            warn!(error = %e, "Dropping event");
            None
        }
    }
}

fn parse_sensors(raw: &BTreeMap<String, Value>) -> BTreeMap<u8, u32> {
    let mut sensors = BTreeMap::new();
    for (port, value) in raw {
        let Ok(port) = port.trim().parse::<u8>() else {
            debug!(port = %port, "Ignoring non-numeric sensor port");
            continue;
        };
        let watts = match value {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64().filter(|w| *w >= 0.0).map(|w| w.round() as u64)
            }),
            _ => None,
        };
        match watts {
            Some(watts) => {
                sensors.insert(port, watts.min(u32::MAX as u64) as u32);
            }
            None => debug!(port, value = %value, "Ignoring unusable sensor value"),
        }
    }
    sensors
}

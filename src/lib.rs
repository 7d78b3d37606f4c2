// ecologger - EcoManager transmitter logger
//
// Talks to a microcontroller radio bridge over a serial line, keeps a
// registry of known transmitters and records their power readings.
//
// Layering, leaf first:
// - link:     byte/line connection to the bridge
// - protocol: command/ACK/NAK exchange, restart detection, raw event lines
// - clock:    bridge counter to wall-clock offset estimation
// - event:    event line decoding into typed readings
// - bridge:   driver + clock + decoder glued into a reading source
// - registry: transmitters, sensors and the on/off reconciliation policy
// - storage:  durable registry persistence
// - sink:     time-series and labels output
// - manager:  run loop, restart recovery and pairing

pub mod bridge;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod event;
pub mod link;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod sink;
pub mod storage;

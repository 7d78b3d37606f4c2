// Event module - WHAT THE BRIDGE HEARD
// Decoding of event lines into typed readings

mod decoder;
mod model;

pub use decoder::{decode, Event};
pub use model::{PowerState, Reading, ReadingKind, TransmitterKind};

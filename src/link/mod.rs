// Link module - THE WIRE
// Line-oriented connection to the bridge: real serial port or a scripted simulation

mod serial;
mod sim;
mod traits;

pub use traits::{Link, LinkConfig, LinkError, LinkState, LinkStats};

pub use serial::SerialLink;

pub use sim::{Responder, SimLink};

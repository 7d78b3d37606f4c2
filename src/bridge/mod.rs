// Bridge module - THE SESSION
// Driver, clock sync and decoder composed into a single reading source

mod session;

pub use session::{Bridge, BridgeConfig};

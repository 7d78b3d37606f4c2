// Protocol module - HOW WE TALK TO THE BRIDGE
// Command codes, line classification, restart detection and the command/ACK driver

mod command;
mod driver;
mod error;
mod line;

pub use command::Command;
pub use driver::{Driver, DriverConfig, DriverState, DriverStats, ExchangeOutcome, TimeSample};
pub use error::ProtocolError;
pub use line::{classify, parse_counter, LineClass, STARTUP_BANNER};

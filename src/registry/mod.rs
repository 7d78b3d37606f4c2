// Registry module - KNOWN TRANSMITTERS
// Sensors, the TX/TRX state machine and the registry that owns them

mod error;
#[allow(clippy::module_inception)]
mod registry;
mod sensor;
mod transmitter;

pub use error::RegistryError;
pub use registry::Registry;
pub use sensor::{
    is_aggregate_name, SampleOutcome, Sensor, MAX_AGGREGATE_WATTS, MAX_APPLIANCE_WATTS,
    MIN_SAMPLE_PERIOD,
};
pub use transmitter::{
    summary_header, valid_ports, ReadingOutcome, ReconcilePolicy, StateDecision, Transmitter,
    TransitionCause, TrxUnit, TxUnit, TRX_PORT, TX_PORTS,
};

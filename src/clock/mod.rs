// Clock module - TIME
// Wall-clock sources and bridge counter synchronisation

mod sync;
mod wall;

pub use sync::{ClockConfig, ClockState, ClockStats, ClockSync, Verdict};
pub use wall::{ManualClock, SystemClock, WallClock};

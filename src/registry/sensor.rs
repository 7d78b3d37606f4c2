// Sensor - One measurement input on a transmitter, mapped to a log channel

use crate::event::PowerState;
use crate::sink::{SampleRecord, SampleSink, SinkError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Highest plausible reading for a whole-house sensor, in watts
pub const MAX_AGGREGATE_WATTS: u32 = 20_000;

/// Highest plausible reading for a single appliance, in watts
pub const MAX_APPLIANCE_WATTS: u32 = 4_000;

/// Minimum seconds between two recorded samples on one sensor
pub const MIN_SAMPLE_PERIOD: i64 = 3;

const AGGREGATE_NAMES: [&str; 7] = [
    "agg",
    "aggregate",
    "mains",
    "whole_house",
    "whole house",
    "wholehouse",
    "whole-house",
];

/// Whether a sensor name denotes a whole-house feed
pub fn is_aggregate_name(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    AGGREGATE_NAMES.contains(&name.as_str())
}

/// What happened to one sample offered to a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Recorded,
    /// Channel 0 means do not log
    ChannelDisabled,
    OverCeiling { ceiling: u32 },
    TooSoon,
}

impl SampleOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    name: String,
    log_channel: u32,
    is_aggregate: bool,
    #[serde(skip)]
    last_logged_time: Option<i64>,
}

impl Sensor {
    /// Create an unnamed, non-aggregate sensor logging to `log_channel`
    pub fn new(log_channel: u32) -> Self {
        Self {
            name: String::new(),
            log_channel,
            is_aggregate: false,
            last_logged_time: None,
        }
    }

    /// Builder form of [`Sensor::set_name`]
    pub fn with_name(mut self, name: &str) -> Self {
        self.set_name(name);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename; a whole-house name also marks the sensor aggregate
    pub fn set_name(&mut self, name: &str) {
        self.name = name.trim().to_string();
        if is_aggregate_name(&self.name) {
            self.is_aggregate = true;
        }
    }

    pub fn log_channel(&self) -> u32 {
        self.log_channel
    }

    pub fn set_log_channel(&mut self, channel: u32) {
        self.log_channel = channel;
    }

    pub fn is_aggregate(&self) -> bool {
        self.is_aggregate
    }

    pub fn set_aggregate(&mut self, aggregate: bool) {
        self.is_aggregate = aggregate;
    }

    pub fn last_logged_time(&self) -> Option<i64> {
        self.last_logged_time
    }

    /// Plausibility ceiling for this sensor
    pub fn ceiling(&self) -> u32 {
        if self.is_aggregate {
            MAX_AGGREGATE_WATTS
        } else {
            MAX_APPLIANCE_WATTS
        }
    }

    /// Filter a sample and record it if it passes
    pub fn log_sample(
        &mut self,
        timecode: i64,
        watts: u32,
        state: Option<PowerState>,
        sink: &mut dyn SampleSink,
    ) -> Result<SampleOutcome, SinkError> {
        if self.log_channel == 0 {
            return Ok(SampleOutcome::ChannelDisabled);
        }

        let ceiling = self.ceiling();
        if watts > ceiling {
            warn!(
                channel = self.log_channel,
                watts, ceiling, "Reading above plausible maximum, discarding"
            );
            return Ok(SampleOutcome::OverCeiling { ceiling });
        }

        if let Some(last) = self.last_logged_time {
            if last > timecode - MIN_SAMPLE_PERIOD {
                debug!(
                    channel = self.log_channel,
                    last, timecode, "Sample too close to previous, discarding"
                );
                return Ok(SampleOutcome::TooSoon);
            }
        }

        sink.record(
            self.log_channel,
            &SampleRecord {
                timecode,
                watts,
                state,
            },
        )?;
        self.last_logged_time = Some(timecode);
        Ok(SampleOutcome::Recorded)
    }
}

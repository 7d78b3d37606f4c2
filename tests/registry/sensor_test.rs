// Sensor Tests
// Tests for the plausibility ceiling, minimum period and channel 0

use ecologger::event::PowerState;
use ecologger::registry::{
    is_aggregate_name, SampleOutcome, Sensor, MAX_AGGREGATE_WATTS, MAX_APPLIANCE_WATTS,
};
use ecologger::sink::{MemorySink, SampleRecord};

// ============================================================================
// CEILING
// ============================================================================

#[test]
fn test_implausible_reading_discarded() {
    let mut sink = MemorySink::new();
    let mut appliance = Sensor::new(1);
    let mut mains = Sensor::new(2).with_name("mains");

    assert_eq!(
        appliance.log_sample(100, 25_000, None, &mut sink).unwrap(),
        SampleOutcome::OverCeiling { ceiling: MAX_APPLIANCE_WATTS }
    );
    assert_eq!(
        mains.log_sample(100, 25_000, None, &mut sink).unwrap(),
        SampleOutcome::OverCeiling { ceiling: MAX_AGGREGATE_WATTS }
    );
    assert!(sink.records().is_empty());
    assert_eq!(appliance.last_logged_time(), None);
}

#[test]
fn test_appliance_ceiling_inclusive() {
    let mut sink = MemorySink::new();
    let mut sensor = Sensor::new(1);

    assert!(sensor.log_sample(100, 3_000, None, &mut sink).unwrap().is_recorded());
    assert!(sensor.log_sample(200, 4_000, None, &mut sink).unwrap().is_recorded());
    assert!(!sensor.log_sample(300, 4_001, None, &mut sink).unwrap().is_recorded());
    assert_eq!(sink.channel(1).len(), 2);
}

#[test]
fn test_aggregate_accepts_large_readings() {
    let mut sink = MemorySink::new();
    let mut sensor = Sensor::new(1);
    sensor.set_aggregate(true);

    assert!(sensor.log_sample(100, 12_000, None, &mut sink).unwrap().is_recorded());
    assert_eq!(sensor.ceiling(), MAX_AGGREGATE_WATTS);
}

// ============================================================================
// CHANNEL AND PERIOD
// ============================================================================

#[test]
fn test_channel_zero_not_recorded() {
    let mut sink = MemorySink::new();
    let mut sensor = Sensor::new(0);

    assert_eq!(
        sensor.log_sample(100, 50, None, &mut sink).unwrap(),
        SampleOutcome::ChannelDisabled
    );
    assert!(sink.records().is_empty());
}

#[test]
fn test_minimum_sample_period() {
    let mut sink = MemorySink::new();
    let mut sensor = Sensor::new(1);

    sensor.log_sample(100, 50, None, &mut sink).unwrap();
    assert_eq!(
        sensor.log_sample(102, 50, None, &mut sink).unwrap(),
        SampleOutcome::TooSoon
    );
    assert_eq!(
        sensor.log_sample(103, 60, None, &mut sink).unwrap(),
        SampleOutcome::Recorded
    );
    assert_eq!(sensor.last_logged_time(), Some(103));
}

#[test]
fn test_replayed_sample_recorded_once() {
    let mut sink = MemorySink::new();
    let mut sensor = Sensor::new(4);

    sensor.log_sample(500, 75, None, &mut sink).unwrap();
    sensor.log_sample(500, 75, None, &mut sink).unwrap();

    assert_eq!(
        sink.channel(4),
        vec![SampleRecord { timecode: 500, watts: 75, state: None }]
    );
}

#[test]
fn test_state_carried_into_record() {
    let mut sink = MemorySink::new();
    let mut sensor = Sensor::new(7);

    sensor.log_sample(10, 0, Some(PowerState::Off), &mut sink).unwrap();
    assert_eq!(sink.channel(7)[0].state, Some(PowerState::Off));
    assert_eq!(sink.channel(7)[0].to_string(), "10 0 0");
}

// ============================================================================
// NAMES
// ============================================================================

#[test]
fn test_whole_house_names() {
    for name in ["agg", "Aggregate", "MAINS", "whole_house", "whole house", "wholehouse", "whole-house"] {
        assert!(is_aggregate_name(name), "{}", name);
    }
    assert!(!is_aggregate_name("fridge"));
    assert!(!is_aggregate_name(""));
}

#[test]
fn test_set_name_trims() {
    let sensor = Sensor::new(1).with_name("  kettle ");
    assert_eq!(sensor.name(), "kettle");
    assert!(!sensor.is_aggregate());
}

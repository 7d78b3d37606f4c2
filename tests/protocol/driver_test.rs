// Protocol Driver Tests
// Tests for the command/ACK exchange, restart detection and the data path

use ecologger::cancel::CancelToken;
use ecologger::clock::ManualClock;
use ecologger::link::{Link, LinkError, Responder, SimLink};
use ecologger::protocol::{
    Command, Driver, DriverConfig, DriverState, ExchangeOutcome, ProtocolError, STARTUP_BANNER,
};

fn driver(link: SimLink) -> Driver<SimLink> {
    Driver::new(link, DriverConfig::default(), CancelToken::new())
}

// ============================================================================
// DRIVER CONFIG
// ============================================================================

#[test]
fn test_driver_config_defaults() {
    let config = DriverConfig::default();
    assert_eq!(config.control_retries, 5);
    assert_eq!(config.data_retries, 20);
    assert!(config.startup_line_timeout() > config.line_timeout());
    assert!(config.validate().is_ok());
}

#[test]
fn test_driver_config_rejects_zero_retries() {
    assert!(DriverConfig::new().with_control_retries(0).validate().is_err());
}

// ============================================================================
// COMMAND EXCHANGE
// ============================================================================

#[test]
fn test_command_acked() {
    let mut driver = driver(SimLink::new());

    assert_eq!(driver.send(Command::ManualPairing), Ok(()));
    assert_eq!(driver.state(), DriverState::Idle);
    assert_eq!(driver.last_outcome(), Some(ExchangeOutcome::Acked));
    assert_eq!(driver.link().writes(), &["m"]);
}

#[test]
fn test_every_command_acked_by_echoing_bridge() {
    let mut driver = driver(SimLink::new());

    for code in ['v', 'm', 'k', 'u', 'n', 'N', 'r', 'R', 'd', 'D', 's', 'S', 'p', '0', '1'] {
        let command = Command::from_code(code).unwrap();
        let result = if command.takes_param() {
            driver.send_with(command, 123456)
        } else {
            driver.send(command)
        };
        assert_eq!(result, Ok(()), "command {}", code);
    }
}

#[test]
fn test_parameter_written_after_code() {
    let mut driver = driver(SimLink::new());

    driver.send_with(Command::AddTrx, 4242).unwrap();
    assert_eq!(driver.link().writes(), &["N", "4242\r"]);
    assert_eq!(driver.stats().acks, 2);
}

#[test]
fn test_command_nakked() {
    let mut driver = driver(SimLink::new().with_responder(Responder::Nak));

    let result = driver.send(Command::KnownOnly);
    assert!(matches!(result, Err(ProtocolError::Rejected(_))));
    assert_eq!(driver.last_outcome(), Some(ExchangeOutcome::Nakked));
    assert_eq!(driver.state(), DriverState::Idle);
}

#[test]
fn test_nak_detail_preserved() {
    let mut link = SimLink::new();
    link.reply_once_with(&["NAK unknown id"]);
    let mut driver = driver(link);

    assert_eq!(
        driver.send_with(Command::DeleteTx, 5),
        Err(ProtocolError::Rejected("unknown id".to_string()))
    );
}

#[test]
fn test_nak_after_parameter() {
    let mut link = SimLink::new();
    link.reply_once_with(&["ACK"]);
    link.reply_once_with(&["17", "NAK"]);
    let mut driver = driver(link);

    assert!(matches!(
        driver.send_with(Command::Pair, 17),
        Err(ProtocolError::Rejected(_))
    ));
}

#[test]
fn test_echo_mismatch() {
    let mut link = SimLink::new();
    link.reply_once_with(&["ACK"]);
    link.reply_once_with(&["124", "ACK"]);
    let mut driver = driver(link);

    assert_eq!(
        driver.send_with(Command::AddTx, 123),
        Err(ProtocolError::EchoMismatch {
            expected: "123".to_string(),
            received: "124".to_string(),
        })
    );
}

#[test]
fn test_silent_bridge_exhausts_retries() {
    let mut driver = driver(SimLink::new().with_responder(Responder::Silent));

    assert_eq!(
        driver.send(Command::ManualPairing),
        Err(ProtocolError::TooManyRetries(5))
    );
    assert_eq!(driver.last_outcome(), Some(ExchangeOutcome::RetriesExhausted));
    assert_eq!(driver.link().stats().read_timeouts, 5);
}

#[test]
fn test_events_discarded_while_awaiting_ack() {
    let mut link = SimLink::new();
    link.reply_once_with(&["{\"id\":1,\"type\":\"tx\",\"t\":5,\"sensors\":{\"1\":10}}", "", "ACK"]);
    let mut driver = driver(link);

    assert_eq!(driver.send(Command::KnownOnly), Ok(()));
    assert_eq!(driver.stats().event_lines, 1);
}

#[test]
fn test_input_flushed_before_command() {
    let mut driver = driver(SimLink::new());
    driver.send(Command::KnownOnly).unwrap();
    driver.send(Command::Promiscuous).unwrap();
    assert_eq!(driver.link().flush_count(), 2);
}

#[test]
fn test_cancelled_command() {
    let cancel = CancelToken::new();
    let mut driver = Driver::new(SimLink::new(), DriverConfig::default(), cancel.clone());
    cancel.cancel();

    assert_eq!(driver.send(Command::ManualPairing), Err(ProtocolError::Cancelled));
}

#[test]
fn test_link_failure_surfaces() {
    let mut link = SimLink::new();
    link.set_disconnected(true);
    let mut driver = driver(link);

    let err = driver.send(Command::ManualPairing).unwrap_err();
    assert!(matches!(err, ProtocolError::Link(LinkError::NotOpen)));
    assert!(err.needs_reopen());
}

// ============================================================================
// RESTART DETECTION
// ============================================================================

#[test]
fn test_startup_banner_raises_restarted_once() {
    let mut link = SimLink::new();
    link.reply_once_with(&STARTUP_BANNER);
    let mut driver = driver(link);

    assert_eq!(driver.send(Command::ManualPairing), Err(ProtocolError::Restarted));
    assert_eq!(driver.last_outcome(), Some(ExchangeOutcome::Restarted));
    assert_eq!(driver.stats().restarts, 1);

    // The banner was consumed; the next exchange is normal
    assert_eq!(driver.send(Command::ManualPairing), Ok(()));
    assert_eq!(driver.stats().restarts, 1);
    assert_eq!(driver.link().pending_lines(), 0);
}

#[test]
fn test_banner_seen_mid_sequence() {
    let mut link = SimLink::new();
    link.reply_once_with(&STARTUP_BANNER[2..]);
    let mut driver = driver(link);

    assert!(driver.send(Command::KnownOnly).unwrap_err().is_restart());
    assert_eq!(driver.link().pending_lines(), 0);
    assert_eq!(driver.link().stats().reopens, 0);
}

#[test]
fn test_truncated_banner_reopens_link() {
    let mut link = SimLink::new();
    link.reply_once_with(&STARTUP_BANNER[..2]);
    let mut driver = driver(link);

    assert_eq!(driver.send(Command::KnownOnly), Err(ProtocolError::Restarted));
    assert_eq!(driver.link().stats().reopens, 1);
}

#[test]
fn test_banner_on_data_path() {
    let mut link = SimLink::new();
    link.push_lines(&STARTUP_BANNER);
    let mut driver = driver(link);

    assert_eq!(driver.read_event_line(3), Err(ProtocolError::Restarted));
    assert_eq!(driver.read_event_line(0), Err(ProtocolError::TooManyRetries(0)));
}

// ============================================================================
// DATA PATH
// ============================================================================

#[test]
fn test_read_event_line() {
    let mut link = SimLink::new();
    link.push_timeout();
    link.push_line("");
    link.push_line("{\"id\":3}");
    let mut driver = driver(link);

    assert_eq!(driver.read_event_line(5), Ok(Some("{\"id\":3}".to_string())));
    assert_eq!(driver.stats().event_lines, 1);
}

#[test]
fn test_read_event_line_non_event_text() {
    let mut link = SimLink::new();
    link.push_line("debug: radio idle");
    let mut driver = driver(link);

    assert_eq!(driver.read_event_line(5), Ok(None));
}

#[test]
fn test_read_event_line_budget() {
    let mut link = SimLink::new();
    for _ in 0..4 {
        link.push_timeout();
    }
    link.push_line("{\"id\":3}");
    let mut driver = driver(link);

    // Three retries means four reads, all of which time out
    assert_eq!(driver.read_event_line(3), Err(ProtocolError::TooManyRetries(3)));
    assert_eq!(driver.read_event_line(0), Ok(Some("{\"id\":3}".to_string())));
}

#[test]
fn test_read_event_line_cancelled() {
    let cancel = CancelToken::new();
    let mut link = SimLink::new();
    link.push_line("{\"id\":3}");
    let mut driver = Driver::new(link, DriverConfig::default(), cancel.clone());
    cancel.cancel();

    assert_eq!(driver.read_event_line(5), Ok(None));
    assert_eq!(driver.link().pending_lines(), 1);
}

#[test]
fn test_deferred_lines_come_first() {
    let mut link = SimLink::new();
    link.push_line("{\"id\":2}");
    let mut driver = driver(link);

    driver.defer("{\"id\":1}".to_string());
    assert_eq!(driver.deferred_len(), 1);
    assert_eq!(driver.read_event_line(0), Ok(Some("{\"id\":1}".to_string())));
    assert_eq!(driver.read_event_line(0), Ok(Some("{\"id\":2}".to_string())));
    assert_eq!(driver.deferred_len(), 0);
}

#[test]
fn test_deferred_lines_survive_restart() {
    let mut link = SimLink::new();
    link.reply_once_with(&STARTUP_BANNER);
    let mut driver = driver(link);

    driver.defer("{\"id\":1}".to_string());
    assert_eq!(driver.send(Command::ManualPairing), Err(ProtocolError::Restarted));
    assert_eq!(driver.read_event_line(0), Ok(Some("{\"id\":1}".to_string())));
}

// ============================================================================
// TIME QUERY
// ============================================================================

#[test]
fn test_query_time() {
    let clock = ManualClock::new(500.0);
    let mut driver = driver(SimLink::new().with_time_replies([123_456]));

    let sample = driver.query_time(&clock, 0.015, 3).unwrap();
    assert_eq!(sample.counter, 123_456);
    assert_eq!(sample.start, 500.0);
    assert_eq!(sample.latency(), 0.0);
    assert_eq!(driver.link().commands(), vec!["t"]);
}

#[test]
fn test_query_time_data_waiting() {
    let clock = ManualClock::new(500.0);
    let mut link = SimLink::new();
    let event = "{\"id\":9,\"type\":\"tx\",\"t\":99,\"sensors\":{\"1\":40}}";
    link.push_time_reply(event);
    let mut driver = driver(link);

    assert_eq!(
        driver.query_time(&clock, 0.015, 3),
        Err(ProtocolError::DataWaiting(event.to_string()))
    );
}

#[test]
fn test_query_time_unanswered() {
    let clock = ManualClock::new(500.0);
    let mut driver = driver(SimLink::new());

    assert_eq!(
        driver.query_time(&clock, 0.015, 2),
        Err(ProtocolError::TooManyRetries(2))
    );
    assert_eq!(driver.link().commands(), vec!["t", "t", "t"]);
}

#[test]
fn test_reopen_resets_link() {
    let mut link = SimLink::new();
    link.set_disconnected(true);
    let mut driver = driver(link);

    driver.reopen().unwrap();
    assert!(driver.link().state().is_open());
    assert_eq!(driver.send(Command::KnownOnly), Ok(()));
}

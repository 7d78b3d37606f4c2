// Manager Tests
// Tests for the logging loop, recovery, pairing and registry editing

use ecologger::bridge::{Bridge, BridgeConfig};
use ecologger::cancel::CancelToken;
use ecologger::clock::{ClockConfig, ClockSync, ManualClock};
use ecologger::event::{PowerState, Reading, ReadingKind, TransmitterKind};
use ecologger::link::{Responder, SimLink};
use ecologger::manager::{detected_ports, Manager, ManagerConfig, ManagerError};
use ecologger::protocol::{Driver, DriverConfig, ProtocolError, STARTUP_BANNER};
use ecologger::registry::{ReconcilePolicy, Registry, RegistryError};
use ecologger::sink::{MemorySink, SampleRecord};
use ecologger::storage::RegistryStore;
use std::path::Path;
use tempfile::TempDir;

type TestManager = Manager<SimLink, MemorySink>;

const START: f64 = 1_000_000.0;

fn config() -> ManagerConfig {
    ManagerConfig::new().with_reopen_backoff_ms(0)
}

fn trx_registry(id: u32) -> Registry {
    let mut registry = Registry::new();
    registry.add(id, TransmitterKind::Trx, &[]).unwrap();
    registry
}

fn setup(registry: Registry, config: ManagerConfig, dir: &Path) -> TestManager {
    let store = RegistryStore::open(dir).unwrap();
    store.save_registry(&registry).unwrap();

    let link = SimLink::new().with_fallback_counter(10_000);
    let sync = ClockSync::new(ClockConfig::default(), Box::new(ManualClock::new(START)));
    let driver = Driver::new(link, DriverConfig::default(), CancelToken::new());
    let bridge = Bridge::connect(driver, sync, BridgeConfig::default()).unwrap();

    let mut manager =
        Manager::new(bridge, store, MemorySink::new(), ReconcilePolicy::default(), config).unwrap();
    manager.bridge_mut().link_mut().clear_writes();
    manager
}

fn link(manager: &mut TestManager) -> &mut SimLink {
    manager.bridge_mut().link_mut()
}

/// Stop the run loop once every scripted line has been read
fn stop_when_drained(manager: &mut TestManager) {
    let token = manager.bridge().driver().cancel_token().clone();
    link(manager).cancel_when_drained(token);
}

fn writes(manager: &TestManager) -> Vec<String> {
    manager.bridge().link().writes().to_vec()
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_manager_config_defaults() {
    let config = ManagerConfig::default();
    assert_eq!(config.pairing_deadline_ms, 5_000);
    assert_eq!(config.max_reopen_failures, 5);
    assert!(config.validate().is_ok());
    assert!(ManagerConfig::new().with_max_reopen_failures(0).validate().is_err());
}

#[test]
fn test_configure_bridge_replays_registry() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = Registry::new();
    registry.add(1, TransmitterKind::Tx, &[]).unwrap();
    registry.add(2, TransmitterKind::Trx, &[]).unwrap();
    let mut manager = setup(registry, config(), temp_dir.path());

    manager.configure_bridge().unwrap();
    assert_eq!(
        writes(&manager),
        vec!["d", "D", "s", "1\r", "S", "1\r", "n", "1\r", "N", "2\r"]
    );
}

#[test]
fn test_start_writes_labels() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = trx_registry(5);
    registry.rename_sensor(5, 1, "kettle").unwrap();
    let mut manager = setup(registry, config(), temp_dir.path());

    manager.start().unwrap();
    assert_eq!(manager.sink().labels(), &[(1, "kettle".to_string())]);
}

// ============================================================================
// LOGGING LOOP
// ============================================================================

#[test]
fn test_run_logs_sample() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).push_line(r#"{"id":5,"type":"trx","t":12345,"sensors":{"1":150},"state":1}"#);
    stop_when_drained(&mut manager);

    manager.run().unwrap();

    assert_eq!(
        manager.sink().channel(1),
        vec![SampleRecord { timecode: 1_000_002, watts: 150, state: None }]
    );
    let trx = manager.registry().get(5).unwrap().as_trx().unwrap();
    assert_eq!(trx.power_state(), Some(PowerState::On));
    assert_eq!(manager.stats().readings, 1);
}

#[test]
fn test_run_drops_unknown_transmitter() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).push_line(r#"{"id":99,"type":"tx","t":12345,"sensors":{"1":150}}"#);
    stop_when_drained(&mut manager);

    manager.run().unwrap();

    assert!(manager.sink().records().is_empty());
    assert_eq!(manager.stats().unknown_transmitter, 1);
}

#[test]
fn test_run_recovers_from_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).push_lines(&STARTUP_BANNER);
    stop_when_drained(&mut manager);

    manager.run().unwrap();

    assert_eq!(manager.stats().restarts, 1);
    assert_eq!(
        manager.bridge().link().commands(),
        vec!["v", "m", "k", "t", "t", "t", "d", "D", "S", "N"]
    );
}

#[test]
fn test_run_restores_repowered_trx() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).push_lines(&[
        r#"{"id":5,"type":"trx","t":12345,"sensors":{"1":150},"state":1}"#,
        r#"{"id":5,"type":"trx","t":72345,"sensors":{"1":0},"state":0}"#,
    ]);
    stop_when_drained(&mut manager);

    manager.run().unwrap();

    assert_eq!(writes(&manager), vec!["1", "5\r"]);
    assert_eq!(manager.stats().restores, 1);
    let trx = manager.registry().get(5).unwrap().as_trx().unwrap();
    assert_eq!(trx.power_state(), Some(PowerState::On));
}

#[test]
fn test_run_probes_silent_bridge() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    for _ in 0..21 {
        link(&mut manager).push_timeout();
    }
    link(&mut manager).push_time_reply(r#"{"id":5,"type":"trx","t":20000,"sensors":{"1":80}}"#);
    stop_when_drained(&mut manager);

    manager.run().unwrap();

    assert_eq!(manager.stats().probes, 1);
    assert_eq!(manager.stats().reopens, 0);
    assert_eq!(
        manager.sink().channel(1),
        vec![SampleRecord { timecode: 1_000_010, watts: 80, state: None }]
    );
}

#[test]
fn test_run_gives_up_on_dead_bridge() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).set_responder(Responder::Silent);

    let err = manager.run().unwrap_err();
    assert!(matches!(err, ManagerError::ReopenFailed { attempts: 5, .. }));
    assert_eq!(manager.stats().reopens, 5);
}

#[test]
fn test_run_gives_up_when_port_cannot_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).set_disconnected(true);
    link(&mut manager).set_reopen_fails(true);

    let err = manager.run().unwrap_err();
    assert!(matches!(err, ManagerError::ReopenFailed { attempts: 5, .. }));
}

#[test]
fn test_run_persists_state_on_exit() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).push_line(r#"{"id":5,"type":"trx","t":12345,"sensors":{"1":150},"state":1}"#);
    stop_when_drained(&mut manager);
    manager.run().unwrap();
    drop(manager);

    let store = RegistryStore::open(temp_dir.path()).unwrap();
    let registry = store.load_registry().unwrap();
    let trx = registry.get(5).unwrap().as_trx().unwrap();
    assert_eq!(trx.power_state(), Some(PowerState::On));
    assert_eq!(trx.time_of_last_packet(), Some(1_000_002));
}

// ============================================================================
// PAIRING
// ============================================================================

#[test]
fn test_accept_pair_request() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(Registry::new(), config(), temp_dir.path());
    link(&mut manager).push_lines(&[
        r#"{"pw":{"id":9,"type":"trx"}}"#,
        r#"{"pw":{"id":7,"type":"trx"}}"#,
    ]);

    manager.accept_pair_request(7, TransmitterKind::Trx, &[]).unwrap();

    assert_eq!(writes(&manager), vec!["p", "7\r"]);
    assert!(manager.registry().contains(7));
    assert!(!manager.registry().contains(9));
}

#[test]
fn test_pairing_timeout_discards_entry() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(Registry::new(), config(), temp_dir.path());

    let err = manager.accept_pair_request(7, TransmitterKind::Trx, &[]).unwrap_err();
    assert!(matches!(err, ManagerError::PairingFailed { id: 7, .. }));
    assert!(!manager.registry().contains(7));
    drop(manager);

    let store = RegistryStore::open(temp_dir.path()).unwrap();
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_pairing_fails_on_unexpected_message() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(Registry::new(), config(), temp_dir.path());
    link(&mut manager).push_line(r#"{"id":7,"type":"trx","t":11000,"sensors":{"1":5}}"#);

    let err = manager.accept_pair_request(7, TransmitterKind::Trx, &[]).unwrap_err();
    assert!(matches!(err, ManagerError::PairingFailed { id: 7, .. }));
    assert!(!manager.registry().contains(7));
}

#[test]
fn test_reject_pair_request() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(Registry::new(), config(), temp_dir.path());

    manager.reject_pair_request(8, TransmitterKind::Tx).unwrap();
    assert!(writes(&manager).is_empty());

    manager.reject_pair_request(7, TransmitterKind::Trx).unwrap();
    assert_eq!(writes(&manager), vec!["p", "7\r", "R", "7\r"]);
}

#[test]
fn test_listen_accepts_new_transmitter() {
    let temp_dir = TempDir::new().unwrap();
    let config = config().with_listen_window_secs(2);
    let mut manager = setup(Registry::new(), config, temp_dir.path());
    link(&mut manager).push_lines(&[
        r#"{"pr":{"id":7,"type":"trx","sensors":{"1":0}}}"#,
        r#"{"pw":{"id":7,"type":"trx"}}"#,
    ]);

    let mut offered = Vec::new();
    let paired = manager
        .listen_for_new_transmitter(|reading| {
            offered.push(reading.source_id);
            true
        })
        .unwrap();

    assert_eq!(paired, Some(7));
    assert_eq!(offered, vec![7]);
    assert_eq!(manager.registry().get(7).unwrap().kind(), TransmitterKind::Trx);
}

#[test]
fn test_listen_declined_request_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = config().with_listen_window_secs(2);
    let mut manager = setup(Registry::new(), config, temp_dir.path());
    link(&mut manager).push_line(r#"{"pr":{"id":7,"type":"trx","sensors":{"1":0}}}"#);

    let paired = manager.listen_for_new_transmitter(|_| false).unwrap();

    assert_eq!(paired, None);
    assert!(manager.registry().is_empty());
    assert_eq!(manager.bridge().link().commands(), vec!["p", "R"]);
}

#[test]
fn test_listen_ignores_known_transmitter() {
    let temp_dir = TempDir::new().unwrap();
    let config = config().with_listen_window_secs(2);
    let mut manager = setup(trx_registry(7), config, temp_dir.path());
    link(&mut manager).push_line(r#"{"pr":{"id":7,"type":"trx","sensors":{"1":0}}}"#);

    let paired = manager
        .listen_for_new_transmitter(|_| panic!("known transmitter offered"))
        .unwrap();

    assert_eq!(paired, None);
    assert!(writes(&manager).is_empty());
}

#[test]
fn test_listen_promiscuous_sample() {
    let temp_dir = TempDir::new().unwrap();
    let config = config().with_listen_window_secs(2);
    let mut manager = setup(Registry::new(), config, temp_dir.path());
    manager.set_receive_mode(false).unwrap();
    link(&mut manager).clear_writes();
    link(&mut manager).push_line(r#"{"id":12,"type":"tx","t":11000,"sensors":{"1":40,"2":10}}"#);

    let paired = manager.listen_for_new_transmitter(|_| true).unwrap();

    assert_eq!(paired, Some(12));
    assert_eq!(writes(&manager), vec!["n", "12\r"]);
    assert_eq!(manager.registry().get(12).unwrap().sensors().len(), 2);
}

#[test]
fn test_listen_tx_registers_reported_ports_only() {
    let temp_dir = TempDir::new().unwrap();
    let config = config().with_listen_window_secs(2);
    let mut manager = setup(Registry::new(), config, temp_dir.path());
    link(&mut manager).push_lines(&[
        r#"{"pr":{"id":21,"type":"tx","sensors":{"1":0}}}"#,
        r#"{"pw":{"id":21,"type":"tx"}}"#,
    ]);

    let paired = manager.listen_for_new_transmitter(|_| true).unwrap();

    assert_eq!(paired, Some(21));
    let tx = manager.registry().get(21).unwrap();
    assert_eq!(tx.sensors().len(), 1);
    assert!(tx.sensor(1).is_some());
    assert_eq!(manager.sink().labels().len(), 1);
}

#[test]
fn test_detected_ports() {
    let reading = Reading::sample(4, TransmitterKind::Tx, 0)
        .with_kind(ReadingKind::PairingRequest)
        .with_sensor(3, 0)
        .with_sensor(1, 0)
        .with_sensor(9, 0);
    assert_eq!(detected_ports(&reading), vec![1, 3]);

    let silent = Reading::sample(4, TransmitterKind::Tx, 0).with_kind(ReadingKind::PairingRequest);
    assert_eq!(detected_ports(&silent), vec![1]);
}

// ============================================================================
// REGISTRY EDITING
// ============================================================================

#[test]
fn test_edits_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(Registry::new(), config(), temp_dir.path());

    manager.add_transmitter(3, TransmitterKind::Tx, &[1, 2]).unwrap();
    manager.rename_sensor(3, 1, "mains").unwrap();
    manager.set_log_channel(3, 2, 7).unwrap();
    manager.set_aggregate(3, 2, true).unwrap();

    assert_eq!(writes(&manager), vec!["n", "3\r"]);
    assert_eq!(
        manager.sink().labels(),
        &[(1, "mains".to_string()), (7, String::new())]
    );
    let expected = manager.registry().clone();
    drop(manager);

    let store = RegistryStore::open(temp_dir.path()).unwrap();
    assert_eq!(store.load_registry().unwrap(), expected);
}

#[test]
fn test_add_rolled_back_when_bridge_refuses() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(Registry::new(), config(), temp_dir.path());
    link(&mut manager).reply_once_with(&["NAK"]);

    let err = manager.add_transmitter(3, TransmitterKind::Tx, &[]).unwrap_err();
    assert!(matches!(err, ManagerError::Protocol(ProtocolError::Rejected(_))));
    assert!(!manager.registry().contains(3));
}

#[test]
fn test_delete_transmitter() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());
    link(&mut manager).reply_once_with(&["NAK"]);

    // A bridge that has already forgotten the unit does not block deletion
    manager.delete_transmitter(5).unwrap();
    assert!(manager.registry().is_empty());
    assert_eq!(manager.bridge().link().commands(), vec!["R"]);

    assert!(matches!(
        manager.delete_transmitter(5),
        Err(ManagerError::Registry(RegistryError::UnknownTransmitter(5)))
    ));
}

#[test]
fn test_switch_trx() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = setup(trx_registry(5), config(), temp_dir.path());

    manager.switch(5, PowerState::Off).unwrap();

    assert_eq!(writes(&manager), vec!["0", "5\r"]);
    let trx = manager.registry().get(5).unwrap().as_trx().unwrap();
    assert_eq!(trx.power_state(), Some(PowerState::Off));
}

#[test]
fn test_switch_tx_refused() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = Registry::new();
    registry.add(3, TransmitterKind::Tx, &[]).unwrap();
    let mut manager = setup(registry, config(), temp_dir.path());

    assert!(matches!(
        manager.switch(3, PowerState::On),
        Err(ManagerError::Registry(RegistryError::NotSwitchable(3)))
    ));
    assert!(writes(&manager).is_empty());
}

#[test]
fn test_list() {
    let temp_dir = TempDir::new().unwrap();
    let manager = setup(trx_registry(5), config(), temp_dir.path());
    assert_eq!(manager.list().lines().count(), 2);
}

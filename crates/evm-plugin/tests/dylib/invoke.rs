//! Tests for calling handlers of a loaded artifact.

use std::fs;

use alloy_primitives::{address, b256, Address, B256};
use evm_plugin::{
    events,
    test_utils::{flag_record, test_config, RecordingStore},
    BlockHeader, DylibExtension, EventRecord, Extension, ExtensionError, HandlerStatus,
    PluginController, TransactionInfo, TxOutcome,
};

use crate::fixtures::ECHO;

const SENDER: Address = address!("0x00000000000000000000000000000000000000a1");
const CONTRACT: Address = address!("0x00000000000000000000000000000000000000c1");
const TX_HASH: B256 = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");

#[test]
fn test_payload_crosses_the_boundary_intact() {
    let extension = DylibExtension::open(&ECHO.artifact()).unwrap();
    let record = flag_record(events::TX_START);

    let reply = extension.invoke(events::TX_START, &record).unwrap();
    assert_eq!(reply.status, HandlerStatus::Continue);
    assert_eq!(EventRecord::decode(&reply.message).unwrap(), record);
}

#[test]
fn test_status_byte_one_is_a_rollback() {
    let extension = DylibExtension::open(&ECHO.artifact()).unwrap();
    let reply = extension
        .invoke(events::EXTERNAL_INFO_START, &flag_record(events::EXTERNAL_INFO_START))
        .unwrap();
    assert_eq!(reply.status, HandlerStatus::Rollback);
    assert!(reply.requests_rollback());
}

#[test]
fn test_undeclared_event_is_refused() {
    let extension = DylibExtension::open(&ECHO.artifact()).unwrap();
    let err = extension.invoke(events::TX_END, &flag_record(events::TX_END)).unwrap_err();
    assert!(matches!(err, ExtensionError::UnknownEvent(event) if event == events::TX_END));
}

#[test]
fn test_loaded_veto_reverts_the_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let path = ECHO.install_as(&config.plugin_dir, "echo.so");
    let mut controller = PluginController::new(config);
    assert_eq!(controller.load_path(&path).unwrap(), "fixture-echo");

    let mut store = RecordingStore::default();
    let header = BlockHeader { number: 9, ..Default::default() };
    let tx = TransactionInfo { hash: TX_HASH, from: SENDER, to: Some(CONTRACT), ..Default::default() };

    controller.begin_transaction(&header, &tx, &mut store);
    assert!(controller.context().rollback_requested(), "EXTERNALINFOSTART answered with status 1");
    let summary = controller.end_transaction(&tx, &TxOutcome::success(21_000), &mut store).unwrap();

    assert_eq!(summary.rollbacks, 1);
    assert_eq!(store.reverts().len(), 1);
    assert_eq!(controller.stats().event(events::TX_START).delivered, 1);
    assert_eq!(controller.stats().event(events::EXTERNAL_INFO_START).delivered, 1);

    controller.flush_logs();
    let contents = fs::read_to_string(dir.path().join("plugin_log/fixture-echo.datalog")).unwrap();
    let lines: Vec<serde_json::Value> =
        contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], events::TX_START);
    assert_eq!(lines[1]["event"], events::EXTERNAL_INFO_START);
    assert_eq!(lines[1]["callLayer"], 1);
}

//! Tests for opening artifacts and reporting the ones that do not follow the ABI.

use evm_plugin::{
    events, test_utils::test_config, DescriptorError, DylibExtension, Extension, LoadError,
    PluginController, RegistryError, ABI_VERSION,
};

use crate::fixtures::{
    ECHO, MISSING_HANDLER, NAMELESS, NO_ABI_VERSION, NO_REGISTER, WRONG_ABI_VERSION,
};

#[test]
fn test_open_reads_descriptor_and_resolves_handlers() {
    let extension = DylibExtension::open(&ECHO.artifact()).unwrap();
    assert_eq!(extension.name(), "fixture-echo");
    assert_eq!(extension.path(), ECHO.artifact());
    assert_eq!(extension.descriptor().handler_symbol(events::TX_START), Some("FixtureEcho"));
    assert_eq!(
        extension.descriptor().handler_symbol(events::EXTERNAL_INFO_START),
        Some("FixtureVeto")
    );
    assert_eq!(extension.descriptor().len(), 2);
}

#[test]
fn test_missing_abi_version_export() {
    let err = DylibExtension::open(&NO_ABI_VERSION.artifact()).unwrap_err();
    assert!(matches!(err, LoadError::MissingAbiVersion { .. }), "{err}");
}

#[test]
fn test_abi_version_mismatch() {
    match DylibExtension::open(&WRONG_ABI_VERSION.artifact()).unwrap_err() {
        LoadError::AbiMismatch { expected, found, .. } => {
            assert_eq!(expected, ABI_VERSION);
            assert_eq!(found, 99);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_register_export() {
    let err = DylibExtension::open(&NO_REGISTER.artifact()).unwrap_err();
    assert!(matches!(err, LoadError::MissingRegister { .. }), "{err}");
}

#[test]
fn test_declared_handler_must_be_exported() {
    match DylibExtension::open(&MISSING_HANDLER.artifact()).unwrap_err() {
        LoadError::MissingHandler { event, symbol, .. } => {
            assert_eq!(event, events::TX_END);
            assert_eq!(symbol, "FixtureAbsent");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_descriptor_is_rejected() {
    let err = DylibExtension::open(&NAMELESS.artifact()).unwrap_err();
    assert!(
        matches!(err, LoadError::Descriptor { source: DescriptorError::Malformed(_), .. }),
        "{err}"
    );
}

#[test]
fn test_load_all_loads_good_artifacts_and_reports_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    ECHO.install_as(&config.plugin_dir, "echo.so");
    NO_REGISTER.install_as(&config.plugin_dir, "no_register.so");
    WRONG_ABI_VERSION.install_as(&config.plugin_dir, "wrong_abi.so");

    let mut controller = PluginController::new(config);
    let report = controller.load_all().unwrap();

    assert_eq!(report.loaded, ["fixture-echo"]);
    assert_eq!(report.failures.len(), 2);
    assert!(controller.is_event_registered(events::TX_START));
    assert!(controller.is_event_registered(events::EXTERNAL_INFO_START));
    assert!(!controller.is_event_registered(events::TX_END));
}

#[test]
fn test_duplicate_name_keeps_the_registered_extension_in_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    ECHO.install_as(&config.plugin_dir, "a.so");
    ECHO.install_as(&config.plugin_dir, "b.so");

    let mut controller = PluginController::new(config);
    let report = controller.load_all().unwrap();

    assert_eq!(report.loaded, ["fixture-echo"], "the first artifact stays registered");
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("b.so"));
    assert!(matches!(
        &report.failures[0].error,
        LoadError::Registry { source: RegistryError::DuplicateOwner(name), .. } if name == "fixture-echo"
    ));
    assert!(controller.registry().extension("fixture-echo").is_some());
}

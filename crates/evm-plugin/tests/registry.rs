//! Tests for event bindings in `OpcodeRegistry`.

use std::sync::Arc;

use evm_plugin::{
    events, test_utils::RecordingExtension, ConflictPolicy, ExtensionHandle, HandlerBinding,
    OpcodeRegistry, RegistryError,
};

fn handle(name: &str, events: &[&str]) -> Arc<ExtensionHandle> {
    Arc::new(ExtensionHandle::without_log(Arc::new(RecordingExtension::new(name, events))))
}

#[test]
fn test_descriptor_with_n_events_yields_n_bindings() {
    let mut registry = OpcodeRegistry::default();
    let bound = registry.register_extension(handle("watcher", &events::ALL)).unwrap();

    assert_eq!(bound, events::ALL.len());
    assert_eq!(registry.len(), events::ALL.len());
    for event in events::ALL {
        let binding = registry.lookup(event).expect("every declared event should be bound");
        assert_eq!(binding.owner, "watcher");
        assert_eq!(binding.event, event);
    }
    assert_eq!(registry.owners().collect::<Vec<_>>(), ["watcher"]);
}

#[test]
fn test_unregister_removes_exactly_the_owner_bindings() {
    let mut registry = OpcodeRegistry::default();
    registry.register_extension(handle("a", &[events::TX_START, events::TX_END])).unwrap();
    registry.register_extension(handle("b", &[events::BLOCK_INFO])).unwrap();

    assert_eq!(registry.unregister_owner("a"), 2);
    assert!(!registry.is_registered(events::TX_START));
    assert!(!registry.is_registered(events::TX_END));
    assert!(registry.is_registered(events::BLOCK_INFO));
    assert_eq!(registry.len(), 1);
    assert!(registry.extension("a").is_none());

    assert_eq!(registry.unregister_owner("a"), 0, "a second unregister should be a no-op");
}

#[test]
fn test_conflicting_extension_is_rejected_atomically() {
    let mut registry = OpcodeRegistry::default();
    registry.register_extension(handle("first", &[events::TX_END])).unwrap();

    let err = registry
        .register_extension(handle("second", &[events::TX_START, events::TX_END]))
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::Conflict {
            event: events::TX_END.to_string(),
            existing: "first".to_string(),
            incoming: "second".to_string(),
        }
    );
    assert!(!registry.is_registered(events::TX_START), "no binding of the rejected extension may remain");
    assert!(registry.extension("second").is_none());
    assert_eq!(registry.lookup(events::TX_END).unwrap().owner, "first");
}

#[test]
fn test_replace_policy_is_last_writer_wins() {
    let mut registry = OpcodeRegistry::new(ConflictPolicy::Replace);
    registry.register_extension(handle("first", &[events::TX_END, events::TX_START])).unwrap();
    registry.register_extension(handle("second", &[events::TX_END])).unwrap();

    assert_eq!(registry.lookup(events::TX_END).unwrap().owner, "second");
    assert_eq!(registry.lookup(events::TX_START).unwrap().owner, "first");
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.unregister_owner("first"), 1);
}

#[test]
fn test_duplicate_owner_is_rejected() {
    let mut registry = OpcodeRegistry::default();
    registry.register_extension(handle("same", &[events::TX_END])).unwrap();
    let err = registry.register_extension(handle("same", &[events::TX_START])).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateOwner("same".to_string()));
    assert!(!registry.is_registered(events::TX_START));
}

#[test]
fn test_bindings_share_one_handle() {
    let mut registry = OpcodeRegistry::default();
    let shared = handle("shared", &[events::TX_START, events::TX_END]);
    registry.register_extension(shared.clone()).unwrap();

    let start = registry.lookup(events::TX_START).unwrap();
    let end = registry.lookup(events::TX_END).unwrap();
    assert!(Arc::ptr_eq(&start.handle, &end.handle));
    assert!(Arc::ptr_eq(&start.handle, &shared));
}

#[test]
fn test_single_binding_respects_policy() {
    let mut registry = OpcodeRegistry::default();
    registry.register(HandlerBinding::new(events::TX_END, handle("a", &[events::TX_END]))).unwrap();
    let err = registry
        .register(HandlerBinding::new(events::TX_END, handle("b", &[events::TX_END])))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Conflict { .. }));
}

#[test]
fn test_clear_drops_everything() {
    let mut registry = OpcodeRegistry::default();
    registry.register_extension(handle("a", &[events::TX_START])).unwrap();
    registry.register_extension(handle("b", &[events::TX_END])).unwrap();
    registry.clear();
    assert!(registry.is_empty());
    assert_eq!(registry.owners().count(), 0);
    registry.register_extension(handle("a", &[events::TX_START])).unwrap();
}

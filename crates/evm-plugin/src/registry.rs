//! Event name to handler bindings.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{Extension, ExtensionDescriptor, ExtensionLog};

/// Shared state of one loaded extension.
///
/// Every [`HandlerBinding`] of an extension points at the same handle.
pub struct ExtensionHandle {
    extension: Arc<dyn Extension>,
    log: Mutex<ExtensionLog>,
    in_flight: AtomicBool,
}

impl fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("name", &self.name())
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}

impl ExtensionHandle {
    /// Wraps a loaded extension and its data log.
    pub fn new(extension: Arc<dyn Extension>, log: ExtensionLog) -> Self {
        Self { extension, log: Mutex::new(log), in_flight: AtomicBool::new(false) }
    }

    /// Wraps an extension whose messages are dropped.
    pub fn without_log(extension: Arc<dyn Extension>) -> Self {
        Self::new(extension, ExtensionLog::disabled())
    }

    /// Unique name of the extension.
    pub fn name(&self) -> &str {
        self.extension.name()
    }

    /// The declared contract.
    pub fn descriptor(&self) -> &ExtensionDescriptor {
        self.extension.descriptor()
    }

    /// The extension itself.
    pub const fn extension(&self) -> &Arc<dyn Extension> {
        &self.extension
    }

    /// The extension's data log.
    pub const fn log(&self) -> &Mutex<ExtensionLog> {
        &self.log
    }

    /// Whether a handler of this extension is still running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Marks the extension busy. Returns `false` if it already was.
    pub(crate) fn try_begin(&self) -> bool {
        self.in_flight.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub(crate) fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// One event bound to one extension.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    /// Name of the extension owning the binding.
    pub owner: String,
    /// Event name.
    pub event: String,
    /// The owning extension.
    pub handle: Arc<ExtensionHandle>,
}

impl HandlerBinding {
    /// Binds `event` to `handle`.
    pub fn new(event: impl Into<String>, handle: Arc<ExtensionHandle>) -> Self {
        Self { owner: handle.name().to_string(), event: event.into(), handle }
    }
}

/// What to do when an event is already bound to another extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Refuse the incoming binding.
    #[default]
    Reject,
    /// The incoming binding replaces the existing one.
    Replace,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reject => "reject",
            Self::Replace => "replace",
        })
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The event is already bound to another extension.
    #[error("event {event} is already bound to {existing}, refusing binding from {incoming}")]
    Conflict {
        /// Contested event.
        event: String,
        /// Current owner.
        existing: String,
        /// Extension trying to bind the event.
        incoming: String,
    },
    /// An extension with the same name is already registered.
    #[error("extension {0} is already registered")]
    DuplicateOwner(String),
    /// A binding has an empty event name.
    #[error("extension {owner} binds an empty event name")]
    EmptyEvent {
        /// Offending extension.
        owner: String,
    },
}

/// Maps event names to the handler bound to them.
#[derive(Debug, Default)]
pub struct OpcodeRegistry {
    bindings: HashMap<String, HandlerBinding>,
    owners: BTreeMap<String, Arc<ExtensionHandle>>,
    policy: ConflictPolicy,
}

impl OpcodeRegistry {
    /// Creates an empty registry resolving conflicts with `policy`.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy, ..Default::default() }
    }

    /// The conflict policy.
    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Adds a single binding.
    pub fn register(&mut self, binding: HandlerBinding) -> Result<(), RegistryError> {
        self.check(&binding.owner, &binding.event)?;
        self.owners.entry(binding.owner.clone()).or_insert_with(|| binding.handle.clone());
        self.insert(binding);
        Ok(())
    }

    /// Binds every event the extension declares. Either all of them are bound or none is.
    ///
    /// Returns the number of bindings added.
    pub fn register_extension(&mut self, handle: Arc<ExtensionHandle>) -> Result<usize, RegistryError> {
        let owner = handle.name().to_string();
        if self.owners.contains_key(&owner) {
            return Err(RegistryError::DuplicateOwner(owner));
        }
        for event in handle.descriptor().events() {
            self.check(&owner, event)?;
        }

        let events: Vec<String> = handle.descriptor().events().map(str::to_string).collect();
        for event in &events {
            self.insert(HandlerBinding::new(event.clone(), handle.clone()));
        }
        self.owners.insert(owner.clone(), handle);
        tracing::info!(target: "evm_plugin::registry", %owner, events = ?events, "extension registered");
        Ok(events.len())
    }

    fn check(&self, owner: &str, event: &str) -> Result<(), RegistryError> {
        if event.is_empty() {
            return Err(RegistryError::EmptyEvent { owner: owner.to_string() });
        }
        match self.bindings.get(event) {
            Some(existing) if existing.owner != owner && self.policy == ConflictPolicy::Reject => {
                Err(RegistryError::Conflict {
                    event: event.to_string(),
                    existing: existing.owner.clone(),
                    incoming: owner.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, binding: HandlerBinding) {
        if let Some(previous) = self.bindings.insert(binding.event.clone(), binding) {
            let current = &self.bindings[&previous.event];
            if previous.owner != current.owner {
                tracing::warn!(target: "evm_plugin::registry", event = %previous.event, replaced = %previous.owner, by = %current.owner, "event binding replaced");
            }
        }
    }

    /// The binding for `event`, if any.
    pub fn lookup(&self, event: &str) -> Option<&HandlerBinding> {
        self.bindings.get(event)
    }

    /// Whether a handler is bound to `event`.
    pub fn is_registered(&self, event: &str) -> bool {
        self.bindings.contains_key(event)
    }

    /// Removes an extension and every binding it owns. Returns the number of bindings removed.
    pub fn unregister_owner(&mut self, owner: &str) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, binding| binding.owner != owner);
        let removed = before - self.bindings.len();
        if self.owners.remove(owner).is_some() {
            tracing::info!(target: "evm_plugin::registry", %owner, removed, "extension unregistered");
        }
        removed
    }

    /// The handle of a registered extension.
    pub fn extension(&self, owner: &str) -> Option<&Arc<ExtensionHandle>> {
        self.owners.get(owner)
    }

    /// Number of bound events.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no event is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Names of the registered extensions, sorted.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }

    /// Bound event names, in no particular order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Drops every binding and extension.
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.owners.clear();
    }
}

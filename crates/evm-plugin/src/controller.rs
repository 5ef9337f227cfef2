//! The lifecycle controller: the single object the execution pipeline talks to.
//!
//! The controller owns the registry, the call context and the dispatcher. The pipeline reaches it
//! through fixed hooks, in this order for every transaction:
//!
//! 1. [`PluginController::on_block`] once per block,
//! 2. [`PluginController::begin_transaction`], dispatching `TXSTART` and the top-level
//!    `EXTERNALINFOSTART`,
//! 3. [`PluginController::on_call_start`] / [`PluginController::on_call_end`] for every nested call,
//! 4. [`PluginController::end_transaction`], dispatching the top-level `EXTERNALINFOEND` and `TXEND`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::Bytes;
use parking_lot::Mutex;

use crate::{
    constants::events, BlockHeader, BlockInfo, CallContext, CallExit, CallFrame, CallKind,
    CallRequest, ConfigError, ConsistencyError, DispatchOutcome, DispatchStats, Dispatcher,
    EventBody, EventRecord, Extension, ExtensionHandle, ExtensionLoader, ExtensionLog, ExternalEnd,
    ExternalStart, FlagInfo, LoadError, LoadReport, OpcodeRegistry, PluginConfig, RegistryError,
    StateStore, TransactionInfo, TxOutcome, TxSummary,
};

/// Errors surfaced by the controller API.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Loading an artifact failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The call stack driven by the pipeline is inconsistent.
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The data log directory could not be prepared.
    #[error("failed to prepare log directory {}: {source}", path.display())]
    LogDir {
        /// Log directory.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A call hook ran outside of a transaction.
    #[error("call hook invoked outside of a transaction")]
    NoTransaction,
}

/// A queued change to the set of loaded extensions.
#[derive(Debug, Clone)]
pub enum ReconfigRequest {
    /// Load the artifact at the path.
    Load(PathBuf),
    /// Register an in-process extension.
    Install(Arc<dyn Extension>),
    /// Unload the named extension.
    Unregister(String),
}

/// Queues reconfiguration requests from any thread.
///
/// Requests take effect at the start of the next transaction, never in the middle of one.
#[derive(Debug, Clone, Default)]
pub struct ReconfigHandle {
    pending: Arc<Mutex<Vec<ReconfigRequest>>>,
}

impl ReconfigHandle {
    /// Queues loading the artifact at `path`.
    pub fn request_load(&self, path: impl Into<PathBuf>) {
        self.pending.lock().push(ReconfigRequest::Load(path.into()));
    }

    /// Queues registering an in-process extension.
    pub fn request_install(&self, extension: Arc<dyn Extension>) {
        self.pending.lock().push(ReconfigRequest::Install(extension));
    }

    /// Queues unloading the extension named `owner`.
    pub fn request_unregister(&self, owner: impl Into<String>) {
        self.pending.lock().push(ReconfigRequest::Unregister(owner.into()));
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn take(&self) -> Vec<ReconfigRequest> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// Layer of a transaction's top-level message, framed or not.
const TOP_LEVEL_LAYER: usize = 1;

/// Block and transaction of the transaction being applied.
#[derive(Debug)]
struct TxScope {
    block: BlockHeader,
    tx: TransactionInfo,
}

/// Owns the loaded extensions and drives them from the pipeline hooks.
#[derive(Debug)]
pub struct PluginController {
    config: PluginConfig,
    registry: OpcodeRegistry,
    context: CallContext,
    dispatcher: Dispatcher,
    reconfig: ReconfigHandle,
    active: bool,
    log_dir_ready: bool,
    block: Option<BlockHeader>,
    scope: Option<Arc<TxScope>>,
    nested: Vec<CallKind>,
}

impl Default for PluginController {
    fn default() -> Self {
        Self::new(PluginConfig::default())
    }
}

impl PluginController {
    /// Creates a controller with no extension loaded.
    ///
    /// The configuration is not rejected here. A zero dispatch budget runs handlers inline, the
    /// same as no budget. Use [`PluginController::try_new`] to refuse such a configuration.
    pub fn new(config: PluginConfig) -> Self {
        if let Err(err) = config.validate() {
            tracing::warn!(target: "evm_plugin::controller", %err, "using unvalidated plugin configuration");
        }
        Self {
            registry: OpcodeRegistry::new(config.conflict_policy),
            dispatcher: Dispatcher::new(config.dispatch_timeout()),
            config,
            context: CallContext::new(),
            reconfig: ReconfigHandle::default(),
            active: false,
            log_dir_ready: false,
            block: None,
            scope: None,
            nested: Vec::new(),
        }
    }

    /// Validates `config` and creates a controller from it.
    pub fn try_new(config: PluginConfig) -> Result<Self, PluginError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// The configuration in use.
    pub const fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// The event registry.
    pub const fn registry(&self) -> &OpcodeRegistry {
        &self.registry
    }

    /// The call context of the current transaction.
    pub const fn context(&self) -> &CallContext {
        &self.context
    }

    /// Dispatch counters.
    pub const fn stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    /// A handle for queueing reconfiguration from other threads.
    pub fn reconfig_handle(&self) -> ReconfigHandle {
        self.reconfig.clone()
    }

    fn ensure_log_dir(&mut self) -> Result<&Path, PluginError> {
        if !self.log_dir_ready {
            std::fs::create_dir_all(&self.config.log_dir).map_err(|source| {
                PluginError::LogDir { path: self.config.log_dir.clone(), source }
            })?;
            self.log_dir_ready = true;
        }
        Ok(&self.config.log_dir)
    }

    /// Loads every artifact of the configured directory.
    ///
    /// Artifacts that fail to load or conflict with the registry are reported and skipped. Only a
    /// log directory that cannot be created fails the whole operation.
    pub fn load_all(&mut self) -> Result<LoadReport, PluginError> {
        self.ensure_log_dir()?;
        let loader = ExtensionLoader::from_config(&self.config)?;
        let (extensions, mut report) = loader.load_all();
        for extension in extensions {
            let path = extension.path().to_path_buf();
            let name = extension.name().to_string();
            match self.install(Arc::new(extension)) {
                Ok(_) => report.loaded.push(name),
                Err(err) => report.fail(path.clone(), into_load_error(err, path)),
            }
        }
        tracing::info!(target: "evm_plugin::controller", loaded = report.loaded.len(), failed = report.failures.len(), "extensions loaded");
        Ok(report)
    }

    /// Loads and registers the artifact at `path`. Returns the extension name.
    pub fn load_path(&mut self, path: &Path) -> Result<String, PluginError> {
        self.ensure_log_dir()?;
        let extension = ExtensionLoader::load_one(path)?;
        let name = extension.name().to_string();
        self.install(Arc::new(extension)).map_err(|err| into_load_error(err, path.to_path_buf()))?;
        Ok(name)
    }

    /// Registers an in-process extension. Returns the number of events bound.
    pub fn register_extension(&mut self, extension: Arc<dyn Extension>) -> Result<usize, PluginError> {
        self.ensure_log_dir()?;
        self.install(extension)
    }

    fn install(&mut self, extension: Arc<dyn Extension>) -> Result<usize, PluginError> {
        let name = extension.name().to_string();
        if self.registry.extension(&name).is_some() {
            return Err(RegistryError::DuplicateOwner(name).into());
        }
        let log = ExtensionLog::open(&self.config.log_dir, &name).map_err(|source| {
            LoadError::Io { path: ExtensionLog::path_for(&self.config.log_dir, &name), source }
        })?;
        let bound = self.registry.register_extension(Arc::new(ExtensionHandle::new(extension, log)))?;
        Ok(bound)
    }

    /// Unloads an extension. Returns the number of bindings removed.
    pub fn unregister(&mut self, owner: &str) -> usize {
        if let Some(handle) = self.registry.extension(owner) {
            if let Err(err) = handle.log().lock().flush() {
                tracing::warn!(target: "evm_plugin::controller", %owner, %err, "failed to flush data log");
            }
        }
        self.registry.unregister_owner(owner)
    }

    /// Applies the queued reconfiguration requests. Returns how many were applied successfully.
    pub fn apply_reconfig(&mut self) -> usize {
        let mut applied = 0;
        for request in self.reconfig.take() {
            let result = match &request {
                ReconfigRequest::Load(path) => self.load_path(path).map(drop),
                ReconfigRequest::Install(extension) => {
                    self.register_extension(extension.clone()).map(drop)
                }
                ReconfigRequest::Unregister(owner) => {
                    let known = self.registry.extension(owner).is_some();
                    self.unregister(owner);
                    if !known {
                        tracing::warn!(target: "evm_plugin::controller", %owner, "unregister request for an unknown extension");
                    }
                    Ok(())
                }
            };
            match result {
                Ok(()) => {
                    applied += 1;
                    tracing::info!(target: "evm_plugin::controller", ?request, "reconfiguration applied");
                }
                Err(err) => {
                    tracing::warn!(target: "evm_plugin::controller", ?request, %err, "reconfiguration failed")
                }
            }
        }
        applied
    }

    /// Enables dispatch of transaction scoped events.
    pub fn start(&mut self) {
        if !self.active {
            self.active = true;
            tracing::trace!(target: "evm_plugin::controller", "dispatch started");
        }
    }

    /// Disables dispatch of transaction scoped events.
    pub fn stop(&mut self) {
        if self.active {
            self.active = false;
            tracing::trace!(target: "evm_plugin::controller", "dispatch stopped");
        }
    }

    /// Whether transaction scoped events are dispatched.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a handler is bound to `event`.
    pub fn is_event_registered(&self, event: &str) -> bool {
        self.registry.is_registered(event)
    }

    /// Dispatches `event` to its handler.
    ///
    /// `build` is only called when a handler is bound and allowed to run. A
    /// [`Rollback`](crate::HandlerStatus::Rollback) reply flags the innermost active call.
    pub fn dispatch<F>(&mut self, event: &str, build: F) -> DispatchOutcome
    where
        F: FnOnce() -> EventBody,
    {
        let call_layer = self.context.call_layer();
        self.dispatch_at(event, call_layer, build)
    }

    /// Like [`PluginController::dispatch`], with the record stamped at `call_layer`.
    fn dispatch_at<F>(&mut self, event: &str, call_layer: usize, build: F) -> DispatchOutcome
    where
        F: FnOnce() -> EventBody,
    {
        let Some(binding) = self.registry.lookup(event) else {
            return self.dispatcher.skip(event, DispatchOutcome::Unbound);
        };
        if events::is_transaction_scoped(event) && !self.active {
            return self.dispatcher.skip(event, DispatchOutcome::Inactive);
        }
        let handle = binding.handle.clone();

        let record = EventRecord {
            event: event.to_string(),
            tx_hash: self.context.tx_hash(),
            call_layer,
            call_stack: self.context.call_stack().to_vec(),
            body: build(),
        };
        let outcome = self.dispatcher.deliver(&handle, record);

        if outcome.reply().is_some_and(|reply| reply.requests_rollback()) {
            match self.context.request_rollback() {
                Ok(snapshot) => {
                    tracing::debug!(target: "evm_plugin::controller", owner = %handle.name(), %event, %snapshot, "rollback requested");
                }
                Err(err) => {
                    tracing::warn!(target: "evm_plugin::controller", owner = %handle.name(), %event, %err, "rollback request ignored");
                }
            }
        }
        outcome
    }

    /// Block start hook.
    pub fn on_block(&mut self, header: &BlockHeader) -> DispatchOutcome {
        self.block = Some(header.clone());
        self.dispatch(events::BLOCK_INFO, || EventBody::Block(BlockInfo::from(header)))
    }

    /// Transaction start hook.
    ///
    /// Starts dispatch, applies queued reconfiguration, resets the call context and enters the
    /// top-level call.
    pub fn begin_transaction<S: StateStore>(
        &mut self,
        block: &BlockHeader,
        tx: &TransactionInfo,
        store: &mut S,
    ) {
        self.start();
        self.apply_reconfig();

        self.context.begin(tx.hash, tx.to, store);
        self.nested.clear();
        self.scope = Some(Arc::new(TxScope { block: block.clone(), tx: tx.clone() }));
        tracing::debug!(target: "evm_plugin::controller", tx_hash = %tx.hash, "transaction started");

        self.dispatch(events::TX_START, || EventBody::Flag(FlagInfo::new(events::TX_START)));
        let store: &S = store;
        self.dispatch_at(events::EXTERNAL_INFO_START, TOP_LEVEL_LAYER, || {
            let code = tx.to.and_then(|to| store.code(to));
            EventBody::ExternalStart(ExternalStart::top_level(block, tx, code))
        });
    }

    /// Nested call start hook.
    pub fn on_call_start<S: StateStore>(
        &mut self,
        request: &CallRequest,
        store: &mut S,
    ) -> Result<CallFrame, PluginError> {
        let scope = self.scope.clone().ok_or(PluginError::NoTransaction)?;
        let frame = self.context.enter_call(request.target, store)?;
        self.nested.push(request.kind);

        let store: &S = store;
        self.dispatch(events::EXTERNAL_INFO_START, || {
            let code = store.code(request.target);
            EventBody::ExternalStart(ExternalStart::nested(
                &scope.block,
                &scope.tx,
                request,
                frame.depth,
                code,
            ))
        });
        Ok(frame)
    }

    /// Nested call end hook.
    ///
    /// The end event is dispatched before the frame is popped, so a handler of this very event
    /// can still veto the call's state changes.
    pub fn on_call_end<S: StateStore>(
        &mut self,
        success: bool,
        output: Bytes,
        store: &mut S,
    ) -> Result<CallExit, PluginError> {
        let scope = self.scope.clone().ok_or(PluginError::NoTransaction)?;
        let kind = self.nested.pop().ok_or(ConsistencyError::Unbalanced)?;
        let frame = self.context.current_frame().ok_or(ConsistencyError::Unbalanced)?;

        self.dispatch(events::EXTERNAL_INFO_END, || {
            EventBody::ExternalEnd(ExternalEnd::nested(&scope.tx, &frame, kind, success, output))
        });
        Ok(self.context.exit_call(success, store)?)
    }

    /// Transaction end hook.
    ///
    /// Nested calls the engine left open are unwound as failed. The transaction is always closed
    /// and dispatch stopped, even when an error is returned.
    pub fn end_transaction<S: StateStore>(
        &mut self,
        tx: &TransactionInfo,
        outcome: &TxOutcome,
        store: &mut S,
    ) -> Result<TxSummary, PluginError> {
        let mut first_error: Option<PluginError> = None;

        let open = self.nested.len();
        if open > 0 {
            tracing::warn!(target: "evm_plugin::controller", tx_hash = %tx.hash, open, "unwinding calls left open");
            for _ in 0..open {
                if let Err(err) = self.on_call_end(false, Bytes::new(), store) {
                    keep_first(&mut first_error, err);
                }
            }
            keep_first(&mut first_error, ConsistencyError::OpenFrames(open).into());
        }

        let store_ref: &S = store;
        self.dispatch_at(events::EXTERNAL_INFO_END, TOP_LEVEL_LAYER, || {
            let runtime = outcome.created_address.and_then(|address| store_ref.code(address));
            EventBody::ExternalEnd(ExternalEnd::top_level(tx, outcome, runtime))
        });

        if tx.to.is_some() {
            if let Err(err) = self.context.exit_call(outcome.success, store) {
                keep_first(&mut first_error, err.into());
            }
        }

        let summary = TxSummary {
            op: events::TX_END.to_string(),
            tx_hash: tx.hash,
            is_success: outcome.success,
            contracts_touched: self.context.contracts_touched().to_vec(),
            rollbacks: self.context.rollbacks(),
        };
        self.dispatch(events::TX_END, || EventBody::TxEnd(summary.clone()));

        let leftover = self.context.finish();
        if !leftover.is_empty() {
            keep_first(&mut first_error, ConsistencyError::OpenFrames(leftover.len()).into());
        }
        self.scope = None;
        self.nested.clear();
        self.stop();
        tracing::debug!(target: "evm_plugin::controller", tx_hash = %tx.hash, success = outcome.success, rollbacks = summary.rollbacks, "transaction finished");

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// The block most recently passed to [`PluginController::on_block`].
    pub const fn current_block(&self) -> Option<&BlockHeader> {
        self.block.as_ref()
    }

    /// Flushes every data log.
    pub fn flush_logs(&self) {
        for owner in self.registry.owners() {
            if let Some(handle) = self.registry.extension(owner) {
                if let Err(err) = handle.log().lock().flush() {
                    tracing::warn!(target: "evm_plugin::controller", %owner, %err, "failed to flush data log");
                }
            }
        }
    }
}

fn keep_first(slot: &mut Option<PluginError>, err: PluginError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}

fn into_load_error(err: PluginError, path: PathBuf) -> LoadError {
    match err {
        PluginError::Load(err) => err,
        PluginError::Registry(source) => LoadError::Registry { path, source },
        PluginError::LogDir { source, .. } => LoadError::Io { path, source },
        other => LoadError::Io { path, source: std::io::Error::other(other.to_string()) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_config, RecordingExtension, RecordingStore};

    #[test]
    fn test_reconfig_handle_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let controller = PluginController::new(test_config(dir.path()));
        let handle = controller.reconfig_handle();
        let clone = handle.clone();
        clone.request_unregister("a");
        handle.request_load("/nowhere/x.so");
        assert_eq!(controller.reconfig_handle().pending(), 2);
    }

    #[test]
    fn test_nested_end_without_start_is_unbalanced() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = PluginController::new(test_config(dir.path()));
        let mut store = RecordingStore::default();
        let tx = TransactionInfo::default();
        controller.begin_transaction(&BlockHeader::default(), &tx, &mut store);
        let err = controller.on_call_end(true, Bytes::new(), &mut store).unwrap_err();
        assert!(matches!(err, PluginError::Consistency(ConsistencyError::Unbalanced)));
    }

    #[test]
    fn test_duplicate_install_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = PluginController::new(test_config(dir.path()));
        let ext = Arc::new(RecordingExtension::new("dup", &["TXEND"]));
        controller.register_extension(ext.clone()).unwrap();
        let err = controller.register_extension(ext).unwrap_err();
        assert!(matches!(err, PluginError::Registry(RegistryError::DuplicateOwner(_))));
    }

    #[test]
    fn test_call_hooks_require_transaction() {
        let mut controller = PluginController::default();
        let mut store = RecordingStore::default();
        let err = controller.on_call_start(&CallRequest::default(), &mut store).unwrap_err();
        assert!(matches!(err, PluginError::NoTransaction));
    }
}

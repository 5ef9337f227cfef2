//! Runtime extensions for an EVM transaction pipeline.
//!
//! Extensions are shared libraries discovered at startup. Each one declares the execution events
//! it wants to observe (block metadata, transaction start and end, external call start and end)
//! and may veto the state changes of the call it is observing. The [`PluginController`] owns the
//! loaded extensions and is driven by the pipeline through a fixed set of hooks; see
//! [`processor`] for a reference wiring.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;
pub use constants::{events, status, ABI_VERSION};

mod config;
pub use config::*;

mod context;
pub use context::*;

mod controller;
pub use controller::*;

mod datalog;
pub use datalog::*;

mod descriptor;
pub use descriptor::*;

mod dispatch;
pub use dispatch::*;

mod extension;
pub use extension::*;

pub mod ffi;

mod loader;
pub use loader::*;

mod payload;
pub use payload::*;

pub mod processor;
pub use processor::{
    apply_transaction, process_block, AppliedTransaction, CallHooks, ProcessError, TxExecutor,
};

mod registry;
pub use registry::*;

pub mod scenario;
pub use scenario::{Scenario, ScriptError, ScriptedCall, ScriptedExecutor, ScriptedTx, ValueTransfer};

pub mod sdk;

mod store;
pub use store::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod types;
pub use types::*;

//! Building extensions in Rust.
//!
//! An extension is a `cdylib` crate that depends on this crate and invokes [`export_plugin!`]
//! once:
//!
//! ```ignore
//! use evm_plugin::{EventRecord, HandlerReply};
//!
//! fn on_call_start(record: &EventRecord) -> HandlerReply {
//!     HandlerReply::proceed().with_message(format!("layer {}", record.call_layer))
//! }
//!
//! evm_plugin::export_plugin! {
//!     name: "call-logger",
//!     handlers: {
//!         "EXTERNALINFOSTART" => OnCallStart => on_call_start,
//!     }
//! }
//! ```
//!
//! The macro exports `plugin_abi_version`, `Register` and one C symbol per handler. Handlers never
//! unwind into the host: a panic becomes an [`HandlerStatus::Error`] reply.

use std::{
    cell::RefCell,
    panic::{catch_unwind, AssertUnwindSafe},
};

#[doc(hidden)]
pub use once_cell::sync::Lazy;

use crate::{ffi::RawSlice, EventRecord, HandlerReply, HandlerStatus};

thread_local! {
    /// Message of the last reply produced on this thread. Lives until the next handler call.
    static REPLY: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Runs `handler` on the record encoded in `payload` and publishes its reply.
///
/// Used by the code [`export_plugin!`] generates.
///
/// # Safety
///
/// `payload` must satisfy the contract of [`RawSlice::as_bytes`] for the duration of the call, and
/// `message` must be null or valid for writes.
#[doc(hidden)]
pub unsafe fn invoke_handler<F>(payload: RawSlice, message: *mut RawSlice, handler: F) -> u8
where
    F: FnOnce(&EventRecord) -> HandlerReply,
{
    // SAFETY: upheld by the caller.
    let bytes = unsafe { payload.as_bytes() };
    let reply = match catch_unwind(AssertUnwindSafe(|| EventRecord::decode(bytes).map(|r| handler(&r)))) {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => HandlerReply {
            status: HandlerStatus::Error,
            message: format!("invalid event payload: {err}").into_bytes(),
        },
        Err(_) => HandlerReply { status: HandlerStatus::Error, message: b"handler panicked".to_vec() },
    };

    let slice = REPLY.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        *buffer = reply.message;
        RawSlice::from_slice(&buffer)
    });
    if !message.is_null() {
        // SAFETY: non-null and valid for writes per the caller's contract.
        unsafe { message.write(slice) };
    }
    u8::from(reply.status)
}

/// Exports an extension's C ABI. See the [module documentation](crate::sdk).
#[macro_export]
macro_rules! export_plugin {
    (
        name: $name:expr,
        handlers: { $($event:literal => $symbol:ident => $handler:path),* $(,)? } $(,)?
    ) => {
        /// Version of the host ABI this extension was built against.
        #[no_mangle]
        pub extern "C" fn plugin_abi_version() -> u32 {
            $crate::ABI_VERSION
        }

        /// The JSON descriptor of this extension.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "C" fn Register() -> $crate::ffi::RawSlice {
            static DESCRIPTOR: $crate::sdk::Lazy<::std::vec::Vec<u8>> = $crate::sdk::Lazy::new(|| {
                $crate::ExtensionDescriptor::new($name, [$(($event, stringify!($symbol))),*]).encode()
            });
            $crate::ffi::RawSlice::from_slice(&DESCRIPTOR)
        }

        $(
            #[doc = concat!("Handler of `", $event, "`.")]
            #[no_mangle]
            #[allow(non_snake_case)]
            pub unsafe extern "C" fn $symbol(
                payload: $crate::ffi::RawSlice,
                message: *mut $crate::ffi::RawSlice,
            ) -> u8 {
                // SAFETY: the host passes a live payload and a writable message slot.
                unsafe { $crate::sdk::invoke_handler(payload, message, $handler) }
            }
        )*
    };
}

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use libloading::Library;

use super::LoadError;
use crate::{
    constants::{ABI_VERSION, ABI_VERSION_SYMBOL, REGISTER_SYMBOL},
    ffi::{AbiVersionFn, BorrowedSlice, HandlerFn, RawSlice, RegisterFn},
    EventRecord, Extension, ExtensionDescriptor, ExtensionError, HandlerReply, HandlerStatus,
};

/// An extension loaded from a shared library.
pub struct DylibExtension {
    descriptor: ExtensionDescriptor,
    path: PathBuf,
    handlers: HashMap<String, HandlerFn>,
    // Declared last so the function pointers above never outlive the mapping.
    _library: Library,
}

impl fmt::Debug for DylibExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibExtension")
            .field("name", &self.descriptor.name)
            .field("path", &self.path)
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DylibExtension {
    /// Opens the artifact at `path`, checks its ABI version, reads its descriptor and resolves
    /// every declared handler.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        // SAFETY: loading runs the artifact's initializers. Extensions are trusted with full host
        // privileges.
        let library = unsafe { Library::new(path) }
            .map_err(|source| LoadError::Open { path: path.to_path_buf(), source })?;

        // SAFETY: the symbol is declared with the `AbiVersionFn` signature by every artifact
        // built with the SDK. Artifacts that are not are rejected right after by the version check.
        let found = unsafe {
            let version = library
                .get::<AbiVersionFn>(ABI_VERSION_SYMBOL.as_bytes())
                .map_err(|_| LoadError::MissingAbiVersion { path: path.to_path_buf() })?;
            version()
        };
        if found != ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                path: path.to_path_buf(),
                expected: ABI_VERSION,
                found,
            });
        }

        // SAFETY: the ABI version matches, so `Register` has the `RegisterFn` signature and the
        // returned slice stays valid until the next call into the artifact on this thread.
        let raw = unsafe {
            let register = library
                .get::<RegisterFn>(REGISTER_SYMBOL.as_bytes())
                .map_err(|_| LoadError::MissingRegister { path: path.to_path_buf() })?;
            register().to_vec()
        };
        let descriptor = ExtensionDescriptor::decode(&raw)
            .map_err(|source| LoadError::Descriptor { path: path.to_path_buf(), source })?;

        let mut handlers = HashMap::with_capacity(descriptor.len());
        for (event, symbol) in &descriptor.event_map {
            // SAFETY: as above, handlers share the versioned `HandlerFn` signature.
            let handler = unsafe { library.get::<HandlerFn>(symbol.as_bytes()) }
                .map(|handler| *handler)
                .map_err(|_| LoadError::MissingHandler {
                    path: path.to_path_buf(),
                    event: event.clone(),
                    symbol: symbol.clone(),
                })?;
            handlers.insert(event.clone(), handler);
        }

        Ok(Self { descriptor, path: path.to_path_buf(), handlers, _library: library })
    }

    /// Path the extension was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Extension for DylibExtension {
    fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    fn invoke(&self, event: &str, record: &EventRecord) -> Result<HandlerReply, ExtensionError> {
        let handler =
            self.handlers.get(event).ok_or_else(|| ExtensionError::UnknownEvent(event.to_string()))?;
        let payload = record.encode()?;
        let mut message = RawSlice::empty();
        // SAFETY: `payload` outlives the call. The handler only writes `message`, which points at
        // memory it keeps alive until its next call on this thread, so it is copied right away.
        let (status, message) = unsafe {
            let status = handler(BorrowedSlice::new(&payload).raw(), &mut message);
            (status, message.to_vec())
        };
        Ok(HandlerReply { status: HandlerStatus::from(status), message })
    }
}

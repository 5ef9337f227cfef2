//! The C ABI spoken between the host and a dynamically loaded extension.
//!
//! An extension artifact exports:
//!
//! - `plugin_abi_version`: an [`AbiVersionFn`] returning [`ABI_VERSION`](crate::ABI_VERSION),
//! - `Register`: a [`RegisterFn`] returning the JSON descriptor,
//! - one [`HandlerFn`] per event declared in the descriptor.
//!
//! Every slice handed across the boundary is borrowed: the side that produced it keeps it alive
//! until its next call on the same thread.

use core::{marker::PhantomData, ptr, slice};

/// A borrowed byte slice crossing the C ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSlice {
    /// First byte, or null for an empty slice.
    pub ptr: *const u8,
    /// Length in bytes.
    pub len: usize,
}

impl RawSlice {
    /// The empty slice.
    pub const fn empty() -> Self {
        Self { ptr: ptr::null(), len: 0 }
    }

    /// Borrows `bytes`. The caller must keep `bytes` alive while the result is in use.
    pub const fn from_slice(bytes: &[u8]) -> Self {
        Self { ptr: bytes.as_ptr(), len: bytes.len() }
    }

    /// Whether the slice holds no bytes.
    pub const fn is_empty(&self) -> bool {
        self.ptr.is_null() || self.len == 0
    }

    /// Views the slice as bytes.
    ///
    /// # Safety
    ///
    /// Unless the slice is empty, `ptr` must point to `len` initialized bytes that stay valid and
    /// unmodified for `'a`.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.is_empty() {
            return &[];
        }
        // SAFETY: upheld by the caller.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Copies the slice into an owned buffer.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawSlice::as_bytes`].
    pub unsafe fn to_vec(&self) -> Vec<u8> {
        // SAFETY: upheld by the caller.
        unsafe { self.as_bytes() }.to_vec()
    }
}

impl Default for RawSlice {
    fn default() -> Self {
        Self::empty()
    }
}

/// `plugin_abi_version` export.
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// `Register` export. Returns the JSON descriptor.
pub type RegisterFn = unsafe extern "C" fn() -> RawSlice;

/// Event handler export.
///
/// `payload` is the encoded [`EventRecord`](crate::EventRecord). The handler may store a reply
/// message into `*message` and returns a status byte (see [`status`](crate::status)).
pub type HandlerFn = unsafe extern "C" fn(payload: RawSlice, message: *mut RawSlice) -> u8;

/// A [`RawSlice`] tied to the lifetime of the buffer it borrows.
#[derive(Debug, Clone, Copy)]
pub struct BorrowedSlice<'a> {
    raw: RawSlice,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> BorrowedSlice<'a> {
    /// Borrows `bytes`.
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { raw: RawSlice::from_slice(bytes), _marker: PhantomData }
    }

    /// The raw form to pass across the ABI.
    pub const fn raw(&self) -> RawSlice {
        self.raw
    }
}

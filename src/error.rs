// glvnd/src/error.rs
//
//! Various errors that methods can produce.

use std::fmt::{self, Display, Formatter};

/// Various errors that methods can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The method failed for a miscellaneous reason.
    Failed,
    /// Every slot in the dispatch table has already been assigned.
    SlotsExhausted,
    /// The slot is outside the range that the registry or stub region covers.
    InvalidSlot,
    /// The entry point name is empty or contains an interior NUL.
    InvalidEntryPointName,
    /// Memory for generated entry points couldn't be mapped.
    ExecutableMemoryMapFailed(i32),
    /// Mapped memory couldn't be made executable.
    ExecutableMemoryProtectFailed(i32),
    /// The thread-local dispatch pointer isn't at a fixed offset from the thread pointer.
    ThreadLocalStorageUnavailable,
    /// The vendor handle doesn't name a live vendor.
    UnknownVendor,
    /// The vendor's imports table was built against an incompatible ABI major version.
    IncompatibleAbiVersion,
    /// The vendor is missing one or more required callbacks.
    MissingVendorCallbacks,
    /// The vendor is initialized, so it can't be destroyed or modified.
    VendorInitialized,
    /// The vendor isn't initialized, so it can't be assigned to a screen.
    VendorNotInitialized,
    /// The screen number is out of range.
    BadScreen,
    /// The extension has already been initialized for this server generation.
    ExtensionAlreadyInitialized,
    /// The extension hasn't been initialized for this server generation.
    ExtensionNotInitialized,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Error::Failed => f.write_str("operation failed"),
            Error::SlotsExhausted => f.write_str("all dispatch table slots are in use"),
            Error::InvalidSlot => f.write_str("dispatch slot out of range"),
            Error::InvalidEntryPointName => f.write_str("invalid entry point name"),
            Error::ExecutableMemoryMapFailed(errno) => {
                write!(f, "couldn't map entry point memory (errno {})", errno)
            }
            Error::ExecutableMemoryProtectFailed(errno) => {
                write!(f, "couldn't make entry point memory executable (errno {})", errno)
            }
            Error::ThreadLocalStorageUnavailable => {
                f.write_str("thread-local dispatch storage isn't in the static TLS block")
            }
            Error::UnknownVendor => f.write_str("unknown vendor"),
            Error::IncompatibleAbiVersion => f.write_str("incompatible vendor ABI version"),
            Error::MissingVendorCallbacks => f.write_str("vendor is missing required callbacks"),
            Error::VendorInitialized => f.write_str("vendor is initialized"),
            Error::VendorNotInitialized => f.write_str("vendor is not initialized"),
            Error::BadScreen => f.write_str("bad screen number"),
            Error::ExtensionAlreadyInitialized => f.write_str("extension already initialized"),
            Error::ExtensionNotInitialized => f.write_str("extension not initialized"),
        }
    }
}

impl std::error::Error for Error {}

// glvnd/src/server/abi.rs
//
//! The interface between the GLX router and vendor libraries.

use super::exports::ServerExports;
use super::host::{Client, Xid};
use super::protocol::ProtocolError;
use super::tags::ContextTag;
use super::vendor::VendorId;
use crate::Error;

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

/// A vendor interface version. Major versions are incompatible with each other; minor versions
/// only add things.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbiVersion {
    pub major: u16,
    pub minor: u16,
}

impl AbiVersion {
    pub const CURRENT: AbiVersion = AbiVersion { major: 0, minor: 0 };

    #[inline]
    pub fn is_compatible_with(self, other: AbiVersion) -> bool {
        self.major == other.major
    }
}

/// The GLX extension's registration with the X server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtensionEntry {
    pub name: &'static str,
    pub major_opcode: u8,
    pub error_base: u8,
    pub event_base: u8,
}

/// Vendor data attached to a context tag. Only the vendor that owns the tag ever sees it.
pub type TagPrivate = Option<Rc<dyn Any>>;

/// A vendor's handler for one request.
pub type DispatchProc = Rc<dyn Fn(&mut ServerExports, &mut Client) -> Result<(), ProtocolError>>;

/// Called once per server generation. Vendors assign themselves to screens from here.
pub type ExtensionInitFn = dyn Fn(&mut ServerExports, &ExtensionEntry, VendorId) -> Result<(), Error>;
pub type ExtensionCloseDownFn = dyn Fn(&ExtensionEntry);
pub type HandleRequestFn = dyn Fn(&mut ServerExports, &mut Client) -> Result<(), ProtocolError>;
/// Returns the handler for a minor opcode, or for a vendor code when the opcode is one of the
/// vendor-private requests.
pub type GetDispatchAddressFn = dyn Fn(u8, u32) -> Option<DispatchProc>;
/// Makes a context current or, when `context` is zero, releases the old one. Returns the private
/// data to store with the new tag.
pub type MakeCurrentFn =
    dyn Fn(&mut ServerExports, &mut Client, &MakeCurrentRequest) -> Result<TagPrivate, ProtocolError>;

/// The arguments to a vendor's make-current callback.
#[derive(Clone, Debug, Default)]
pub struct MakeCurrentRequest {
    pub old_tag: ContextTag,
    pub old_data: TagPrivate,
    pub drawable: Xid,
    pub read_drawable: Xid,
    pub context: Xid,
    pub new_tag: ContextTag,
}

/// The callbacks a vendor hands to the router.
#[derive(Default)]
pub struct ServerImports {
    pub abi_version: AbiVersion,
    pub extension_init: Option<Box<ExtensionInitFn>>,
    pub extension_close_down: Option<Box<ExtensionCloseDownFn>>,
    pub handle_request: Option<Box<HandleRequestFn>>,
    pub get_dispatch_address: Option<Box<GetDispatchAddressFn>>,
    pub make_current: Option<Box<MakeCurrentFn>>,
}

impl Default for AbiVersion {
    #[inline]
    fn default() -> AbiVersion {
        AbiVersion::CURRENT
    }
}

impl ServerImports {
    /// An empty imports table for the current ABI. New optional callbacks can be added without
    /// breaking vendors that build their table this way.
    pub fn allocate() -> ServerImports {
        ServerImports::default()
    }

    /// Checks that every required callback is present.
    pub fn validate(&self) -> Result<(), Error> {
        if self.extension_close_down.is_none() ||
                self.handle_request.is_none() ||
                self.get_dispatch_address.is_none() ||
                self.make_current.is_none() {
            return Err(Error::MissingVendorCallbacks);
        }
        Ok(())
    }
}

impl Debug for ServerImports {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ServerImports")
            .field("abi_version", &self.abi_version)
            .field("extension_init", &self.extension_init.is_some())
            .field("extension_close_down", &self.extension_close_down.is_some())
            .field("handle_request", &self.handle_request.is_some())
            .field("get_dispatch_address", &self.get_dispatch_address.is_some())
            .field("make_current", &self.make_current.is_some())
            .finish()
    }
}

//! Vendor-neutral OpenGL dispatch.
//!
//! Applications link against one set of GL entry points; this crate forwards each call to
//! whichever vendor implementation owns the calling thread's current context. On the client side
//! that means a registry of dispatch slots, one generated machine-code stub per slot, and a
//! per-thread pointer to the current vendor's dispatch table. On the server side, the `server`
//! module routes GLX protocol requests to the vendor that owns the screen, resource or context
//! tag each request names.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod arch;

pub mod current;
pub use crate::current::StorageModel;

pub mod dispatch;

#[cfg(unix)]
pub mod entry;
#[cfg(unix)]
pub mod execmem;

pub mod error;
pub use crate::error::Error;

pub mod server;
pub use crate::server::GlxServer;

mod slot;
pub use crate::slot::{Slot, SlotRegistry, MAX_SLOTS};

mod table;
pub use crate::table::{DispatchTable, GetProcAddress};

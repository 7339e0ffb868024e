// glvnd/src/table.rs
//
//! Vendor dispatch tables.

use crate::slot::{Slot, SlotRegistry, MAX_SLOTS};

use std::ffi::{CStr, CString};
use std::fmt::{self, Debug, Formatter};
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Looks up a vendor's implementation of an entry point. Returns null if the vendor doesn't
/// provide it.
pub type GetProcAddress = dyn Fn(&CStr) -> *const c_void + Send + Sync;

type NoopFn = unsafe extern "C" fn() -> usize;

/// The function every slot points at when no vendor implementation is available.
///
/// It ignores its arguments, which is harmless under the C calling convention.
unsafe extern "C" fn noop_entry() -> usize {
    0
}

#[repr(C)]
pub(crate) struct NoopTable([NoopFn; MAX_SLOTS]);

/// The table that is current on threads without a context.
pub(crate) static NOOP_TABLE: NoopTable = NoopTable([noop_entry as NoopFn; MAX_SLOTS]);

#[inline]
pub(crate) fn noop_function() -> *mut c_void {
    noop_entry as NoopFn as *mut c_void
}

#[inline]
pub(crate) fn noop_table() -> *const c_void {
    ptr::addr_of!(NOOP_TABLE) as *const c_void
}

/// One vendor's table of function pointers, indexed by `Slot`.
///
/// The backing array covers every possible slot from the start, so its address is stable for
/// the lifetime of the table. Slots the vendor hasn't been asked about yet point at a no-op.
pub struct DispatchTable {
    entries: Box<[AtomicPtr<c_void>]>,
    resolved: AtomicUsize,
    get_proc_address: Box<GetProcAddress>,
}

impl DispatchTable {
    pub fn new<F>(get_proc_address: F) -> DispatchTable
    where
        F: Fn(&CStr) -> *const c_void + Send + Sync + 'static,
    {
        let entries = (0..MAX_SLOTS)
            .map(|_| AtomicPtr::new(noop_function()))
            .collect();
        DispatchTable {
            entries,
            resolved: AtomicUsize::new(0),
            get_proc_address: Box::new(get_proc_address),
        }
    }

    /// The address that stubs index into.
    #[inline]
    pub fn as_ptr(&self) -> *const c_void {
        self.entries.as_ptr() as *const c_void
    }

    #[inline]
    pub fn entry(&self, slot: Slot) -> *const c_void {
        match self.entries.get(slot.index()) {
            Some(entry) => entry.load(Ordering::Acquire),
            None => ptr::null(),
        }
    }

    /// The number of registry slots that have been looked up in this table.
    #[inline]
    pub fn resolved_len(&self) -> usize {
        self.resolved.load(Ordering::Acquire)
    }

    /// Looks up every slot the registry has assigned since the last fix-up.
    ///
    /// Callers serialize fix-ups through the registry lock.
    pub(crate) fn fix_up(&self, registry: &SlotRegistry) {
        let first = self.resolved_len();
        if first >= registry.len() {
            return;
        }

        for (slot, name) in registry.iter_from(first) {
            let function = match CString::new(name) {
                Ok(name) => (self.get_proc_address)(&name),
                Err(_) => ptr::null(),
            };
            let function = if function.is_null() { noop_function() } else { function as *mut c_void };
            self.entries[slot.index()].store(function, Ordering::Release);
        }

        trace!("glvnd: fixed up dispatch table slots {}..{}", first, registry.len());
        self.resolved.store(registry.len(), Ordering::Release);
    }
}

impl Debug for DispatchTable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("address", &self.as_ptr())
            .field("resolved", &self.resolved_len())
            .finish()
    }
}

// glvnd/src/dispatch.rs
//
//! The process-wide entry point and dispatch table state.
//!
//! Window-system libraries use this module to hand out entry points to applications and to make
//! a vendor's dispatch table current when one of its contexts becomes current.

use crate::current;
#[cfg(native_entry)]
use crate::current::StorageModel;
#[cfg(native_entry)]
use crate::entry::NativeEntryPoints;
use crate::slot::{Slot, SlotRegistry};
use crate::table::DispatchTable;

use std::cell::RefCell;
use std::ffi::CStr;
use std::ops::Range;
use std::os::raw::c_void;
use std::sync::{Arc, Mutex, Weak};

struct DispatchState {
    registry: SlotRegistry,
    tables: Vec<Weak<DispatchTable>>,
    #[cfg(native_entry)]
    entry_points: NativeEntryPoints,
}

lazy_static! {
    static ref DISPATCH_STATE: Mutex<DispatchState> = Mutex::new(DispatchState::new());
}

thread_local! {
    // Keeps the current table alive for as long as the stubs may read it.
    static CURRENT_OWNER: RefCell<Option<Arc<DispatchTable>>> = const { RefCell::new(None) };
}

impl DispatchState {
    fn new() -> DispatchState {
        let registry = SlotRegistry::with_static_entries();

        #[cfg(native_entry)]
        let entry_points = {
            let mut entry_points = match NativeEntryPoints::new(StorageModel::detect()) {
                Ok(entry_points) => entry_points,
                Err(err) => panic!("Failed to reserve executable memory for entry points: {}", err),
            };
            for (slot, _) in registry.iter_from(0) {
                if let Err(err) = entry_points.generate(slot) {
                    panic!("Failed to generate the entry point for slot {}: {}", slot.0, err);
                }
            }
            entry_points
        };

        debug!("glvnd: dispatch initialized with {} static entry points", registry.len());
        DispatchState {
            registry,
            tables: vec![],
            #[cfg(native_entry)]
            entry_points,
        }
    }

    fn assign(&mut self, name: &str) -> Option<Slot> {
        let known = self.registry.len();
        let slot = match self.registry.assign(name) {
            Ok(slot) => slot,
            Err(err) => {
                warn!("glvnd: no dispatch slot for {}: {}", name, err);
                return None;
            }
        };

        // A new slot has to be resolved in every live table before its stub can reach them.
        if self.registry.len() > known {
            debug!("glvnd: assigned dynamic slot {} to {}", slot.0, name);
            let registry = &self.registry;
            self.tables.retain(|table| match table.upgrade() {
                Some(table) => {
                    table.fix_up(registry);
                    true
                }
                None => false,
            });
        }
        Some(slot)
    }

    #[cfg(native_entry)]
    fn stub(&mut self, slot: Slot) -> Option<*const c_void> {
        match self.entry_points.generate(slot) {
            Ok(address) => Some(address),
            Err(err) => {
                error!("glvnd: couldn't generate the entry point for slot {}: {}", slot.0, err);
                None
            }
        }
    }

    #[cfg(not(native_entry))]
    fn stub(&mut self, _: Slot) -> Option<*const c_void> {
        None
    }
}

/// Sets up the static entry points. Calling this is optional; every other function here
/// initializes on first use.
///
/// # Panics
///
/// Panics if executable memory for the entry points can't be obtained.
pub fn init() {
    lazy_static::initialize(&DISPATCH_STATE);
}

/// Returns the slot for `name`, assigning a new one the first time a name is seen.
///
/// This is all that's needed on targets without generated entry points: pass the slot to
/// `current::lookup()` to find the calling thread's implementation.
pub fn slot(name: &str) -> Option<Slot> {
    current::check_multithreaded();
    DISPATCH_STATE.lock().unwrap().assign(name)
}

/// Returns the entry point for `name`, generating one if needed.
///
/// Returns `None` if every slot is taken or this target can't generate entry points.
pub fn get_proc_address(name: &str) -> Option<*const c_void> {
    current::check_multithreaded();
    let mut state = DISPATCH_STATE.lock().unwrap();
    let slot = state.assign(name)?;
    state.stub(slot)
}

/// Creates a dispatch table for a vendor. `get_proc_address` is asked for each entry point the
/// first time a table containing it is made current.
pub fn create_table<F>(get_proc_address: F) -> Arc<DispatchTable>
where
    F: Fn(&CStr) -> *const c_void + Send + Sync + 'static,
{
    let table = Arc::new(DispatchTable::new(get_proc_address));
    let mut state = DISPATCH_STATE.lock().unwrap();
    state.tables.retain(|table| table.strong_count() > 0);
    state.tables.push(Arc::downgrade(&table));
    table
}

/// How many tables the dispatch state is tracking, dead or alive.
#[cfg(test)]
pub(crate) fn tracked_tables() -> usize {
    DISPATCH_STATE.lock().unwrap().tables.len()
}

/// Makes `table` the calling thread's dispatch table.
pub fn make_current(table: &Arc<DispatchTable>) {
    {
        let state = DISPATCH_STATE.lock().unwrap();
        table.fix_up(&state.registry);
    }

    current::set_current(table.as_ptr());
    // The previous table is released only once it can no longer be reached.
    let previous = CURRENT_OWNER.with(|owner| owner.borrow_mut().replace(table.clone()));
    drop(previous);
}

/// Switches the calling thread back to the no-op table.
pub fn lose_current() {
    current::set_current(std::ptr::null());
    let previous = CURRENT_OWNER.with(|owner| owner.borrow_mut().take());
    drop(previous);
}

/// The calling thread's dispatch table, if one is current.
pub fn current_table() -> Option<Arc<DispatchTable>> {
    CURRENT_OWNER.with(|owner| owner.borrow().clone())
}

/// The address range that generated entry points occupy.
#[cfg(native_entry)]
pub fn public_entry_range() -> Option<Range<usize>> {
    let state = DISPATCH_STATE.lock().unwrap();
    let start = state.entry_points.public_entry_start() as usize;
    let end = state.entry_points.public_entry_end() as usize;
    Some(start..end)
}

#[cfg(not(native_entry))]
pub fn public_entry_range() -> Option<Range<usize>> {
    None
}

/// Returns the slot whose entry point starts at `address`.
#[cfg(native_entry)]
pub fn slot_for_address(address: *const c_void) -> Option<Slot> {
    DISPATCH_STATE.lock().unwrap().entry_points.slot_for_address(address)
}

#[cfg(not(native_entry))]
pub fn slot_for_address(_: *const c_void) -> Option<Slot> {
    None
}

// glvnd/src/current.rs
//
//! The calling thread's current dispatch table.
//!
//! Two places hold it. Every thread has its own cell, which is what the thread-local stubs read
//! at a fixed offset from the thread pointer. There is also a process-wide pointer, which stays
//! valid while only one thread has ever made a table current. Once a second thread does, the
//! global is cleared for good, and the thread-specific stubs fall back to asking
//! `resolve_current()`. Looking up the current table or an entry point counts as using it, so a
//! second thread that only calls functions also clears the global.

use crate::slot::{Slot, MAX_SLOTS};
use crate::table::{noop_table, NOOP_TABLE};
use crate::Error;

use std::cell::Cell;
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
#[cfg(tls_entry)]
use std::sync::OnceLock;

thread_local! {
    static CURRENT_TABLE: Cell<*const c_void> = const {
        Cell::new(ptr::addr_of!(NOOP_TABLE) as *const c_void)
    };
    // Set once this thread has been counted against `CLAIMED`.
    static SEEN: Cell<bool> = const { Cell::new(false) };
}

static CURRENT_GLOBAL: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static MULTITHREADED: AtomicBool = AtomicBool::new(false);
// Set by the first thread to use the dispatch state.
static CLAIMED: AtomicBool = AtomicBool::new(false);
#[cfg(tls_entry)]
static TLS_OFFSET: OnceLock<isize> = OnceLock::new();

/// How generated stubs find the current table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageModel {
    /// Read the thread's cell directly, relative to the thread pointer.
    ThreadLocal,
    /// Read the process-wide pointer and call the resolver when it is null.
    ThreadSpecific,
}

impl StorageModel {
    /// The model this build generates stubs for.
    pub fn detect() -> StorageModel {
        #[cfg(tls_entry)]
        {
            let offset = tls_offset();
            if in_static_tls_block(offset) {
                return StorageModel::ThreadLocal;
            }
            warn!("glvnd: dispatch cell is at TLS offset {:#x}, outside the static TLS block; \
                   using thread-specific entry points",
                  offset);
        }
        StorageModel::ThreadSpecific
    }
}

/// Makes `table` current on the calling thread. Null means the no-op table.
pub(crate) fn set_current(table: *const c_void) {
    let table = if table.is_null() { noop_table() } else { table };

    #[cfg(tls_entry)]
    check_tls_offset();

    check_multithreaded();
    CURRENT_TABLE.with(|cell| cell.set(table));

    if MULTITHREADED.load(Ordering::SeqCst) {
        CURRENT_GLOBAL.store(ptr::null_mut(), Ordering::SeqCst);
        return;
    }

    CURRENT_GLOBAL.store(table as *mut c_void, Ordering::SeqCst);
    // Another thread may have flipped the flag between the check and the store.
    if MULTITHREADED.load(Ordering::SeqCst) {
        CURRENT_GLOBAL.store(ptr::null_mut(), Ordering::SeqCst);
    }
}

/// The table current on the calling thread, or null if no vendor table is current.
pub fn get_current() -> *const c_void {
    check_multithreaded();
    let table = resolve_current();
    if table == noop_table() {
        ptr::null()
    } else {
        table
    }
}

/// Returns the calling thread's table, which is the no-op table if nothing is current.
///
/// This is what the thread-specific stubs call on their slow path.
pub(crate) extern "C" fn resolve_current() -> *const c_void {
    CURRENT_TABLE.try_with(|cell| cell.get()).unwrap_or_else(|_| noop_table())
}

/// Looks up the calling thread's function for `slot`. Returns null for out of range slots.
///
/// This is the portable path for targets without generated stubs.
pub fn lookup(slot: Slot) -> *const c_void {
    check_multithreaded();
    if slot.index() >= MAX_SLOTS {
        return ptr::null();
    }
    // The current table is either the no-op table or a table that the thread keeps alive while
    // it is current. Both cover every slot.
    unsafe {
        let entries = resolve_current() as *const *const c_void;
        *entries.add(slot.index())
    }
}

/// Whether more than one thread has ever made a table current.
pub fn is_multithreaded() -> bool {
    MULTITHREADED.load(Ordering::SeqCst)
}

/// The address the thread-specific stubs read the process-wide pointer from.
#[inline]
pub(crate) fn global_address() -> usize {
    ptr::addr_of!(CURRENT_GLOBAL) as usize
}

/// The process-wide current pointer. Null once the process is multithreaded.
#[cfg(test)]
pub(crate) fn global_current() -> *const c_void {
    CURRENT_GLOBAL.load(Ordering::SeqCst)
}

/// Notes that the calling thread uses the dispatch state, and clears the global pointer for good
/// the first time a second thread does. Doesn't allocate or lock.
pub(crate) fn check_multithreaded() {
    if MULTITHREADED.load(Ordering::Relaxed) {
        return;
    }
    if SEEN.with(|seen| seen.replace(true)) {
        return;
    }
    if CLAIMED.swap(true, Ordering::SeqCst) && !MULTITHREADED.swap(true, Ordering::SeqCst) {
        debug!("glvnd: a second thread is using dispatch; disabling the global dispatch pointer");
        CURRENT_GLOBAL.store(ptr::null_mut(), Ordering::SeqCst);
    }
}

/// Puts the process back in the single-threaded state, with the calling thread not yet counted.
#[cfg(test)]
pub(crate) fn reset_thread_latch() {
    SEEN.with(|seen| seen.set(false));
    CLAIMED.store(false, Ordering::SeqCst);
    MULTITHREADED.store(false, Ordering::SeqCst);
    CURRENT_GLOBAL.store(ptr::null_mut(), Ordering::SeqCst);
}

/// Returns the offset of this thread's current-table cell from the thread pointer, and pins it
/// as the offset every thread must share.
#[cfg(tls_entry)]
pub(crate) fn pin_tls_offset() -> Result<isize, Error> {
    let offset = tls_offset();
    let pinned = *TLS_OFFSET.get_or_init(|| offset);
    if pinned != offset {
        return Err(Error::ThreadLocalStorageUnavailable);
    }
    Ok(pinned)
}

#[cfg(not(tls_entry))]
pub(crate) fn pin_tls_offset() -> Result<isize, Error> {
    Err(Error::ThreadLocalStorageUnavailable)
}

#[cfg(tls_entry)]
fn check_tls_offset() {
    if let Some(&pinned) = TLS_OFFSET.get() {
        let offset = tls_offset();
        if offset != pinned {
            // Every generated stub would read the wrong address on this thread.
            error!("glvnd: thread-local dispatch cell moved from offset {} to {}; aborting",
                   pinned,
                   offset);
            std::process::abort();
        }
    }
}

/// Bounds the distance between the thread pointer and the static TLS block. Dynamically
/// allocated TLS (libraries loaded with `dlopen`) lands much further away, in the heap.
#[cfg(tls_entry)]
const STATIC_TLS_LIMIT: isize = 1 << 24;

// x86-64 places the static block below the thread pointer, AArch64 above it.
#[cfg(all(tls_entry, target_arch = "x86_64"))]
fn in_static_tls_block(offset: isize) -> bool {
    offset < 0 && offset > -STATIC_TLS_LIMIT
}

#[cfg(all(tls_entry, target_arch = "aarch64"))]
fn in_static_tls_block(offset: isize) -> bool {
    offset > 0 && offset < STATIC_TLS_LIMIT
}

#[cfg(tls_entry)]
fn tls_offset() -> isize {
    let cell = CURRENT_TABLE.with(|cell| cell.as_ptr() as isize);
    cell - thread_pointer() as isize
}

#[cfg(all(tls_entry, target_arch = "x86_64"))]
fn thread_pointer() -> usize {
    let pointer: usize;
    unsafe {
        std::arch::asm!("mov {}, qword ptr fs:[0]",
                        out(reg) pointer,
                        options(nostack, readonly, preserves_flags));
    }
    pointer
}

#[cfg(all(tls_entry, target_arch = "aarch64"))]
fn thread_pointer() -> usize {
    let pointer: usize;
    unsafe {
        std::arch::asm!("mrs {}, tpidr_el0",
                        out(reg) pointer,
                        options(nomem, nostack, preserves_flags));
    }
    pointer
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::thread;

    #[test]
    #[serial]
    fn test_current_is_per_thread() {
        let table = [7usize; MAX_SLOTS];
        let address = table.as_ptr() as usize;

        thread::spawn(move || {
            set_current(address as *const c_void);
            assert_eq!(get_current() as usize, address);
            assert_eq!(lookup(Slot(3)) as usize, 7);
            set_current(ptr::null());
            assert!(get_current().is_null());
        }).join().unwrap();

        assert!(get_current().is_null());
    }

    #[test]
    #[serial]
    fn test_second_thread_disables_global() {
        thread::spawn(|| set_current(ptr::null())).join().unwrap();
        thread::spawn(|| set_current(ptr::null())).join().unwrap();
        assert!(is_multithreaded());
        assert!(global_current().is_null());

        // The global never comes back once cleared.
        set_current(ptr::null());
        assert!(global_current().is_null());
    }

    #[test]
    #[serial]
    fn test_idle_thread_stops_using_the_global() {
        reset_thread_latch();
        let table = [7usize; MAX_SLOTS];
        set_current(table.as_ptr() as *const c_void);
        assert_eq!(global_current(), table.as_ptr() as *const c_void);

        // Never makes anything current, but must not see the first thread's table.
        let seen = thread::spawn(|| (get_current() as usize, lookup(Slot(3)) as usize))
            .join()
            .unwrap();
        assert_eq!(seen.0, 0);
        assert_ne!(seen.1, 7);
        assert!(is_multithreaded());
        assert!(global_current().is_null());

        set_current(ptr::null());
    }

    #[test]
    #[serial]
    fn test_first_thread_is_counted_once() {
        reset_thread_latch();
        for _ in 0..4 {
            set_current(ptr::null());
            get_current();
            lookup(Slot(0));
        }
        assert!(SEEN.with(Cell::get));
        assert!(CLAIMED.load(Ordering::SeqCst));
        assert!(!is_multithreaded());

        thread::spawn(|| lookup(Slot(0)) as usize).join().unwrap();
        assert!(is_multithreaded());
    }

    #[test]
    #[serial]
    fn test_lookup_out_of_range() {
        assert!(lookup(Slot(MAX_SLOTS as u32)).is_null());
    }

    #[test]
    fn test_fresh_thread_resolves_to_noop() {
        let resolved = thread::spawn(|| resolve_current() as usize).join().unwrap();
        assert_eq!(resolved, noop_table() as usize);
    }

    #[cfg(tls_entry)]
    #[test]
    fn test_tls_offset_is_shared() {
        let here = pin_tls_offset().unwrap();
        let there = thread::spawn(|| pin_tls_offset().unwrap()).join().unwrap();
        assert_eq!(here, there);
    }
}

// glvnd/src/arch/mod.rs
//
//! Machine code templates for entry point stubs.
//!
//! Every architecture provides the same thing: given a slot and the addresses a stub needs, write
//! a trampoline that finds the calling thread's dispatch table and jumps through it. Writing a
//! stub into a buffer is plain byte manipulation and works on any host; only running one needs
//! the matching CPU.

use crate::current::StorageModel;
use crate::slot::Slot;
use crate::Error;

pub mod aarch64;
pub mod x86_64;

#[cfg(x86_64_entry)]
pub use self::x86_64::X86_64 as Native;

#[cfg(aarch64_entry)]
pub use self::aarch64::Aarch64 as Native;

/// The addresses patched into every stub.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubParams {
    /// Offset of the thread's current-table cell from the thread pointer.
    pub tls_offset: isize,
    /// Address of the process-wide current-table pointer.
    pub current_global: usize,
    /// Address of the function that returns the calling thread's table.
    pub resolver: usize,
}

/// One architecture's stub encodings.
pub trait EntryTemplate {
    const NAME: &'static str;

    /// The distance between consecutive stubs. Always a power of two.
    fn stub_size(model: StorageModel) -> usize;

    /// Writes the stub for `slot` into `out`, which is exactly `stub_size(model)` bytes long.
    fn write_stub(model: StorageModel, slot: Slot, params: &StubParams, out: &mut [u8])
                  -> Result<(), Error>;

    /// Makes freshly written code visible to instruction fetch at `executable`.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid for `len` bytes and refer to the same code.
    unsafe fn flush_instruction_cache(_writable: *const u8, _executable: *const u8, _len: usize) {}
}

/// Copies `template` into `out` and pads the rest of the stub with `fill`.
pub(crate) fn copy_template(template: &[u8], fill: u8, out: &mut [u8]) {
    debug_assert!(out.len() >= template.len());
    out[..template.len()].copy_from_slice(template);
    for byte in &mut out[template.len()..] {
        *byte = fill;
    }
}

#[inline]
pub(crate) fn patch_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn patch_u64(out: &mut [u8], offset: usize, value: u64) {
    out[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// The slot's byte offset as a 32-bit displacement.
pub(crate) fn slot_displacement(slot: Slot) -> Result<u32, Error> {
    i32::try_from(slot.index() * 8)
        .map(|offset| offset as u32)
        .map_err(|_| Error::InvalidSlot)
}

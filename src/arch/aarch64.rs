// glvnd/src/arch/aarch64.rs
//
//! Entry point stubs for AArch64 (AAPCS64).

use super::{copy_template, patch_u64, slot_displacement, EntryTemplate, StubParams};
use crate::current::StorageModel;
use crate::slot::Slot;
use crate::Error;

pub struct Aarch64;

/// Reads the current table at a fixed offset from `tpidr_el0` and branches through it. Only the
/// intra-procedure scratch registers are touched.
const TLS_TEMPLATE: [u8; 40] = [
    0x50, 0xd0, 0x3b, 0xd5, // mrs x16, tpidr_el0
    0xb1, 0x00, 0x00, 0x58, // ldr x17, tls_offset
    0x10, 0x6a, 0x71, 0xf8, // ldr x16, [x16, x17]
    0xb1, 0x00, 0x00, 0x58, // ldr x17, slot_offset
    0x10, 0x6a, 0x71, 0xf8, // ldr x16, [x16, x17]
    0x00, 0x02, 0x1f, 0xd6, // br x16
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // tls_offset: .quad
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // slot_offset: .quad
];
const TLS_PATCH_OFFSET: usize = 0x18;
const TLS_PATCH_SLOT: usize = 0x20;

/// Reads the process-wide current pointer. If it is null, saves the argument registers and the
/// frame, asks the resolver for this thread's table and branches back with it in x16.
const TSD_TEMPLATE: [u8; 152] = [
    0x10, 0x04, 0x00, 0x58, // ldr x16, current_global
    0x10, 0x02, 0x40, 0xf9, // ldr x16, [x16]
    0x90, 0x00, 0x00, 0xb4, // cbz x16, slow
    0x31, 0x04, 0x00, 0x58, // dispatch: ldr x17, slot_offset
    0x10, 0x6a, 0x71, 0xf8, // ldr x16, [x16, x17]
    0x00, 0x02, 0x1f, 0xd6, // br x16
    0xfd, 0x7b, 0xbf, 0xa9, // slow: stp x29, x30, [sp, #-16]!
    0xfd, 0x03, 0x00, 0x91, // mov x29, sp
    0xe0, 0x07, 0xbf, 0xa9, // stp x0, x1, [sp, #-16]!
    0xe2, 0x0f, 0xbf, 0xa9, // stp x2, x3, [sp, #-16]!
    0xe4, 0x17, 0xbf, 0xa9, // stp x4, x5, [sp, #-16]!
    0xe6, 0x1f, 0xbf, 0xa9, // stp x6, x7, [sp, #-16]!
    0xe8, 0x27, 0xbf, 0xa9, // stp x8, x9, [sp, #-16]!
    0xe0, 0x07, 0xbf, 0xad, // stp q0, q1, [sp, #-32]!
    0xe2, 0x0f, 0xbf, 0xad, // stp q2, q3, [sp, #-32]!
    0xe4, 0x17, 0xbf, 0xad, // stp q4, q5, [sp, #-32]!
    0xe6, 0x1f, 0xbf, 0xad, // stp q6, q7, [sp, #-32]!
    0x30, 0x02, 0x00, 0x58, // ldr x16, resolver
    0x00, 0x02, 0x3f, 0xd6, // blr x16
    0xf0, 0x03, 0x00, 0xaa, // mov x16, x0
    0xe6, 0x1f, 0xc1, 0xac, // ldp q6, q7, [sp], #32
    0xe4, 0x17, 0xc1, 0xac, // ldp q4, q5, [sp], #32
    0xe2, 0x0f, 0xc1, 0xac, // ldp q2, q3, [sp], #32
    0xe0, 0x07, 0xc1, 0xac, // ldp q0, q1, [sp], #32
    0xe8, 0x27, 0xc1, 0xa8, // ldp x8, x9, [sp], #16
    0xe6, 0x1f, 0xc1, 0xa8, // ldp x6, x7, [sp], #16
    0xe4, 0x17, 0xc1, 0xa8, // ldp x4, x5, [sp], #16
    0xe2, 0x0f, 0xc1, 0xa8, // ldp x2, x3, [sp], #16
    0xe0, 0x07, 0xc1, 0xa8, // ldp x0, x1, [sp], #16
    0xfd, 0x7b, 0xc1, 0xa8, // ldp x29, x30, [sp], #16
    0xe5, 0xff, 0xff, 0x17, // b dispatch
    0x1f, 0x20, 0x03, 0xd5, // nop
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // current_global: .quad
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // resolver: .quad
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // slot_offset: .quad
];
const TSD_PATCH_CURRENT_GLOBAL: usize = 0x80;
const TSD_PATCH_RESOLVER: usize = 0x88;
const TSD_PATCH_SLOT: usize = 0x90;

impl EntryTemplate for Aarch64 {
    const NAME: &'static str = "aarch64";

    fn stub_size(model: StorageModel) -> usize {
        match model {
            StorageModel::ThreadLocal => 64,
            StorageModel::ThreadSpecific => 256,
        }
    }

    fn write_stub(model: StorageModel, slot: Slot, params: &StubParams, out: &mut [u8])
                  -> Result<(), Error> {
        debug_assert_eq!(out.len(), Self::stub_size(model));
        let displacement = slot_displacement(slot)? as u64;
        // Padding decodes as `udf #0`.
        match model {
            StorageModel::ThreadLocal => {
                copy_template(&TLS_TEMPLATE, 0, out);
                patch_u64(out, TLS_PATCH_OFFSET, params.tls_offset as i64 as u64);
                patch_u64(out, TLS_PATCH_SLOT, displacement);
            }
            StorageModel::ThreadSpecific => {
                copy_template(&TSD_TEMPLATE, 0, out);
                patch_u64(out, TSD_PATCH_CURRENT_GLOBAL, params.current_global as u64);
                patch_u64(out, TSD_PATCH_RESOLVER, params.resolver as u64);
                patch_u64(out, TSD_PATCH_SLOT, displacement);
            }
        }
        Ok(())
    }

    #[cfg(target_arch = "aarch64")]
    unsafe fn flush_instruction_cache(writable: *const u8, executable: *const u8, len: usize) {
        use std::arch::asm;

        let ctr: u64;
        asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
        let dcache_line = 4usize << ((ctr >> 16) & 0xf);
        let icache_line = 4usize << (ctr & 0xf);

        // Clean the data cache through the view the stubs were written through, then invalidate
        // the instruction cache through the view they run from.
        let mut address = writable as usize & !(dcache_line - 1);
        while address < writable as usize + len {
            asm!("dc cvau, {}", in(reg) address, options(nostack, preserves_flags));
            address += dcache_line;
        }
        asm!("dsb ish", options(nostack, preserves_flags));

        let mut address = executable as usize & !(icache_line - 1);
        while address < executable as usize + len {
            asm!("ic ivau, {}", in(reg) address, options(nostack, preserves_flags));
            address += icache_line;
        }
        asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }
}

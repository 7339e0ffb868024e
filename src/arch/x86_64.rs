// glvnd/src/arch/x86_64.rs
//
//! Entry point stubs for x86-64 System V.

use super::{copy_template, patch_u32, patch_u64, slot_displacement, EntryTemplate, StubParams};
use crate::current::StorageModel;
use crate::slot::Slot;
use crate::Error;

pub struct X86_64;

const INT3: u8 = 0xcc;

/// Reads the current table out of the thread's static TLS block and jumps through it.
const TLS_TEMPLATE: [u8; 16] = [
    0x64, 0x48, 0x8b, 0x04, 0x25, 0x00, 0x00, 0x00, 0x00, // mov rax, qword ptr fs:[tls_offset]
    0xff, 0xa0, 0x00, 0x00, 0x00, 0x00,                   // jmp qword ptr [rax + slot * 8]
    0xcc,                                                 // int3
];
const TLS_PATCH_OFFSET: usize = 0x05;
const TLS_PATCH_SLOT: usize = 0x0b;

/// Reads the process-wide current pointer. If it is null, saves the argument registers, asks
/// the resolver for this thread's table and tries again with the answer in rax.
const TSD_TEMPLATE: [u8; 176] = [
    0x48, 0x8b, 0x05, 0x99, 0x00, 0x00, 0x00,       // mov rax, [rip + current_global]
    0x48, 0x8b, 0x00,                               // mov rax, [rax]
    0x48, 0x85, 0xc0,                               // test rax, rax
    0x74, 0x06,                                     // je slow
    0xff, 0xa0, 0x00, 0x00, 0x00, 0x00,             // dispatch: jmp [rax + slot * 8]
    0x57, 0x56, 0x52, 0x51, 0x41, 0x50, 0x41, 0x51, // slow: push rdi, rsi, rdx, rcx, r8, r9
    0x48, 0x81, 0xec, 0x88, 0x00, 0x00, 0x00,       // sub rsp, 0x88
    0x66, 0x0f, 0x7f, 0x04, 0x24,                   // movdqa [rsp], xmm0
    0x66, 0x0f, 0x7f, 0x4c, 0x24, 0x10,             // movdqa [rsp + 0x10], xmm1
    0x66, 0x0f, 0x7f, 0x54, 0x24, 0x20,             // movdqa [rsp + 0x20], xmm2
    0x66, 0x0f, 0x7f, 0x5c, 0x24, 0x30,             // movdqa [rsp + 0x30], xmm3
    0x66, 0x0f, 0x7f, 0x64, 0x24, 0x40,             // movdqa [rsp + 0x40], xmm4
    0x66, 0x0f, 0x7f, 0x6c, 0x24, 0x50,             // movdqa [rsp + 0x50], xmm5
    0x66, 0x0f, 0x7f, 0x74, 0x24, 0x60,             // movdqa [rsp + 0x60], xmm6
    0x66, 0x0f, 0x7f, 0x7c, 0x24, 0x70,             // movdqa [rsp + 0x70], xmm7
    0xff, 0x15, 0x4f, 0x00, 0x00, 0x00,             // call [rip + resolver]
    0x66, 0x0f, 0x6f, 0x04, 0x24,                   // movdqa xmm0, [rsp]
    0x66, 0x0f, 0x6f, 0x4c, 0x24, 0x10,             // movdqa xmm1, [rsp + 0x10]
    0x66, 0x0f, 0x6f, 0x54, 0x24, 0x20,             // movdqa xmm2, [rsp + 0x20]
    0x66, 0x0f, 0x6f, 0x5c, 0x24, 0x30,             // movdqa xmm3, [rsp + 0x30]
    0x66, 0x0f, 0x6f, 0x64, 0x24, 0x40,             // movdqa xmm4, [rsp + 0x40]
    0x66, 0x0f, 0x6f, 0x6c, 0x24, 0x50,             // movdqa xmm5, [rsp + 0x50]
    0x66, 0x0f, 0x6f, 0x74, 0x24, 0x60,             // movdqa xmm6, [rsp + 0x60]
    0x66, 0x0f, 0x6f, 0x7c, 0x24, 0x70,             // movdqa xmm7, [rsp + 0x70]
    0x48, 0x81, 0xc4, 0x88, 0x00, 0x00, 0x00,       // add rsp, 0x88
    0x41, 0x59, 0x41, 0x58, 0x59, 0x5a, 0x5e, 0x5f, // pop r9, r8, rcx, rdx, rsi, rdi
    0xe9, 0x73, 0xff, 0xff, 0xff,                   // jmp dispatch
    0xcc, 0xcc, 0xcc, 0xcc,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // current_global: .quad
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // resolver: .quad
];
const TSD_PATCH_SLOT: usize = 0x11;
const TSD_PATCH_CURRENT_GLOBAL: usize = 0xa0;
const TSD_PATCH_RESOLVER: usize = 0xa8;

impl EntryTemplate for X86_64 {
    const NAME: &'static str = "x86_64";

    fn stub_size(model: StorageModel) -> usize {
        match model {
            StorageModel::ThreadLocal => 16,
            StorageModel::ThreadSpecific => 256,
        }
    }

    fn write_stub(model: StorageModel, slot: Slot, params: &StubParams, out: &mut [u8])
                  -> Result<(), Error> {
        debug_assert_eq!(out.len(), Self::stub_size(model));
        let displacement = slot_displacement(slot)?;
        match model {
            StorageModel::ThreadLocal => {
                // fs-relative addressing takes a sign-extended 32-bit displacement.
                let tls_offset = i32::try_from(params.tls_offset)
                    .map_err(|_| Error::ThreadLocalStorageUnavailable)?;
                copy_template(&TLS_TEMPLATE, INT3, out);
                patch_u32(out, TLS_PATCH_OFFSET, tls_offset as u32);
                patch_u32(out, TLS_PATCH_SLOT, displacement);
            }
            StorageModel::ThreadSpecific => {
                copy_template(&TSD_TEMPLATE, INT3, out);
                patch_u32(out, TSD_PATCH_SLOT, displacement);
                patch_u64(out, TSD_PATCH_CURRENT_GLOBAL, params.current_global as u64);
                patch_u64(out, TSD_PATCH_RESOLVER, params.resolver as u64);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_u64(bytes: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
    }

    #[test]
    fn test_templates_fit_their_stubs() {
        for &model in &[StorageModel::ThreadLocal, StorageModel::ThreadSpecific] {
            let size = X86_64::stub_size(model);
            assert!(size.is_power_of_two());
            let template_len = match model {
                StorageModel::ThreadLocal => TLS_TEMPLATE.len(),
                StorageModel::ThreadSpecific => TSD_TEMPLATE.len(),
            };
            assert!(template_len <= size);
        }
    }

    #[test]
    fn test_tls_stub_patches() {
        let params = StubParams { tls_offset: -0x40, ..StubParams::default() };
        let mut stub = [0; 16];
        X86_64::write_stub(StorageModel::ThreadLocal, Slot(300), &params, &mut stub).unwrap();
        assert_eq!(&stub[..5], &[0x64, 0x48, 0x8b, 0x04, 0x25]);
        assert_eq!(read_u32(&stub, TLS_PATCH_OFFSET) as i32, -0x40);
        assert_eq!(read_u32(&stub, TLS_PATCH_SLOT), 300 * 8);
        assert_eq!(stub[15], INT3);
    }

    #[test]
    fn test_tls_offset_out_of_range() {
        let params = StubParams { tls_offset: isize::MIN, ..StubParams::default() };
        let mut stub = [0; 16];
        assert_eq!(X86_64::write_stub(StorageModel::ThreadLocal, Slot(0), &params, &mut stub),
                   Err(Error::ThreadLocalStorageUnavailable));
    }

    #[test]
    fn test_tsd_stub_patches() {
        let params = StubParams {
            tls_offset: 0,
            current_global: 0x1122_3344_5566_7788,
            resolver: 0x0102_0304_0506_0708,
        };
        let mut stub = [0; 256];
        X86_64::write_stub(StorageModel::ThreadSpecific, Slot(5), &params, &mut stub).unwrap();
        assert_eq!(read_u32(&stub, TSD_PATCH_SLOT), 40);
        assert_eq!(read_u64(&stub, TSD_PATCH_CURRENT_GLOBAL), 0x1122_3344_5566_7788);
        assert_eq!(read_u64(&stub, TSD_PATCH_RESOLVER), 0x0102_0304_0506_0708);
        assert!(stub[TSD_TEMPLATE.len()..].iter().all(|&byte| byte == INT3));
    }
}

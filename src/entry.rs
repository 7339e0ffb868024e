// glvnd/src/entry.rs
//
//! The region of generated entry points.
//!
//! Stub `N` lives at `public_entry_start() + N * stub_size`, so addresses and slots convert into
//! each other with arithmetic alone.

use crate::arch::{EntryTemplate, StubParams};
use crate::current::{self, StorageModel};
use crate::execmem::ExecutableMemory;
use crate::slot::{Slot, MAX_SLOTS};
use crate::Error;

use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::slice;

/// Entry points for the architecture this crate was built for.
#[cfg(native_entry)]
pub type NativeEntryPoints = EntryPoints<crate::arch::Native>;

pub struct EntryPoints<T> where T: EntryTemplate {
    memory: ExecutableMemory,
    model: StorageModel,
    params: StubParams,
    stub_size: usize,
    generated: Vec<bool>,
    phantom: PhantomData<T>,
}

impl<T> EntryPoints<T> where T: EntryTemplate {
    /// Reserves room for `MAX_SLOTS` stubs that find the current table with `model`.
    pub fn new(model: StorageModel) -> Result<EntryPoints<T>, Error> {
        let tls_offset = match model {
            StorageModel::ThreadLocal => current::pin_tls_offset()?,
            StorageModel::ThreadSpecific => 0,
        };
        let params = StubParams {
            tls_offset,
            current_global: current::global_address(),
            resolver: current::resolve_current as usize,
        };
        EntryPoints::with_params(model, params)
    }

    /// Like `new`, but the stubs read the global pointer and call the resolver that `params`
    /// names.
    pub(crate) fn with_params(model: StorageModel, params: StubParams)
                              -> Result<EntryPoints<T>, Error> {
        let stub_size = T::stub_size(model);
        debug_assert!(stub_size.is_power_of_two());
        let memory = ExecutableMemory::new(MAX_SLOTS * stub_size)?;

        info!("glvnd: reserved {} {} entry points of {} bytes ({:?}{})",
              MAX_SLOTS,
              T::NAME,
              stub_size,
              model,
              if memory.is_dual_mapped() { ", dual mapped" } else { "" });

        Ok(EntryPoints {
            memory,
            model,
            params,
            stub_size,
            generated: vec![false; MAX_SLOTS],
            phantom: PhantomData,
        })
    }

    /// Writes the stub for `slot` if it doesn't exist yet and returns its address.
    pub fn generate(&mut self, slot: Slot) -> Result<*const c_void, Error> {
        let index = slot.index();
        if index >= MAX_SLOTS {
            return Err(Error::InvalidSlot);
        }
        if self.generated[index] {
            return Ok(self.stub_address(index));
        }

        let offset = index * self.stub_size;
        unsafe {
            let writable = self.memory.writable().add(offset);
            let stub = slice::from_raw_parts_mut(writable, self.stub_size);
            T::write_stub(self.model, slot, &self.params, stub)?;
            T::flush_instruction_cache(writable,
                                       self.memory.executable().add(offset),
                                       self.stub_size);
        }

        self.generated[index] = true;
        Ok(self.stub_address(index))
    }

    /// The address of `slot`'s stub, if it has been generated.
    pub fn address_of(&self, slot: Slot) -> Option<*const c_void> {
        match self.generated.get(slot.index()) {
            Some(true) => Some(self.stub_address(slot.index())),
            _ => None,
        }
    }

    /// Recognizes the start of a generated stub.
    pub fn slot_for_address(&self, address: *const c_void) -> Option<Slot> {
        let address = address as usize;
        let start = self.public_entry_start() as usize;
        if address < start || address >= self.public_entry_end() as usize {
            return None;
        }
        let offset = address - start;
        if offset & (self.stub_size - 1) != 0 {
            return None;
        }
        let index = offset / self.stub_size;
        if self.generated[index] {
            Some(Slot(index as u32))
        } else {
            None
        }
    }

    #[inline]
    pub fn public_entry_start(&self) -> *const c_void {
        self.memory.executable() as *const c_void
    }

    #[inline]
    pub fn public_entry_end(&self) -> *const c_void {
        self.stub_address(MAX_SLOTS)
    }

    #[inline]
    pub fn stub_size(&self) -> usize {
        self.stub_size
    }

    #[inline]
    pub fn model(&self) -> StorageModel {
        self.model
    }

    #[inline]
    fn stub_address(&self, index: usize) -> *const c_void {
        self.memory.executable().wrapping_add(index * self.stub_size) as *const c_void
    }
}

impl<T> Debug for EntryPoints<T> where T: EntryTemplate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("EntryPoints")
            .field("arch", &T::NAME)
            .field("model", &self.model)
            .field("start", &self.public_entry_start())
            .field("stub_size", &self.stub_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86_64::X86_64;

    // Generating and inspecting stubs never executes them, so any template works on any host.
    fn thread_specific() -> EntryPoints<X86_64> {
        EntryPoints::new(StorageModel::ThreadSpecific).unwrap()
    }

    #[test]
    fn test_addresses_are_arithmetic() {
        let mut entry_points = thread_specific();
        let first = entry_points.generate(Slot(0)).unwrap();
        let tenth = entry_points.generate(Slot(10)).unwrap();
        assert_eq!(first, entry_points.public_entry_start());
        assert_eq!(tenth as usize - first as usize, 10 * entry_points.stub_size());
        assert_eq!(entry_points.public_entry_end() as usize - first as usize,
                   MAX_SLOTS * entry_points.stub_size());
    }

    #[test]
    fn test_generate_is_idempotent() {
        let mut entry_points = thread_specific();
        let a = entry_points.generate(Slot(42)).unwrap();
        let b = entry_points.generate(Slot(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(entry_points.address_of(Slot(42)), Some(a));
        assert_eq!(entry_points.address_of(Slot(43)), None);
    }

    #[test]
    fn test_slot_for_address() {
        let mut entry_points = thread_specific();
        let address = entry_points.generate(Slot(7)).unwrap();
        assert_eq!(entry_points.slot_for_address(address), Some(Slot(7)));
        // Inside the stub, not at its start.
        assert_eq!(entry_points.slot_for_address((address as usize + 1) as *const c_void), None);
        // Reserved but never generated.
        assert_eq!(entry_points.slot_for_address(entry_points.public_entry_start()), None);
        assert_eq!(entry_points.slot_for_address(entry_points.public_entry_end()), None);
    }

    #[test]
    fn test_invalid_slot() {
        let mut entry_points = thread_specific();
        assert_eq!(entry_points.generate(Slot(MAX_SLOTS as u32)), Err(Error::InvalidSlot));
    }
}

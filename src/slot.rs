// glvnd/src/slot.rs
//
//! Assignment of dispatch table slots to entry point names.
//!
//! A slot means the same function in every vendor's dispatch table. Slots are handed out in
//! order, starting with the entry points the Khronos registry knows about at build time, and are
//! never reused for the life of the process.

use crate::Error;

use fnv::FnvHashMap;
use std::mem;
use std::os::raw::c_void;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/static_entries.rs"));
}

pub(crate) use self::generated::STATIC_ENTRY_POINTS;

/// The number of slots in every dispatch table and in the generated entry point region.
pub const MAX_SLOTS: usize = 4096;

/// An index into every dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

impl Slot {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The offset of this slot's function pointer from the start of a dispatch table.
    #[inline]
    pub fn byte_offset(self) -> usize {
        self.index() * mem::size_of::<*const c_void>()
    }
}

/// Maps entry point names to slots.
pub struct SlotRegistry {
    names: Vec<Box<str>>,
    slots: FnvHashMap<Box<str>, Slot>,
    static_count: usize,
    capacity: usize,
}

impl SlotRegistry {
    /// Creates an empty registry that can hold `capacity` slots.
    pub fn with_capacity(capacity: usize) -> SlotRegistry {
        SlotRegistry {
            names: vec![],
            slots: FnvHashMap::default(),
            static_count: 0,
            capacity,
        }
    }

    /// Creates a registry with every entry point from the GL registry already assigned.
    pub fn with_static_entries() -> SlotRegistry {
        let mut registry = SlotRegistry::with_capacity(MAX_SLOTS);
        for name in STATIC_ENTRY_POINTS {
            if let Err(err) = registry.assign(name) {
                error!("glvnd: couldn't assign a static slot to {}: {}", name, err);
                break;
            }
        }
        registry.static_count = registry.len();
        registry
    }

    #[inline]
    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.slots.get(name).copied()
    }

    /// Returns the slot for `name`, assigning the next free one if the name is new.
    pub fn assign(&mut self, name: &str) -> Result<Slot, Error> {
        if let Some(slot) = self.lookup(name) {
            return Ok(slot);
        }
        if name.is_empty() || name.contains('\0') {
            return Err(Error::InvalidEntryPointName);
        }
        if self.names.len() >= self.capacity {
            return Err(Error::SlotsExhausted);
        }

        let slot = Slot(self.names.len() as u32);
        let name: Box<str> = name.into();
        self.names.push(name.clone());
        self.slots.insert(name, slot);
        Ok(slot)
    }

    #[inline]
    pub fn name(&self, slot: Slot) -> Option<&str> {
        self.names.get(slot.index()).map(|name| &**name)
    }

    /// The number of slots assigned so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of slots that were assigned from the build-time entry point list.
    #[inline]
    pub fn static_count(&self) -> usize {
        self.static_count
    }

    /// Iterates over `(slot, name)` pairs starting at `first`.
    pub fn iter_from(&self, first: usize) -> impl Iterator<Item = (Slot, &str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .skip(first)
            .map(|(index, name)| (Slot(index as u32), &**name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_is_stable() {
        let mut registry = SlotRegistry::with_capacity(8);
        let a = registry.assign("glFoo").unwrap();
        let b = registry.assign("glBar").unwrap();
        assert_eq!(a, Slot(0));
        assert_eq!(b, Slot(1));
        assert_eq!(registry.assign("glFoo").unwrap(), a);
        assert_eq!(registry.name(b), Some("glBar"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_full() {
        let mut registry = SlotRegistry::with_capacity(2);
        registry.assign("glA").unwrap();
        registry.assign("glB").unwrap();
        assert_eq!(registry.assign("glC"), Err(Error::SlotsExhausted));
        // Names that already have a slot still resolve.
        assert_eq!(registry.assign("glA"), Ok(Slot(0)));
    }

    #[test]
    fn test_bad_names() {
        let mut registry = SlotRegistry::with_capacity(2);
        assert_eq!(registry.assign(""), Err(Error::InvalidEntryPointName));
        assert_eq!(registry.assign("gl\0Foo"), Err(Error::InvalidEntryPointName));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_static_entries() {
        let registry = SlotRegistry::with_static_entries();
        assert!(registry.static_count() > 0);
        assert_eq!(registry.static_count(), registry.len());
        assert!(registry.lookup("glClear").is_some());
        assert!(registry.lookup("glVertex3f").is_some());
        assert_eq!(registry.name(Slot(0)), Some(STATIC_ENTRY_POINTS[0]));
    }

    #[test]
    fn test_byte_offset_scales_by_pointer_width() {
        assert_eq!(Slot(3).byte_offset(), 3 * mem::size_of::<usize>());
    }
}

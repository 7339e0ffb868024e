// glvnd/src/server/tags.rs
//
//! Per-client context tags.
//!
//! Tags are handed out here rather than by vendors, so one vendor can never be handed a tag that
//! another vendor allocated, nor the private data that goes with it.

use super::abi::TagPrivate;
use super::host::Xid;
use super::vendor::VendorId;

/// A client-visible context tag. Zero is never a valid tag.
pub type ContextTag = u32;

const INITIAL_TAG_COUNT: usize = 16;

/// The state behind one context tag.
#[derive(Clone, Debug, Default)]
pub struct TagInfo {
    pub tag: ContextTag,
    /// The owning vendor. `None` marks a free entry.
    pub vendor: Option<VendorId>,
    pub data: TagPrivate,
    pub context: Xid,
    pub drawable: Xid,
    pub read_drawable: Xid,
}

impl TagInfo {
    fn empty(tag: ContextTag) -> TagInfo {
        TagInfo { tag, ..TagInfo::default() }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.vendor.is_none()
    }
}

/// One client's context tags. Tag `n` lives at index `n - 1`.
#[derive(Debug, Default)]
pub struct ContextTagTable {
    entries: Vec<TagInfo>,
}

impl ContextTagTable {
    pub fn new() -> ContextTagTable {
        ContextTagTable::default()
    }

    /// Claims the first free tag for `vendor`, growing the table if every tag is taken.
    pub fn allocate(&mut self, vendor: VendorId) -> &mut TagInfo {
        let index = match self.entries.iter().position(TagInfo::is_free) {
            Some(index) => index,
            None => {
                let index = self.entries.len();
                let new_len = if index == 0 { INITIAL_TAG_COUNT } else { index * 2 };
                self.entries.extend((index..new_len).map(|index| TagInfo::empty(index as u32 + 1)));
                index
            }
        };

        let entry = &mut self.entries[index];
        *entry = TagInfo::empty(index as ContextTag + 1);
        entry.vendor = Some(vendor);
        entry
    }

    /// Returns the entry for `tag` if it is live.
    pub fn lookup(&self, tag: ContextTag) -> Option<&TagInfo> {
        let index = (tag as usize).checked_sub(1)?;
        self.entries.get(index).filter(|entry| !entry.is_free())
    }

    pub fn lookup_mut(&mut self, tag: ContextTag) -> Option<&mut TagInfo> {
        let index = (tag as usize).checked_sub(1)?;
        self.entries.get_mut(index).filter(|entry| !entry.is_free())
    }

    /// Releases `tag`. The table never shrinks.
    pub fn free(&mut self, tag: ContextTag) {
        if let Some(entry) = (tag as usize).checked_sub(1).and_then(|index| self.entries.get_mut(index)) {
            *entry = TagInfo::empty(tag);
        }
    }

    /// The number of tag entries, free or not.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_free()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::rc::Rc;

    const VENDOR: VendorId = VendorId(0);

    #[test]
    fn test_tags_start_at_one() {
        let mut table = ContextTagTable::new();
        assert_eq!(table.allocate(VENDOR).tag, 1);
        assert_eq!(table.allocate(VENDOR).tag, 2);
        assert_eq!(table.capacity(), INITIAL_TAG_COUNT);
        assert!(table.lookup(0).is_none());
    }

    #[test]
    fn test_grows_by_doubling() {
        let mut table = ContextTagTable::new();
        for _ in 0..INITIAL_TAG_COUNT + 1 {
            table.allocate(VENDOR);
        }
        assert_eq!(table.capacity(), INITIAL_TAG_COUNT * 2);
        assert_eq!(table.live_count(), INITIAL_TAG_COUNT + 1);
    }

    #[test]
    fn test_freed_tag_is_not_found() {
        let mut table = ContextTagTable::new();
        let entry = table.allocate(VENDOR);
        entry.context = 0x200001;
        entry.data = Some(Rc::new(5u32));
        let tag = entry.tag;

        table.free(tag);
        assert!(table.lookup(tag).is_none());
        assert!(table.lookup_mut(tag).is_none());

        // The slot is reused without any trace of its old contents.
        let entry = table.allocate(VendorId(1));
        assert_eq!(entry.tag, tag);
        assert_eq!(entry.context, 0);
        assert!(entry.data.is_none());
    }

    #[test]
    fn test_out_of_range_tags() {
        let mut table = ContextTagTable::new();
        table.allocate(VENDOR);
        assert!(table.lookup(INITIAL_TAG_COUNT as u32 + 1).is_none());
        assert!(table.lookup(u32::MAX).is_none());
        table.free(u32::MAX);
    }

    #[test]
    fn test_random_allocate_and_free() {
        let mut rng = rand::thread_rng();
        let mut table = ContextTagTable::new();
        let mut live: Vec<ContextTag> = vec![];

        for _ in 0..1000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let tag = table.allocate(VENDOR).tag;
                assert!(!live.contains(&tag));
                // The first free entry is always the one claimed.
                assert!((1..tag).all(|lower| live.contains(&lower)));
                live.push(tag);
            } else {
                let tag = live.swap_remove(rng.gen_range(0..live.len()));
                table.free(tag);
                assert!(table.lookup(tag).is_none());
            }
            assert_eq!(table.live_count(), live.len());
            assert!(live.iter().all(|&tag| table.lookup(tag).map(|entry| entry.tag) == Some(tag)));
        }
    }
}

// glvnd/src/server/mapping.rs
//
//! Which vendor owns what: XIDs, screens and per-client context tags.

use super::host::{AccessMode, ClientId, WindowSystem, Xid};
use super::tags::ContextTagTable;
use super::vendor::VendorId;

use fnv::FnvHashMap;

#[derive(Debug, Default)]
pub struct Mapping {
    xids: FnvHashMap<Xid, VendorId>,
    screens: Vec<Option<VendorId>>,
    clients: FnvHashMap<ClientId, ContextTagTable>,
}

impl Mapping {
    pub fn new(screen_count: usize) -> Mapping {
        Mapping { screens: vec![None; screen_count], ..Mapping::default() }
    }

    /// Records that `vendor` owns `id`. Fails for the null XID and for XIDs that already have an
    /// owner; the existing owner is kept.
    pub fn add_xid(&mut self, id: Xid, vendor: VendorId) -> bool {
        if id == 0 || self.xids.contains_key(&id) {
            return false;
        }
        self.xids.insert(id, vendor);
        true
    }

    /// Finds the vendor for `id`. XIDs that were never added may still be plain drawables, in
    /// which case the vendor of their screen owns them.
    pub fn get_xid(&self, host: &dyn WindowSystem, id: Xid) -> Option<VendorId> {
        if let Some(&vendor) = self.xids.get(&id) {
            return Some(vendor);
        }
        host.lookup_drawable(id, AccessMode::GET_ATTR)
            .and_then(|screen| self.screen_vendor(screen))
    }

    #[inline]
    pub fn remove_xid(&mut self, id: Xid) {
        self.xids.remove(&id);
    }

    #[inline]
    pub fn xid_count(&self) -> usize {
        self.xids.len()
    }

    #[inline]
    pub fn screen_vendor(&self, screen: usize) -> Option<VendorId> {
        self.screens.get(screen).copied().flatten()
    }

    /// Assigns `vendor` to `screen`. The caller checks that the vendor is initialized.
    pub(crate) fn set_screen_vendor(&mut self, screen: usize, vendor: VendorId) -> bool {
        match self.screens.get_mut(screen) {
            Some(slot) => {
                *slot = Some(vendor);
                true
            }
            None => false,
        }
    }

    /// Removes `vendor` from every screen it was assigned to.
    pub(crate) fn unassign_screens(&mut self, vendor: VendorId) {
        for slot in &mut self.screens {
            if *slot == Some(vendor) {
                *slot = None;
            }
        }
    }

    #[inline]
    pub fn context_tags(&self, client: ClientId) -> Option<&ContextTagTable> {
        self.clients.get(&client)
    }

    /// The client's tag table, created on first use.
    #[inline]
    pub fn context_tags_mut(&mut self, client: ClientId) -> &mut ContextTagTable {
        self.clients.entry(client).or_default()
    }

    /// Drops every tag the client had.
    #[inline]
    pub fn client_gone(&mut self, client: ClientId) {
        self.clients.remove(&client);
    }

    /// Forgets everything at the end of a server generation.
    pub(crate) fn reset(&mut self, screen_count: usize) {
        self.xids.clear();
        self.clients.clear();
        self.screens.clear();
        self.screens.resize(screen_count, None);
    }
}

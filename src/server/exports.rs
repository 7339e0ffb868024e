// glvnd/src/server/exports.rs
//
//! The view of the router that vendor callbacks get.

use super::abi::{AbiVersion, TagPrivate};
use super::host::{Client, WindowSystem, Xid};
use super::mapping::Mapping;
use super::protocol::ProtocolError;
use super::tags::ContextTag;
use super::vendor::{VendorId, VendorRegistry};
use crate::Error;

/// Borrows the parts of the server a vendor may use while one of its callbacks runs.
pub struct ServerExports<'a> {
    pub(crate) vendors: &'a VendorRegistry,
    pub(crate) mapping: &'a mut Mapping,
    pub(crate) host: &'a dyn WindowSystem,
    pub(crate) error_base: u8,
}

impl<'a> ServerExports<'a> {
    #[inline]
    pub fn abi_version(&self) -> AbiVersion {
        AbiVersion::CURRENT
    }

    #[inline]
    pub fn host(&self) -> &dyn WindowSystem {
        self.host
    }

    #[inline]
    pub fn error_base(&self) -> u8 {
        self.error_base
    }

    /// Makes `vendor` handle requests for `screen`. Only initialized vendors can own screens.
    pub fn set_screen_vendor(&mut self, screen: usize, vendor: VendorId) -> Result<(), Error> {
        if !self.vendors.contains(vendor) {
            return Err(Error::UnknownVendor);
        }
        if !self.vendors.is_initialized(vendor) {
            return Err(Error::VendorNotInitialized);
        }
        if screen >= self.host.screen_count() || !self.mapping.set_screen_vendor(screen, vendor) {
            return Err(Error::BadScreen);
        }
        debug!("GLX: screen {} assigned to vendor {:?}", screen, vendor);
        Ok(())
    }

    #[inline]
    pub fn get_vendor_for_screen(&self, _client: &Client, screen: usize) -> Option<VendorId> {
        self.mapping.screen_vendor(screen)
    }

    pub fn add_xid_map(&mut self, id: Xid, vendor: VendorId) -> bool {
        self.vendors.contains(vendor) && self.mapping.add_xid(id, vendor)
    }

    #[inline]
    pub fn get_xid_map(&self, id: Xid) -> Option<VendorId> {
        self.mapping.get_xid(self.host, id)
    }

    #[inline]
    pub fn remove_xid_map(&mut self, id: Xid) {
        self.mapping.remove_xid(id)
    }

    /// The vendor that owns a live context tag.
    pub fn get_context_tag(&self, client: &Client, tag: ContextTag) -> Option<VendorId> {
        self.mapping.context_tags(client.id)?.lookup(tag)?.vendor
    }

    /// The data `vendor` stored on a tag. Only the owning vendor gets it back.
    pub fn get_context_tag_private(&self, client: &Client, tag: ContextTag, vendor: VendorId)
                                   -> Option<TagPrivate> {
        let entry = self.mapping.context_tags(client.id)?.lookup(tag)?;
        if entry.vendor != Some(vendor) {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Replaces the private data of a tag that `vendor` owns.
    pub fn set_context_tag_private(&mut self,
                                   client: &Client,
                                   tag: ContextTag,
                                   vendor: VendorId,
                                   data: TagPrivate)
                                   -> bool {
        match self.mapping.context_tags_mut(client.id).lookup_mut(tag) {
            Some(entry) if entry.vendor == Some(vendor) => {
                entry.data = data;
                true
            }
            _ => false,
        }
    }

    /// Hands the client's current request to `vendor`.
    pub fn forward_request(&mut self, vendor: VendorId, client: &mut Client)
                           -> Result<(), ProtocolError> {
        let vendors = self.vendors;
        let handle_request = vendors
            .get(vendor)
            .filter(|vendor| vendor.initialized)
            .and_then(|vendor| vendor.imports.handle_request.as_ref())
            .ok_or(ProtocolError::BadImplementation)?;
        handle_request(self, client)
    }
}

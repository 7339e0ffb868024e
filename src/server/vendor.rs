// glvnd/src/server/vendor.rs
//
//! The registry of vendor libraries.

use super::abi::{AbiVersion, ServerImports};
use crate::Error;

/// A handle to a registered vendor. Handles are never reused, so a stale handle can't refer to a
/// vendor registered later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VendorId(pub(crate) usize);

#[derive(Debug)]
pub(crate) struct Vendor {
    pub(crate) imports: ServerImports,
    pub(crate) initialized: bool,
}

/// Owns every vendor. Everything else refers to vendors by `VendorId`.
#[derive(Debug, Default)]
pub struct VendorRegistry {
    vendors: Vec<Option<Vendor>>,
    active: Vec<VendorId>,
}

impl VendorRegistry {
    pub fn new() -> VendorRegistry {
        VendorRegistry::default()
    }

    pub fn create(&mut self, imports: ServerImports) -> Result<VendorId, Error> {
        if !imports.abi_version.is_compatible_with(AbiVersion::CURRENT) {
            error!("GLX: vendor built against ABI {}.{}, expected {}.x",
                   imports.abi_version.major,
                   imports.abi_version.minor,
                   AbiVersion::CURRENT.major);
            return Err(Error::IncompatibleAbiVersion);
        }
        if let Err(err) = imports.validate() {
            // Kept, but the init pass will leave it out.
            warn!("GLX: vendor library is incomplete: {}", err);
        }

        let id = VendorId(self.vendors.len());
        self.vendors.push(Some(Vendor { imports, initialized: false }));
        debug!("GLX: created vendor {:?}", id);
        Ok(id)
    }

    /// Frees a vendor. Initialized vendors have to be reset first.
    pub fn destroy(&mut self, id: VendorId) -> Result<(), Error> {
        match self.vendors.get(id.0) {
            Some(Some(vendor)) if vendor.initialized => {
                error!("GLX: refusing to destroy initialized vendor {:?}", id);
                Err(Error::VendorInitialized)
            }
            Some(Some(_)) => {
                self.vendors[id.0] = None;
                debug!("GLX: destroyed vendor {:?}", id);
                Ok(())
            }
            _ => Err(Error::UnknownVendor),
        }
    }

    #[inline]
    pub(crate) fn get(&self, id: VendorId) -> Option<&Vendor> {
        self.vendors.get(id.0).and_then(Option::as_ref)
    }

    #[inline]
    pub fn contains(&self, id: VendorId) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub fn is_initialized(&self, id: VendorId) -> bool {
        self.get(id).map_or(false, |vendor| vendor.initialized)
    }

    /// Initialized vendors, in registration order.
    #[inline]
    pub fn active(&self) -> &[VendorId] {
        &self.active
    }

    /// Every live vendor, in registration order.
    pub fn ids(&self) -> Vec<VendorId> {
        self.vendors
            .iter()
            .enumerate()
            .filter(|(_, vendor)| vendor.is_some())
            .map(|(index, _)| VendorId(index))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vendors.iter().filter(|vendor| vendor.is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks every vendor with a complete callback table as initialized. Returns them in
    /// registration order.
    pub(crate) fn begin_init(&mut self) -> Vec<VendorId> {
        self.active.clear();
        for (index, slot) in self.vendors.iter_mut().enumerate() {
            let vendor = match slot {
                Some(vendor) => vendor,
                None => continue,
            };
            match vendor.imports.validate() {
                Ok(()) => {
                    vendor.initialized = true;
                    self.active.push(VendorId(index));
                }
                Err(err) => warn!("GLX: leaving vendor {} out: {}", index, err),
            }
        }
        self.active.clone()
    }

    /// Takes a vendor whose init callback failed back out of the active list.
    pub(crate) fn demote(&mut self, id: VendorId) {
        if let Some(Some(vendor)) = self.vendors.get_mut(id.0) {
            vendor.initialized = false;
        }
        self.active.retain(|&active| active != id);
    }

    /// Returns every vendor to the uninitialized state, handing back the ones that were
    /// initialized.
    pub(crate) fn reset(&mut self) -> Vec<VendorId> {
        self.active.clear();
        let mut previously_initialized = vec![];
        for (index, slot) in self.vendors.iter_mut().enumerate() {
            if let Some(vendor) = slot {
                if vendor.initialized {
                    vendor.initialized = false;
                    previously_initialized.push(VendorId(index));
                }
            }
        }
        previously_initialized
    }

    /// Frees every vendor, initialized or not.
    pub(crate) fn clear(&mut self) {
        self.active.clear();
        for slot in &mut self.vendors {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_imports() -> ServerImports {
        let mut imports = ServerImports::allocate();
        imports.extension_close_down = Some(Box::new(|_| ()));
        imports.handle_request = Some(Box::new(|_, _| Ok(())));
        imports.get_dispatch_address = Some(Box::new(|_, _| None));
        imports.make_current = Some(Box::new(|_, _, _| Ok(None)));
        imports
    }

    #[test]
    fn test_abi_major_mismatch() {
        let mut registry = VendorRegistry::new();
        let mut imports = complete_imports();
        imports.abi_version = AbiVersion { major: 1, minor: 0 };
        assert_eq!(registry.create(imports).unwrap_err(), Error::IncompatibleAbiVersion);

        let mut imports = complete_imports();
        imports.abi_version = AbiVersion { major: 0, minor: 3 };
        assert!(registry.create(imports).is_ok());
    }

    #[test]
    fn test_incomplete_vendor_is_not_activated() {
        let mut registry = VendorRegistry::new();
        let complete = registry.create(complete_imports()).unwrap();
        let incomplete = registry.create(ServerImports::allocate()).unwrap();
        assert_eq!(registry.begin_init(), vec![complete]);
        assert!(!registry.is_initialized(incomplete));
        assert!(registry.contains(incomplete));
    }

    #[test]
    fn test_destroy_rules() {
        let mut registry = VendorRegistry::new();
        let vendor = registry.create(complete_imports()).unwrap();
        registry.begin_init();
        assert_eq!(registry.destroy(vendor), Err(Error::VendorInitialized));

        assert_eq!(registry.reset(), vec![vendor]);
        assert_eq!(registry.destroy(vendor), Ok(()));
        assert_eq!(registry.destroy(vendor), Err(Error::UnknownVendor));

        // Handles aren't reused.
        let next = registry.create(complete_imports()).unwrap();
        assert_ne!(next, vendor);
        assert!(!registry.contains(vendor));
    }

    #[test]
    fn test_active_keeps_registration_order() {
        let mut registry = VendorRegistry::new();
        let ids: Vec<_> = (0..4).map(|_| registry.create(complete_imports()).unwrap()).collect();
        registry.begin_init();
        registry.demote(ids[1]);
        assert_eq!(registry.active(), &[ids[0], ids[2], ids[3]]);
    }
}

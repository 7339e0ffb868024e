// glvnd/src/server/mod.rs
//
//! The server side of GLX: routes each client request to the vendor library that owns the
//! screen, resource or context tag it names.
//!
//! A `GlxServer` lives inside the X server's single-threaded request loop. Vendors register
//! callback tables with `create_vendor()`, claim screens during `extension_init()`, and are told
//! to let go of everything in `extension_reset()` at the end of each server generation.

use crate::Error;

pub mod abi;
pub use self::abi::{AbiVersion, DispatchProc, ExtensionEntry, MakeCurrentRequest};
pub use self::abi::{ServerImports, TagPrivate};

pub mod dispatch;
pub use self::dispatch::RequestDispatcher;

pub mod exports;
pub use self::exports::ServerExports;

pub mod host;
pub use self::host::{AccessMode, Client, ClientId, WindowSystem, Xid};

pub mod mapping;
pub use self::mapping::Mapping;

pub mod protocol;
pub use self::protocol::{GlxError, ProtocolError};

pub mod routed;

pub mod tags;
pub use self::tags::{ContextTag, ContextTagTable, TagInfo};

pub mod vendor;
pub use self::vendor::{VendorId, VendorRegistry};


pub struct GlxServer {
    host: Box<dyn WindowSystem>,
    vendors: VendorRegistry,
    mapping: Mapping,
    dispatcher: RequestDispatcher,
    extension: Option<ExtensionEntry>,
}

impl GlxServer {
    pub fn new(host: Box<dyn WindowSystem>) -> GlxServer {
        let mapping = Mapping::new(host.screen_count());
        GlxServer {
            host,
            vendors: VendorRegistry::new(),
            mapping,
            dispatcher: RequestDispatcher::new(),
            extension: None,
        }
    }

    /// Registers a vendor library. It takes part in the next `extension_init()`.
    pub fn create_vendor(&mut self, imports: ServerImports) -> Result<VendorId, Error> {
        self.vendors.create(imports)
    }

    pub fn destroy_vendor(&mut self, vendor: VendorId) -> Result<(), Error> {
        self.vendors.destroy(vendor)
    }

    /// Starts a server generation: activates every complete vendor and runs their init
    /// callbacks in registration order. A vendor whose callback fails is left out, and loses any
    /// screens it claimed.
    pub fn extension_init(&mut self, entry: ExtensionEntry) -> Result<(), Error> {
        if self.extension.is_some() {
            return Err(Error::ExtensionAlreadyInitialized);
        }
        info!("GLX: initializing {} (opcode {}, error base {})",
              entry.name,
              entry.major_opcode,
              entry.error_base);

        self.mapping.reset(self.host.screen_count());
        self.dispatcher.reset();
        self.extension = Some(entry);

        for vendor in self.vendors.begin_init() {
            let result = {
                let init = match self.vendors.get(vendor) {
                    Some(record) => record.imports.extension_init.as_ref(),
                    None => None,
                };
                match init {
                    Some(init) => {
                        let mut exports = ServerExports {
                            vendors: &self.vendors,
                            mapping: &mut self.mapping,
                            host: &*self.host,
                            error_base: entry.error_base,
                        };
                        init(&mut exports, &entry, vendor)
                    }
                    None => Ok(()),
                }
            };

            if let Err(err) = result {
                warn!("GLX: vendor {:?} failed to initialize: {}", vendor, err);
                self.vendors.demote(vendor);
                self.mapping.unassign_screens(vendor);
            }
        }

        debug!("GLX: {} of {} vendors active", self.vendors.active().len(), self.vendors.len());
        Ok(())
    }

    /// Ends a server generation. Initialized vendors are closed down and return to the
    /// uninitialized state; if the server is exiting, every vendor is freed.
    pub fn extension_reset(&mut self) -> Result<(), Error> {
        let entry = self.extension.take().ok_or(Error::ExtensionNotInitialized)?;
        info!("GLX: resetting {}", entry.name);

        self.mapping.reset(self.host.screen_count());
        self.dispatcher.reset();

        for vendor in self.vendors.reset() {
            let close_down = self.vendors
                                 .get(vendor)
                                 .and_then(|record| record.imports.extension_close_down.as_ref());
            if let Some(close_down) = close_down {
                close_down(&entry);
            }
        }

        if self.host.server_is_exiting() {
            debug!("GLX: server exiting, freeing {} vendors", self.vendors.len());
            self.vendors.clear();
        }
        Ok(())
    }

    /// Handles one GLX request from `client`. Replies are written to the client; errors are
    /// returned for the host to send.
    pub fn dispatch_request(&mut self, client: &mut Client) -> Result<(), ProtocolError> {
        let error_base = match self.extension {
            Some(ref entry) => entry.error_base,
            None => return Err(ProtocolError::BadRequest),
        };
        let mut exports = ServerExports {
            vendors: &self.vendors,
            mapping: &mut self.mapping,
            host: &*self.host,
            error_base,
        };
        let result = self.dispatcher.dispatch(&mut exports, client);
        if let Err(err) = result {
            debug!("GLX: request from client {:?} failed: {}", client.id, err);
        }
        result
    }

    /// Drops the client's context tags when it disconnects.
    #[inline]
    pub fn client_gone(&mut self, client: ClientId) {
        self.mapping.client_gone(client)
    }

    /// Forgets an XID the host has destroyed.
    #[inline]
    pub fn resource_freed(&mut self, id: Xid) {
        self.mapping.remove_xid(id)
    }

    /// The exports view, for host code that acts on a vendor's behalf outside a callback.
    pub fn exports(&mut self) -> ServerExports<'_> {
        ServerExports {
            vendors: &self.vendors,
            mapping: &mut self.mapping,
            host: &*self.host,
            error_base: self.extension.map_or(0, |entry| entry.error_base),
        }
    }

    /// The code to put on the wire for `error` in this generation.
    #[inline]
    pub fn error_code(&self, error: ProtocolError) -> u8 {
        error.code(self.extension.map_or(0, |entry| entry.error_base))
    }

    #[inline]
    pub fn vendors(&self) -> &VendorRegistry {
        &self.vendors
    }

    #[inline]
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    #[inline]
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    #[inline]
    pub fn extension(&self) -> Option<ExtensionEntry> {
        self.extension
    }
}

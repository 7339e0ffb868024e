// glvnd/src/server/dispatch.rs
//
//! Routes each GLX request to the vendor that owns it.

use super::abi::{DispatchProc, MakeCurrentRequest, TagPrivate};
use super::exports::ServerExports;
use super::host::{Client, Xid};
use super::protocol::{self, opcode, GlxError, ProtocolError, Reply};
use super::routed::RoutedRequest;
use super::tags::ContextTag;
use super::vendor::VendorId;

use fnv::FnvHashMap;

/// Opcodes below this have their own table entry. Everything above is a single request.
const OPCODE_TABLE_LEN: usize = 100;

type BuiltinFn = fn(&mut RequestDispatcher, &mut ServerExports, &mut Client)
                    -> Result<(), ProtocolError>;

#[derive(Clone)]
enum Handler {
    Builtin(BuiltinFn),
    Routed(&'static RoutedRequest),
    Vendor(DispatchProc),
    BadRequest,
}

/// The per-generation request routing state.
pub struct RequestDispatcher {
    opcodes: Vec<Option<Handler>>,
    vendor_private: FnvHashMap<u32, Handler>,
    queries: usize,
}

impl RequestDispatcher {
    pub fn new() -> RequestDispatcher {
        let mut dispatcher = RequestDispatcher {
            opcodes: vec![],
            vendor_private: FnvHashMap::default(),
            queries: 0,
        };
        dispatcher.reset();
        dispatcher
    }

    /// Forgets every handler learned from vendors.
    pub fn reset(&mut self) {
        self.opcodes.clear();
        self.opcodes.resize(OPCODE_TABLE_LEN, None);
        self.vendor_private.clear();

        let builtins: [(u8, BuiltinFn); 10] = [
            (opcode::QUERY_VERSION, query_version),
            (opcode::MAKE_CURRENT, make_current),
            (opcode::MAKE_CONTEXT_CURRENT, make_context_current),
            (opcode::COPY_CONTEXT, copy_context),
            (opcode::SWAP_BUFFERS, swap_buffers),
            (opcode::CLIENT_INFO, client_info),
            (opcode::SET_CLIENT_INFO_ARB, client_info),
            (opcode::SET_CLIENT_INFO_2_ARB, client_info),
            (opcode::VENDOR_PRIVATE, vendor_private),
            (opcode::VENDOR_PRIVATE_WITH_REPLY, vendor_private),
        ];
        for (opcode, handler) in builtins {
            self.opcodes[opcode as usize] = Some(Handler::Builtin(handler));
        }
        for request in super::routed::ROUTED_REQUESTS {
            debug_assert!(self.opcodes[request.opcode as usize].is_none());
            self.opcodes[request.opcode as usize] = Some(Handler::Routed(request));
        }

        self.vendor_private.insert(opcode::VENDOR_MAKE_CURRENT_READ_SGI,
                                   Handler::Builtin(make_current_read_sgi));
    }

    /// The number of times active vendors have been asked for a handler.
    #[inline]
    pub fn query_count(&self) -> usize {
        self.queries
    }

    pub fn dispatch(&mut self, exports: &mut ServerExports, client: &mut Client)
                    -> Result<(), ProtocolError> {
        let minor = protocol::minor_opcode(client)?;
        if minor as usize >= OPCODE_TABLE_LEN {
            return single(self, exports, client);
        }

        let handler = match self.opcodes[minor as usize].clone() {
            Some(handler) => handler,
            None => {
                let handler = self.query_vendors(exports, minor, 0);
                self.opcodes[minor as usize] = Some(handler.clone());
                handler
            }
        };
        self.run(handler, exports, client)
    }

    fn run(&mut self, handler: Handler, exports: &mut ServerExports, client: &mut Client)
           -> Result<(), ProtocolError> {
        match handler {
            Handler::Builtin(function) => function(self, exports, client),
            Handler::Routed(request) => request.dispatch(exports, client),
            Handler::Vendor(function) => function(exports, client),
            Handler::BadRequest => Err(ProtocolError::BadRequest),
        }
    }

    /// Asks each active vendor in turn for a handler.
    fn query_vendors(&mut self, exports: &ServerExports, minor: u8, vendor_code: u32) -> Handler {
        self.queries += 1;
        for &vendor in exports.vendors.active() {
            let imports = match exports.vendors.get(vendor) {
                Some(entry) => &entry.imports,
                None => continue,
            };
            let get_dispatch_address = match imports.get_dispatch_address {
                Some(ref get_dispatch_address) => get_dispatch_address,
                None => continue,
            };
            if let Some(function) = get_dispatch_address(minor, vendor_code) {
                debug!("GLX: vendor {:?} handles opcode {} (vendor code {})",
                       vendor,
                       minor,
                       vendor_code);
                return Handler::Vendor(function);
            }
        }
        debug!("GLX: no vendor handles opcode {} (vendor code {})", minor, vendor_code);
        Handler::BadRequest
    }
}

impl Default for RequestDispatcher {
    fn default() -> RequestDispatcher {
        RequestDispatcher::new()
    }
}

fn tag_vendor(exports: &ServerExports, client: &mut Client, tag: ContextTag)
              -> Result<VendorId, ProtocolError> {
    match exports.get_context_tag(client, tag) {
        Some(vendor) => Ok(vendor),
        None => {
            client.error_value = tag;
            Err(GlxError::BadContextTag.into())
        }
    }
}

fn query_version(_: &mut RequestDispatcher, _: &mut ServerExports, client: &mut Client)
                 -> Result<(), ProtocolError> {
    let mut reply = Reply::new(client);
    reply.put_u32(8, protocol::GLX_MAJOR_VERSION).put_u32(12, protocol::GLX_MINOR_VERSION);
    client.write_reply(reply.as_bytes());
    Ok(())
}

/// Sends a client-info request to every active vendor. Each one sees the request exactly as the
/// client sent it, even if an earlier vendor rewrote the buffer.
fn client_info(_: &mut RequestDispatcher, exports: &mut ServerExports, client: &mut Client)
               -> Result<(), ProtocolError> {
    let original = client.request.clone();
    let vendors = exports.vendors;
    for &vendor in vendors.active() {
        // Errors from individual vendors aren't reported; the client gets no reply either way.
        if let Err(err) = exports.forward_request(vendor, client) {
            debug!("GLX: vendor {:?} rejected client info: {}", vendor, err);
        }
        client.request.clear();
        client.request.extend_from_slice(&original);
    }
    Ok(())
}

fn make_current(_: &mut RequestDispatcher, exports: &mut ServerExports, client: &mut Client)
                -> Result<(), ProtocolError> {
    let drawable = protocol::read_u32(client, 4)?;
    let context = protocol::read_u32(client, 8)?;
    let old_tag = protocol::read_u32(client, 12)?;
    common_make_current(exports, client, old_tag, drawable, drawable, context)
}

fn make_context_current(_: &mut RequestDispatcher,
                        exports: &mut ServerExports,
                        client: &mut Client)
                        -> Result<(), ProtocolError> {
    let old_tag = protocol::read_u32(client, 4)?;
    let drawable = protocol::read_u32(client, 8)?;
    let read_drawable = protocol::read_u32(client, 12)?;
    let context = protocol::read_u32(client, 16)?;
    common_make_current(exports, client, old_tag, drawable, read_drawable, context)
}

fn make_current_read_sgi(_: &mut RequestDispatcher,
                         exports: &mut ServerExports,
                         client: &mut Client)
                         -> Result<(), ProtocolError> {
    let old_tag = protocol::read_u32(client, 8)?;
    let drawable = protocol::read_u32(client, 12)?;
    let read_drawable = protocol::read_u32(client, 16)?;
    let context = protocol::read_u32(client, 20)?;
    common_make_current(exports, client, old_tag, drawable, read_drawable, context)
}

fn common_make_current(exports: &mut ServerExports,
                       client: &mut Client,
                       old_tag: ContextTag,
                       drawable: Xid,
                       read_drawable: Xid,
                       context: Xid)
                       -> Result<(), ProtocolError> {
    let old = if old_tag != 0 {
        match exports.mapping.context_tags(client.id).and_then(|tags| tags.lookup(old_tag)) {
            Some(entry) => Some(entry.clone()),
            None => {
                client.error_value = old_tag;
                return Err(GlxError::BadContextTag.into());
            }
        }
    } else {
        None
    };

    let new_vendor = if context != 0 {
        match exports.get_xid_map(context) {
            Some(vendor) => Some(vendor),
            None => {
                client.error_value = context;
                return Err(GlxError::BadContext.into());
            }
        }
    } else {
        None
    };

    let new_tag = match (old, new_vendor) {
        (None, None) => 0,
        (Some(old), Some(_)) if old.context == context &&
                                old.drawable == drawable &&
                                old.read_drawable == read_drawable => old.tag,
        (old, new_vendor) => {
            // Switching is not atomic. If the new vendor fails after the old one let go, nothing
            // is current.
            if let Some(old) = old {
                let old_vendor = old.vendor.ok_or(ProtocolError::BadImplementation)?;
                let request = MakeCurrentRequest {
                    old_tag: old.tag,
                    old_data: old.data.clone(),
                    ..MakeCurrentRequest::default()
                };
                call_make_current(exports, client, old_vendor, &request)?;
                exports.mapping.context_tags_mut(client.id).free(old.tag);
            }

            match new_vendor {
                Some(vendor) => {
                    make_new_current(exports, client, vendor, drawable, read_drawable, context)?
                }
                None => 0,
            }
        }
    };

    let mut reply = Reply::new(client);
    reply.put_u32(8, new_tag);
    client.write_reply(reply.as_bytes());
    Ok(())
}

fn make_new_current(exports: &mut ServerExports,
                    client: &mut Client,
                    vendor: VendorId,
                    drawable: Xid,
                    read_drawable: Xid,
                    context: Xid)
                    -> Result<ContextTag, ProtocolError> {
    let new_tag = exports.mapping.context_tags_mut(client.id).allocate(vendor).tag;
    let request = MakeCurrentRequest {
        old_tag: 0,
        old_data: None,
        drawable,
        read_drawable,
        context,
        new_tag,
    };

    match call_make_current(exports, client, vendor, &request) {
        Ok(data) => {
            let tags = exports.mapping.context_tags_mut(client.id);
            if let Some(entry) = tags.lookup_mut(new_tag) {
                entry.data = data;
                entry.context = context;
                entry.drawable = drawable;
                entry.read_drawable = read_drawable;
            }
            Ok(new_tag)
        }
        Err(err) => {
            exports.mapping.context_tags_mut(client.id).free(new_tag);
            Err(err)
        }
    }
}

fn call_make_current(exports: &mut ServerExports,
                     client: &mut Client,
                     vendor: VendorId,
                     request: &MakeCurrentRequest)
                     -> Result<TagPrivate, ProtocolError> {
    let vendors = exports.vendors;
    let make_current = vendors
        .get(vendor)
        .and_then(|vendor| vendor.imports.make_current.as_ref())
        .ok_or(ProtocolError::BadImplementation)?;
    make_current(exports, client, request)
}

fn copy_context(_: &mut RequestDispatcher, exports: &mut ServerExports, client: &mut Client)
                -> Result<(), ProtocolError> {
    let source = protocol::read_u32(client, 4)?;
    let tag = protocol::read_u32(client, 16)?;
    let vendor = if tag != 0 {
        tag_vendor(exports, client, tag)?
    } else {
        match exports.get_xid_map(source) {
            Some(vendor) => vendor,
            None => {
                client.error_value = source;
                return Err(GlxError::BadContext.into());
            }
        }
    };
    exports.forward_request(vendor, client)
}

fn swap_buffers(_: &mut RequestDispatcher, exports: &mut ServerExports, client: &mut Client)
                -> Result<(), ProtocolError> {
    let tag = protocol::read_u32(client, 4)?;
    let drawable = protocol::read_u32(client, 8)?;
    let vendor = if tag != 0 {
        tag_vendor(exports, client, tag)?
    } else {
        match exports.get_xid_map(drawable) {
            Some(vendor) => vendor,
            None => {
                client.error_value = drawable;
                return Err(GlxError::BadDrawable.into());
            }
        }
    };
    exports.forward_request(vendor, client)
}

/// Every opcode from 100 up carries a context tag at the same place.
fn single(_: &mut RequestDispatcher, exports: &mut ServerExports, client: &mut Client)
          -> Result<(), ProtocolError> {
    let tag = protocol::read_u32(client, 4)?;
    let vendor = tag_vendor(exports, client, tag)?;
    exports.forward_request(vendor, client)
}

/// Looks up the handler for a vendor code, asking the active vendors the first time it's seen.
/// The answer is kept, even when nobody claims the code.
fn vendor_private(dispatcher: &mut RequestDispatcher,
                  exports: &mut ServerExports,
                  client: &mut Client)
                  -> Result<(), ProtocolError> {
    let minor = protocol::minor_opcode(client)?;
    let vendor_code = protocol::read_u32(client, 4)?;
    let handler = match dispatcher.vendor_private.get(&vendor_code).cloned() {
        Some(handler) => handler,
        None => {
            let handler = dispatcher.query_vendors(exports, minor, vendor_code);
            dispatcher.vendor_private.insert(vendor_code, handler.clone());
            handler
        }
    };
    dispatcher.run(handler, exports, client)
}

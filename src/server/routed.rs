// glvnd/src/server/routed.rs
//
//! Requests that go to exactly one vendor, chosen by one field of the request.

use super::exports::ServerExports;
use super::host::Client;
use super::protocol::{self, opcode, GlxError, ProtocolError};

/// How a request names its vendor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// A screen number, owned by the screen's vendor.
    Screen,
    /// An XID, looked up in the XID map.
    Xid,
    /// A context tag, owned by the vendor that made the context current.
    Tag,
}

#[derive(Clone, Copy, Debug)]
pub struct RoutedRequest {
    pub opcode: u8,
    pub name: &'static str,
    pub route: Route,
    /// The byte offset of the routing field.
    pub offset: usize,
    /// Sent when no vendor owns the routing field.
    pub error: ProtocolError,
    /// The offset of an XID the request creates.
    pub adds_xid: Option<usize>,
    /// The offset of an XID the request destroys.
    pub removes_xid: Option<usize>,
}

const fn by_tag(opcode: u8, name: &'static str) -> RoutedRequest {
    RoutedRequest {
        opcode,
        name,
        route: Route::Tag,
        offset: 4,
        error: ProtocolError::Glx(GlxError::BadContextTag),
        adds_xid: None,
        removes_xid: None,
    }
}

const fn by_screen(opcode: u8, name: &'static str, offset: usize, adds_xid: Option<usize>)
                   -> RoutedRequest {
    RoutedRequest {
        opcode,
        name,
        route: Route::Screen,
        offset,
        error: ProtocolError::BadMatch,
        adds_xid,
        removes_xid: None,
    }
}

const fn by_xid(opcode: u8, name: &'static str, error: ProtocolError, removes: bool)
                -> RoutedRequest {
    RoutedRequest {
        opcode,
        name,
        route: Route::Xid,
        offset: 4,
        error,
        adds_xid: None,
        removes_xid: if removes { Some(4) } else { None },
    }
}

pub static ROUTED_REQUESTS: &[RoutedRequest] = &[
    by_tag(opcode::RENDER, "Render"),
    by_tag(opcode::RENDER_LARGE, "RenderLarge"),
    by_screen(opcode::CREATE_CONTEXT, "CreateContext", 12, Some(4)),
    by_xid(opcode::DESTROY_CONTEXT, "DestroyContext", ProtocolError::Glx(GlxError::BadContext), true),
    by_tag(opcode::WAIT_GL, "WaitGL"),
    by_tag(opcode::WAIT_X, "WaitX"),
    by_tag(opcode::USE_X_FONT, "UseXFont"),
    by_screen(opcode::CREATE_GLX_PIXMAP, "CreateGLXPixmap", 4, Some(16)),
    by_screen(opcode::GET_VISUAL_CONFIGS, "GetVisualConfigs", 4, None),
    by_xid(opcode::DESTROY_GLX_PIXMAP, "DestroyGLXPixmap", ProtocolError::Glx(GlxError::BadPixmap), true),
    by_screen(opcode::QUERY_EXTENSIONS_STRING, "QueryExtensionsString", 4, None),
    by_screen(opcode::QUERY_SERVER_STRING, "QueryServerString", 4, None),
    by_xid(opcode::CHANGE_DRAWABLE_ATTRIBUTES, "ChangeDrawableAttributes", ProtocolError::BadDrawable, false),
    by_screen(opcode::CREATE_NEW_CONTEXT, "CreateNewContext", 12, Some(4)),
    by_screen(opcode::CREATE_PBUFFER, "CreatePbuffer", 4, Some(12)),
    by_screen(opcode::CREATE_PIXMAP, "CreatePixmap", 4, Some(16)),
    by_screen(opcode::CREATE_WINDOW, "CreateWindow", 4, Some(16)),
    by_screen(opcode::CREATE_CONTEXT_ATTRIBS_ARB, "CreateContextAttribsARB", 12, Some(4)),
    by_xid(opcode::DESTROY_PBUFFER, "DestroyPbuffer", ProtocolError::Glx(GlxError::BadPbuffer), true),
    by_xid(opcode::DESTROY_PIXMAP, "DestroyPixmap", ProtocolError::Glx(GlxError::BadPixmap), true),
    by_xid(opcode::DESTROY_WINDOW, "DestroyWindow", ProtocolError::Glx(GlxError::BadWindow), true),
    by_xid(opcode::GET_DRAWABLE_ATTRIBUTES, "GetDrawableAttributes", ProtocolError::BadDrawable, false),
    by_screen(opcode::GET_FB_CONFIGS, "GetFBConfigs", 4, None),
    by_xid(opcode::QUERY_CONTEXT, "QueryContext", ProtocolError::Glx(GlxError::BadContext), false),
    by_xid(opcode::IS_DIRECT, "IsDirect", ProtocolError::Glx(GlxError::BadContext), false),
];

impl RoutedRequest {
    pub fn find(opcode: u8) -> Option<&'static RoutedRequest> {
        ROUTED_REQUESTS.iter().find(|request| request.opcode == opcode)
    }

    /// Finds the owning vendor and forwards the request, keeping the XID map in step with the
    /// resources the request creates or destroys.
    pub fn dispatch(&self, exports: &mut ServerExports, client: &mut Client)
                    -> Result<(), ProtocolError> {
        let member = protocol::read_u32(client, self.offset)?;

        let new_xid = match self.adds_xid {
            Some(offset) => {
                let id = protocol::read_u32(client, offset)?;
                if !exports.host.legal_new_resource(id, client) {
                    client.error_value = id;
                    return Err(ProtocolError::BadIDChoice);
                }
                Some(id)
            }
            None => None,
        };

        let vendor = match self.route {
            Route::Screen => exports.get_vendor_for_screen(client, member as usize),
            Route::Xid => exports.get_xid_map(member),
            Route::Tag => exports.get_context_tag(client, member),
        };
        let vendor = match vendor {
            Some(vendor) => vendor,
            None => {
                client.error_value = member;
                return Err(self.error);
            }
        };

        // The vendor may rewrite the request, so read what we need first.
        let old_xid = match self.removes_xid {
            Some(offset) => Some(protocol::read_u32(client, offset)?),
            None => None,
        };

        if let Some(id) = new_xid {
            if !exports.add_xid_map(id, vendor) {
                return Err(ProtocolError::BadAlloc);
            }
        }

        let result = exports.forward_request(vendor, client);
        match result {
            Ok(()) => {
                if let Some(id) = old_xid {
                    exports.remove_xid_map(id);
                }
            }
            Err(_) => {
                if let Some(id) = new_xid {
                    exports.remove_xid_map(id);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_no_duplicates() {
        for (index, request) in ROUTED_REQUESTS.iter().enumerate() {
            assert!(request.opcode < opcode::FIRST_SINGLE);
            assert!(ROUTED_REQUESTS[index + 1..].iter().all(|other| other.opcode != request.opcode),
                    "{} is listed twice",
                    request.name);
            assert_ne!(request.adds_xid, Some(request.offset));
        }
    }

    #[test]
    fn test_destroy_requests_remove_their_xid() {
        for request in ROUTED_REQUESTS.iter().filter(|request| request.name.starts_with("Destroy")) {
            assert_eq!(request.route, Route::Xid);
            assert_eq!(request.removes_xid, Some(4), "{}", request.name);
        }
    }

    #[test]
    fn test_find() {
        let request = RoutedRequest::find(opcode::CREATE_NEW_CONTEXT).unwrap();
        assert_eq!(request.route, Route::Screen);
        assert_eq!(request.offset, 12);
        assert_eq!(request.adds_xid, Some(4));
        assert!(RoutedRequest::find(opcode::MAKE_CURRENT).is_none());
    }
}

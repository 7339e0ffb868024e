// glvnd/src/server/protocol.rs
//
//! GLX wire protocol: opcodes, errors, request fields and replies.

use super::host::Client;

use std::fmt::{self, Display, Formatter};

/// GLX minor opcodes, as carried in the second byte of every request.
pub mod opcode {
    pub const RENDER: u8 = 1;
    pub const RENDER_LARGE: u8 = 2;
    pub const CREATE_CONTEXT: u8 = 3;
    pub const DESTROY_CONTEXT: u8 = 4;
    pub const MAKE_CURRENT: u8 = 5;
    pub const IS_DIRECT: u8 = 6;
    pub const QUERY_VERSION: u8 = 7;
    pub const WAIT_GL: u8 = 8;
    pub const WAIT_X: u8 = 9;
    pub const COPY_CONTEXT: u8 = 10;
    pub const SWAP_BUFFERS: u8 = 11;
    pub const USE_X_FONT: u8 = 12;
    pub const CREATE_GLX_PIXMAP: u8 = 13;
    pub const GET_VISUAL_CONFIGS: u8 = 14;
    pub const DESTROY_GLX_PIXMAP: u8 = 15;
    pub const VENDOR_PRIVATE: u8 = 16;
    pub const VENDOR_PRIVATE_WITH_REPLY: u8 = 17;
    pub const QUERY_EXTENSIONS_STRING: u8 = 18;
    pub const QUERY_SERVER_STRING: u8 = 19;
    pub const CLIENT_INFO: u8 = 20;
    pub const GET_FB_CONFIGS: u8 = 21;
    pub const CREATE_PIXMAP: u8 = 22;
    pub const DESTROY_PIXMAP: u8 = 23;
    pub const CREATE_NEW_CONTEXT: u8 = 24;
    pub const QUERY_CONTEXT: u8 = 25;
    pub const MAKE_CONTEXT_CURRENT: u8 = 26;
    pub const CREATE_PBUFFER: u8 = 27;
    pub const DESTROY_PBUFFER: u8 = 28;
    pub const GET_DRAWABLE_ATTRIBUTES: u8 = 29;
    pub const CHANGE_DRAWABLE_ATTRIBUTES: u8 = 30;
    pub const CREATE_WINDOW: u8 = 31;
    pub const DESTROY_WINDOW: u8 = 32;
    pub const SET_CLIENT_INFO_ARB: u8 = 33;
    pub const CREATE_CONTEXT_ATTRIBS_ARB: u8 = 34;
    pub const SET_CLIENT_INFO_2_ARB: u8 = 35;

    /// Opcodes from here up are single requests, all routed by their context tag.
    pub const FIRST_SINGLE: u8 = 100;

    /// The one vendor-private request the dispatcher handles itself.
    pub const VENDOR_MAKE_CURRENT_READ_SGI: u32 = 65537;
}

/// The GLX version the dispatcher reports.
pub const GLX_MAJOR_VERSION: u32 = 1;
pub const GLX_MINOR_VERSION: u32 = 4;

const X_REPLY: u8 = 1;
const REPLY_SIZE: usize = 32;

/// Errors defined by the GLX extension, relative to its error base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GlxError {
    BadContext = 0,
    BadContextState = 1,
    BadDrawable = 2,
    BadPixmap = 3,
    BadContextTag = 4,
    BadCurrentWindow = 5,
    BadRenderRequest = 6,
    BadLargeRequest = 7,
    UnsupportedPrivateRequest = 8,
    BadFBConfig = 9,
    BadPbuffer = 10,
    BadCurrentDrawable = 11,
    BadWindow = 12,
    BadProfileARB = 13,
}

/// An error sent back to the client in place of a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    BadRequest,
    BadValue,
    BadWindow,
    BadPixmap,
    BadMatch,
    BadDrawable,
    BadAccess,
    BadAlloc,
    BadIDChoice,
    BadLength,
    BadImplementation,
    /// An error from the GLX extension's own range.
    Glx(GlxError),
    /// Any other error code, already absolute.
    Other(u8),
}

impl ProtocolError {
    /// The error code on the wire. GLX errors are offset by the extension's error base.
    pub fn code(self, error_base: u8) -> u8 {
        match self {
            ProtocolError::BadRequest => 1,
            ProtocolError::BadValue => 2,
            ProtocolError::BadWindow => 3,
            ProtocolError::BadPixmap => 4,
            ProtocolError::BadMatch => 8,
            ProtocolError::BadDrawable => 9,
            ProtocolError::BadAccess => 10,
            ProtocolError::BadAlloc => 11,
            ProtocolError::BadIDChoice => 14,
            ProtocolError::BadLength => 16,
            ProtocolError::BadImplementation => 17,
            ProtocolError::Glx(error) => error_base.wrapping_add(error as u8),
            ProtocolError::Other(code) => code,
        }
    }
}

impl From<GlxError> for ProtocolError {
    #[inline]
    fn from(error: GlxError) -> ProtocolError {
        ProtocolError::Glx(error)
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            ProtocolError::Glx(error) => write!(f, "GLX{:?}", error),
            ProtocolError::Other(code) => write!(f, "X error {}", code),
            error => write!(f, "{:?}", error),
        }
    }
}

/// The GLX minor opcode of the client's current request.
pub fn minor_opcode(client: &Client) -> Result<u8, ProtocolError> {
    client.request.get(1).copied().ok_or(ProtocolError::BadLength)
}

/// Reads a 32-bit request field at byte `offset`, in the client's byte order.
pub fn read_u32(client: &Client, offset: usize) -> Result<u32, ProtocolError> {
    let bytes = client.request.get(offset..offset + 4).ok_or(ProtocolError::BadLength)?;
    let value = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Ok(if client.swapped { value.swap_bytes() } else { value })
}

/// Writes a 32-bit request field. Used by vendors that rewrite requests in place.
pub fn write_u32(client: &mut Client, offset: usize, value: u32) -> Result<(), ProtocolError> {
    let value = if client.swapped { value.swap_bytes() } else { value };
    let bytes = client.request.get_mut(offset..offset + 4).ok_or(ProtocolError::BadLength)?;
    bytes.copy_from_slice(&value.to_ne_bytes());
    Ok(())
}

/// A fixed-size reply, encoded in the client's byte order.
pub struct Reply {
    bytes: [u8; REPLY_SIZE],
    swapped: bool,
}

impl Reply {
    /// A reply with the standard header filled in and no extra data.
    pub fn new(client: &Client) -> Reply {
        let mut reply = Reply { bytes: [0; REPLY_SIZE], swapped: client.swapped };
        reply.bytes[0] = X_REPLY;
        let sequence = if reply.swapped { client.sequence.swap_bytes() } else { client.sequence };
        reply.bytes[2..4].copy_from_slice(&sequence.to_ne_bytes());
        reply
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) -> &mut Reply {
        let value = if self.swapped { value.swap_bytes() } else { value };
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
        self
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::host::ClientId;

    fn client(swapped: bool, request: Vec<u8>) -> Client {
        let mut client = Client::new(ClientId(1));
        client.swapped = swapped;
        client.request = request;
        client
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ProtocolError::BadMatch.code(150), 8);
        assert_eq!(ProtocolError::BadIDChoice.code(150), 14);
        assert_eq!(ProtocolError::Glx(GlxError::BadContext).code(150), 150);
        assert_eq!(ProtocolError::from(GlxError::BadContextTag).code(150), 154);
        assert_eq!(ProtocolError::Glx(GlxError::BadProfileARB).code(150), 163);
    }

    #[test]
    fn test_read_honours_byte_order() {
        let value: u32 = 0x0102_0304;
        let mut request = vec![0; 8];
        request[4..8].copy_from_slice(&value.to_ne_bytes());
        assert_eq!(read_u32(&client(false, request.clone()), 4), Ok(value));
        assert_eq!(read_u32(&client(true, request), 4), Ok(value.swap_bytes()));
    }

    #[test]
    fn test_short_request() {
        let client = client(false, vec![0; 6]);
        assert_eq!(read_u32(&client, 4), Err(ProtocolError::BadLength));
        assert_eq!(minor_opcode(&Client::new(ClientId(2))), Err(ProtocolError::BadLength));
    }

    #[test]
    fn test_write_then_read() {
        let mut client = client(true, vec![0; 8]);
        write_u32(&mut client, 4, 77).unwrap();
        assert_eq!(read_u32(&client, 4), Ok(77));
    }

    #[test]
    fn test_reply_header() {
        let mut client = client(true, vec![]);
        client.sequence = 0x1234;
        let mut reply = Reply::new(&client);
        reply.put_u32(8, 9);
        let bytes = reply.as_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 1);
        assert_eq!(u16::from_ne_bytes([bytes[2], bytes[3]]), 0x3412);
        assert_eq!(u32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 9u32.swap_bytes());
    }
}

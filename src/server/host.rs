// glvnd/src/server/host.rs
//
//! What the router needs from the X server it runs in.

/// A protocol resource ID.
pub type Xid = u32;

/// Identifies a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

bitflags! {
    /// The access a resource lookup asks for.
    pub struct AccessMode: u32 {
        const READ     = 0x01;
        const WRITE    = 0x02;
        const DESTROY  = 0x04;
        const CREATE   = 0x08;
        const GET_ATTR = 0x10;
    }
}

/// One client connection, as seen while processing its current request.
#[derive(Clone, Debug)]
pub struct Client {
    pub id: ClientId,
    /// Set when the client's byte order differs from the server's.
    pub swapped: bool,
    /// The sequence number of the current request.
    pub sequence: u16,
    /// The raw bytes of the current request, header included.
    pub request: Vec<u8>,
    /// Replies written for this client, in order.
    pub replies: Vec<Vec<u8>>,
    /// The bad value reported alongside the next error.
    pub error_value: u32,
}

impl Client {
    pub fn new(id: ClientId) -> Client {
        Client {
            id,
            swapped: false,
            sequence: 0,
            request: vec![],
            replies: vec![],
            error_value: 0,
        }
    }

    /// Starts processing `request`.
    pub fn begin_request(&mut self, request: Vec<u8>) {
        self.sequence = self.sequence.wrapping_add(1);
        self.request = request;
        self.error_value = 0;
    }

    #[inline]
    pub fn write_reply(&mut self, reply: &[u8]) {
        self.replies.push(reply.to_vec());
    }
}

/// The window system the GLX extension is loaded into.
pub trait WindowSystem {
    fn screen_count(&self) -> usize;

    /// Looks up a drawable of any kind and returns the screen it lives on.
    fn lookup_drawable(&self, id: Xid, access: AccessMode) -> Option<usize>;

    /// Whether `id` is in the client's range and not yet in use.
    fn legal_new_resource(&self, id: Xid, client: &Client) -> bool;

    /// True when the server is shutting down rather than starting a new generation.
    fn server_is_exiting(&self) -> bool;
}

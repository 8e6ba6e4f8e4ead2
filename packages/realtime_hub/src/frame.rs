/// One discrete unit on a client's duplex transport.
///
/// The hosting server maps its WebSocket messages to and from this type so the
/// connection actor stays transport-agnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload bytes of a data frame; `None` for control frames.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(text) => Some(text.as_bytes()),
            Frame::Binary(bytes) => Some(bytes),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close => None,
        }
    }
}

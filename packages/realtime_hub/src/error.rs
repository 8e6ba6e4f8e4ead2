//! Error types for the hub, its connections, and the envelope codec.

/// The hub's control loop is not accepting commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub control loop has shut down")]
    Closed,

    #[error("hub control loop dropped the reply")]
    NoReply,
}

/// Failure on one connection's transport. Always scoped to that connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("close failed: {0}")]
    Close(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

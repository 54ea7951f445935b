//! Error types for the protocol core.
//!
//! Decoding and encoding failures are plain values so callers are forced to
//! handle buffer bounds explicitly. Unknown header codes are not errors at all;
//! see [`crate::protocol::router::Dispatch::NotConsumed`].

use thiserror::Error;

/// Failure while reading a packet body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The packet ended before the field was complete.
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    /// A length prefix or array count was negative (and not the null sentinel).
    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    /// A string field did not contain valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Conversation item type tag outside the known schema.
    #[error("unknown conversation item type: {0}")]
    UnknownItemType(i32),

    /// Modifier type tag outside the known schema.
    #[error("unknown modifier type: {0}")]
    UnknownModifierType(i32),

    /// A modifier of the wrong kind appeared in a typed list (stickers or tapbacks).
    #[error("unexpected {found} modifier in {list} list")]
    UnexpectedModifier { list: &'static str, found: &'static str },
}

impl DecodeError {
    /// True when the error means client and server disagree on the schema,
    /// as opposed to a truncated or corrupt packet.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            DecodeError::UnknownItemType(_)
                | DecodeError::UnknownModifierType(_)
                | DecodeError::UnexpectedModifier { .. }
        )
    }
}

/// Failure while building a packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Writing would grow the buffer past its configured limit.
    #[error("encoder capacity exceeded: {requested} bytes requested, limit is {limit}")]
    CapacityExceeded { requested: usize, limit: usize },

    /// A string, payload or array is too long for an i32 length prefix.
    #[error("length {0} does not fit in a length prefix")]
    LengthOverflow(usize),
}

/// Failure inside an [`crate::transport::EncryptionProvider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("malformed envelope: {0} bytes")]
    MalformedEnvelope(usize),
}

/// Top-level error for protocol operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The peer requires a secured handshake but no encryption provider is configured.
    #[error("handshake requires encryption but no provider is configured")]
    EncryptionUnavailable,

    #[error("connection is not open")]
    NotConnected,

    /// The connection refused to queue the packet.
    #[error("connection rejected the outbound packet")]
    QueueRejected,

    /// A request was made with nothing to ask for.
    #[error("request is empty")]
    EmptyRequest,
}

impl ProtocolError {
    /// True when the error indicates a client/server schema mismatch.
    pub fn is_schema_mismatch(&self) -> bool {
        match self {
            ProtocolError::Decode(e) => e.is_schema_mismatch(),
            _ => false,
        }
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

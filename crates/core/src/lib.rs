//! Bridgelink Core Library
//!
//! Client side of the bridge messaging protocol: packet codec, handshake,
//! dispatch of server updates and reassembly of chunked transfers. The
//! socket, framing and threading belong to the embedding application, which
//! plugs in through the traits in [`transport`].

pub mod compression;
pub mod config;
pub mod encryption;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export important types for easier access
pub use compression::{GzipPackager, Packager};
pub use config::Config;
pub use encryption::PasswordEncryption;
pub use error::{CryptoError, DecodeError, EncodeError, ProtocolError};
pub use protocol::{select_protocol, Dispatch, ProtocolContext, ProtocolV1, ProtocolVersion};
pub use transport::{
    CallbackExecutor, Connection, EncryptionProvider, InlineExecutor, ProtocolListener,
    TokioExecutor,
};

//! Protocol handling for Bridgelink
//!
//! This module contains the binary codec, the wire code tables, the
//! conversation schema and the v1 packet router with its transfer
//! reassembly.

pub mod binary;
pub mod codes;
pub mod constants;
pub mod handshake;
pub mod reassembly;
pub mod router;
pub mod schema;
pub mod version;

// Re-export main types for easy access
pub use binary::{Decoder, Encoder};
pub use codes::{
    AttachmentRequestError, AuthenticationResult, ChatCreationResult, ConnectionResult,
    DeliveryError, GroupActionKind, MessageState, SendResult, TapbackKind, WireCode,
};
pub use constants::{HashAlgorithm, Header, Tier};
pub use handshake::{HandshakeState, ServerInfo};
pub use reassembly::{
    DownloadFailure, DownloadProgress, DownloadedFile, MassRetrievalFile, MassRetrievalProgress,
    MassRetrievalResult, ReassemblyStats, RequestId, UploadChunk, UploadTarget,
};
pub use router::{Dispatch, ProtocolContext, ProtocolStats, ProtocolV1};
pub use schema::{
    AttachmentFilter, AttachmentInfo, ConversationDetails, ConversationInfo, ConversationItem,
    MassRetrievalParams, Modifier,
};
pub use version::{select_protocol, ProtocolVersion, PROTOCOL_MAJOR, PROTOCOL_MINOR};

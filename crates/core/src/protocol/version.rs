//! Protocol generations behind one interface.
//!
//! The connection negotiates a `(major, minor)` version with the server and
//! then drives whichever implementation [`select_protocol`] hands back. Only
//! v5.1 exists today; newer generations slot in as further implementors.

use super::binary::Decoder;
use super::constants::HashAlgorithm;
use super::reassembly::{RequestId, UploadChunk, UploadTarget};
use super::router::{Dispatch, ProtocolContext, ProtocolV1};
use super::schema::MassRetrievalParams;
use crate::compression::Packager;
use crate::error::Result;
use crate::transport::OnSent;

/// Communications generation the v1 handler belongs to
pub const PROTOCOL_MAJOR: i32 = 5;
/// Sub-version of that generation implemented by [`ProtocolV1`]
pub const PROTOCOL_MINOR: i32 = 1;

/// Capabilities every protocol generation provides
pub trait ProtocolVersion: Send {
    /// `(major, minor)` this implementation speaks
    fn version(&self) -> (i32, i32);

    /// Handle one decrypted (or trusted) packet
    fn process_data(&mut self, data: &[u8], was_encrypted: bool) -> Result<Dispatch>;

    /// Answer the server's greeting; `decoder` is positioned after the header
    fn send_authentication_request(&mut self, decoder: &mut Decoder<'_>) -> Result<()>;

    fn send_connection_close(&mut self, on_sent: Option<OnSent>) -> Result<()>;

    fn send_ping(&mut self) -> Result<()>;

    fn send_text_message(&mut self, request_id: RequestId, chat_guid: &str, text: &str) -> Result<()>;

    fn send_text_message_new(
        &mut self,
        request_id: RequestId,
        members: &[String],
        text: &str,
        service: &str,
    ) -> Result<()>;

    fn request_attachment(&mut self, request_id: RequestId, attachment_guid: &str) -> Result<()>;

    fn request_conversation_info(&mut self, chat_guids: &[String]) -> Result<()>;

    fn upload_file_packet(&mut self, chunk: &UploadChunk) -> Result<()>;

    /// Split `data` into chunks and queue all of them; returns the chunk count
    fn upload_file(
        &mut self,
        request_id: RequestId,
        target: UploadTarget,
        file_name: &str,
        data: &[u8],
    ) -> Result<usize>;

    fn request_time_range(&mut self, lower: i64, upper: i64) -> Result<()>;

    fn request_mass_retrieval(&mut self, request_id: RequestId, params: &MassRetrievalParams) -> Result<()>;

    fn request_chat_creation(&mut self, request_id: RequestId, members: &[String], service: &str) -> Result<()>;

    /// Forget a download; late chunks for it are dropped
    fn cancel_download(&mut self, request_id: RequestId) -> bool;

    fn cancel_mass_retrieval(&mut self);

    /// Packager the server uses for file data
    fn packager(&self) -> &'static dyn Packager;

    /// Algorithm of attachment checksums
    fn hash_algorithm(&self) -> HashAlgorithm;

    /// Optional features negotiated per generation
    fn supports_feature(&self, _feature: &str) -> bool {
        false
    }
}

/// Pick the implementation for a negotiated version
pub fn select_protocol(major: i32, minor: i32, context: ProtocolContext) -> Option<Box<dyn ProtocolVersion>> {
    match (major, minor) {
        (PROTOCOL_MAJOR, PROTOCOL_MINOR) => Some(Box::new(ProtocolV1::new(context))),
        _ => None,
    }
}

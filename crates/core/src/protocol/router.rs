//! Packet router for protocol v1
//!
//! Turns inbound packets into listener events and outbound requests into
//! framed packets. Headers are split into two tiers: connection management
//! (close, ping, authentication) is accepted on any channel, while everything
//! else needs a secured channel and a completed handshake.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::binary::{Decoder, Encoder};
use super::codes::{
    AttachmentRequestError, AuthenticationResult, ChatCreationResult, ConnectionResult, SendResult,
    WireCode,
};
use super::constants::{HashAlgorithm, Header, Tier, SECURE_ENVELOPE_CAPACITY};
use super::handshake::{HandshakeState, HandshakeTimer, ServerInfo};
use super::reassembly::{
    ChunkOutcome, DownloadChunk, DownloadFailure, DownloadReassembler, FileChunk,
    MassRetrievalReassembler, ReassemblyStats, RequestId, UploadChunk, UploadChunker, UploadTarget,
};
use super::schema::{read_list, ConversationInfo, ConversationItem, MassRetrievalParams, Modifier};
use super::version::{ProtocolVersion, PROTOCOL_MAJOR, PROTOCOL_MINOR};
use crate::compression::{GzipPackager, Packager};
use crate::config::Config;
use crate::error::{EncodeError, ProtocolError, Result};
use crate::transport::{
    CallbackExecutor, Connection, EncryptionProvider, InlineExecutor, OnSent, ProtocolListener,
};

// ============================================================================
// PROTOCOL CONSTANTS
// ============================================================================

/// Packager v1 servers apply to file data
pub static PROTOCOL_PACKAGER: GzipPackager = GzipPackager;
/// Checksum algorithm v1 servers report
pub const PROTOCOL_HASH: HashAlgorithm = HashAlgorithm::Md5;

/// Bytes of a packet included in decode failure logs
const LOG_PREVIEW_BYTES: usize = 32;

// ============================================================================
// ROUTING STRUCTURES
// ============================================================================

/// Whether a packet was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Consumed,
    /// Unknown header, or a header not accepted in the current state. Nothing
    /// was changed, so a layered handler may still try it.
    NotConsumed,
}

/// Collaborators a protocol implementation is built from
#[derive(Clone)]
pub struct ProtocolContext {
    pub config: Config,
    pub connection: Arc<dyn Connection>,
    pub listener: Arc<dyn ProtocolListener>,
    pub executor: Arc<dyn CallbackExecutor>,
    /// `None` when the transport itself is trusted to be secure
    pub encryption: Option<Arc<dyn EncryptionProvider>>,
}

impl ProtocolContext {
    pub fn new(
        config: Config,
        connection: Arc<dyn Connection>,
        listener: Arc<dyn ProtocolListener>,
    ) -> Self {
        Self {
            config,
            connection,
            listener,
            executor: Arc::new(InlineExecutor),
            encryption: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_encryption(mut self, encryption: Arc<dyn EncryptionProvider>) -> Self {
        self.encryption = Some(encryption);
        self
    }
}

/// Routing statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    pub packets_received: u64,
    pub packets_consumed: u64,
    pub packets_not_consumed: u64,
    pub decode_errors: u64,
    pub packets_sent: u64,
}

// ============================================================================
// PROTOCOL V1
// ============================================================================

pub struct ProtocolV1 {
    config: Config,
    connection: Arc<dyn Connection>,
    listener: Arc<dyn ProtocolListener>,
    executor: Arc<dyn CallbackExecutor>,
    encryption: Option<Arc<dyn EncryptionProvider>>,
    state: HandshakeState,
    handshake_timer: HandshakeTimer,
    mass_retrieval: MassRetrievalReassembler,
    downloads: DownloadReassembler,
    stats: ProtocolStats,
}

impl ProtocolV1 {
    pub fn new(context: ProtocolContext) -> Self {
        info!(
            "🔗 Protocol v{}.{} ready (encryption: {})",
            PROTOCOL_MAJOR,
            PROTOCOL_MINOR,
            if context.encryption.is_some() { "on" } else { "transport" }
        );

        Self {
            config: context.config,
            connection: context.connection,
            listener: context.listener,
            executor: context.executor,
            encryption: context.encryption,
            state: HandshakeState::Unauthenticated,
            handshake_timer: HandshakeTimer::new(),
            mass_retrieval: MassRetrievalReassembler::new(),
            downloads: DownloadReassembler::new(),
            stats: ProtocolStats::default(),
        }
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.state
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn reassembly_stats(&self) -> ReassemblyStats {
        ReassemblyStats {
            mass_retrieval_active: self.mass_retrieval.active_request().is_some(),
            pending_files: self.mass_retrieval.pending_files(),
            active_downloads: self.downloads.active_count(),
        }
    }

    pub fn is_download_active(&self, request_id: RequestId) -> bool {
        self.downloads.is_active(request_id)
    }

    // ========================================================================
    // OUTBOUND HELPERS
    // ========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.connection.is_open() {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    fn encoder(&self, header: Header) -> Result<Encoder> {
        Ok(Encoder::with_header(header, self.config.max_packet_size)?)
    }

    fn queue(&mut self, encoder: Encoder, requires_encryption: bool, on_sent: Option<OnSent>) -> Result<()> {
        if !self.connection.enqueue(encoder.finish(), requires_encryption, on_sent) {
            warn!("⚠️ Connection refused outbound packet");
            return Err(ProtocolError::QueueRejected);
        }
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// Write a header-only packet
    fn queue_header_only(&mut self, header: Header, requires_encryption: bool, on_sent: Option<OnSent>) -> Result<()> {
        let encoder = self.encoder(header)?;
        self.queue(encoder, requires_encryption, on_sent)
    }

    /// Run a listener callback through the executor
    fn deliver<F>(&self, callback: F)
    where
        F: FnOnce(&dyn ProtocolListener) + Send + 'static,
    {
        let listener = Arc::clone(&self.listener);
        self.executor.execute(Box::new(move || callback(listener.as_ref())));
    }

    fn arm_handshake_timer(&self) {
        let Some(timeout) = self.config.handshake_timeout() else {
            return;
        };

        let connection = Arc::clone(&self.connection);
        self.handshake_timer.arm(timeout, move || {
            warn!("⏱️ Server did not answer authentication in time");
            connection.disconnect(ConnectionResult::Timeout);
        });
    }

    // ========================================================================
    // INBOUND DISPATCH
    // ========================================================================

    fn dispatch(&mut self, data: &[u8], was_encrypted: bool) -> Result<Dispatch> {
        let mut decoder = Decoder::new(data);
        let code = decoder.read_int()?;

        let Some(header) = Header::from_code(code) else {
            debug!("Unknown header code {}", code);
            return Ok(Dispatch::NotConsumed);
        };

        // Without a provider, the transport is trusted to have secured the data
        let secure_channel = was_encrypted || self.encryption.is_none();

        match header.tier() {
            Tier::Insecure => self.process_insecure(header, &mut decoder),
            Tier::Secure if !secure_channel => {
                warn!("🔒 Dropping {} received over an insecure channel", header);
                Ok(Dispatch::NotConsumed)
            }
            Tier::Secure if self.state != HandshakeState::Authenticated => {
                warn!("🔒 Dropping {} before authentication completed", header);
                Ok(Dispatch::NotConsumed)
            }
            Tier::Secure => self.process_secure(header, &mut decoder),
        }
    }

    fn process_insecure(&mut self, header: Header, decoder: &mut Decoder<'_>) -> Result<Dispatch> {
        match header {
            Header::Close => {
                info!("👋 Server closed the connection");
                self.connection.disconnect(ConnectionResult::Connection);
            }
            Header::Ping => {
                debug!("🏓 Ping received, sending pong");
                self.queue_header_only(Header::Pong, false, None)?;
            }
            Header::Authentication => self.handle_authentication(decoder)?,
            _ => return Ok(Dispatch::NotConsumed),
        }
        Ok(Dispatch::Consumed)
    }

    fn process_secure(&mut self, header: Header, decoder: &mut Decoder<'_>) -> Result<Dispatch> {
        match header {
            Header::MessageUpdate | Header::TimeRetrieval => self.handle_message_update(decoder)?,
            Header::MassRetrieval => self.handle_mass_retrieval(decoder)?,
            Header::MassRetrievalFile => self.handle_mass_retrieval_file(decoder)?,
            Header::MassRetrievalFinish => self.handle_mass_retrieval_finish(),
            Header::ConversationUpdate => self.handle_conversation_update(decoder)?,
            Header::ModifierUpdate => self.handle_modifier_update(decoder)?,
            Header::AttachmentRequest => self.handle_attachment_data(decoder)?,
            Header::AttachmentRequestConfirm => self.handle_attachment_confirm(decoder)?,
            Header::AttachmentRequestFail => self.handle_attachment_fail(decoder)?,
            Header::SendResult => self.handle_send_result(decoder)?,
            Header::CreateChat => self.handle_chat_creation(decoder)?,
            _ => return Ok(Dispatch::NotConsumed),
        }
        Ok(Dispatch::Consumed)
    }

    // ========================================================================
    // HANDLERS
    // ========================================================================

    fn handle_authentication(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        self.handshake_timer.cancel();

        let result = AuthenticationResult::from_wire(decoder.read_int()?);
        match result.disconnect_reason() {
            None => {
                let server = ServerInfo {
                    installation_id: decoder.read_string()?,
                    device_name: decoder.read_string()?,
                    system_version: decoder.read_string()?,
                    software_version: decoder.read_string()?,
                };
                info!(
                    "✅ Authenticated with {} ({}, server {})",
                    server.device_name, server.system_version, server.software_version
                );
                self.state = HandshakeState::Authenticated;
                self.connection.on_handshake_completed(server);
            }
            Some(reason) => {
                warn!("❌ Authentication rejected: {:?}", result);
                self.state = HandshakeState::Unauthenticated;
                self.connection.disconnect(reason);
            }
        }
        Ok(())
    }

    fn handle_message_update(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let items = read_list(decoder, ConversationItem::read)?;
        debug!("💬 {} conversation items", items.len());
        self.listener.on_message_update(items);
        Ok(())
    }

    fn handle_mass_retrieval(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        let index = decoder.read_int()?;

        if index == 0 {
            let conversations = read_list(decoder, ConversationInfo::read)?;
            let expected_items = decoder.read_int()?;
            let progress = self.mass_retrieval.start(request_id, conversations, expected_items);
            self.listener.on_mass_retrieval_started(progress);
            return Ok(());
        }

        let items = read_list(decoder, ConversationItem::read)?;
        match self.mass_retrieval.push_items(request_id, index, items) {
            ChunkOutcome::Progress(progress) => self.listener.on_mass_retrieval_progress(progress),
            ChunkOutcome::Aborted => self.listener.on_mass_retrieval_failed(request_id),
            ChunkOutcome::Complete(()) | ChunkOutcome::Ignored => {}
        }
        Ok(())
    }

    fn handle_mass_retrieval_file(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        let index = decoder.read_int()?;
        let file_name = if index == 0 { Some(decoder.read_string()?) } else { None };
        let is_last = decoder.read_bool()?;
        let file_guid = decoder.read_string()?;
        let data = decoder.read_payload()?;

        let chunk = FileChunk {
            request_id,
            index,
            file_name,
            is_last,
            file_guid,
            data,
        };
        if let ChunkOutcome::Complete(file) = self.mass_retrieval.push_file(chunk) {
            debug!("📁 Mass retrieval file {} complete ({} bytes)", file.file_name, file.data.len());
            self.listener.on_mass_retrieval_file(file);
        }
        Ok(())
    }

    fn handle_mass_retrieval_finish(&mut self) {
        if let Some(result) = self.mass_retrieval.finish() {
            info!(
                "📥 Mass retrieval {} finished: {} conversations, {} items",
                result.request_id,
                result.conversations.len(),
                result.items.len()
            );
            self.listener.on_mass_retrieval_complete(result);
        }
    }

    fn handle_conversation_update(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let conversations = read_list(decoder, ConversationInfo::read)?;
        self.listener.on_conversation_update(conversations);
        Ok(())
    }

    fn handle_modifier_update(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let modifiers = read_list(decoder, Modifier::read)?;
        self.listener.on_modifier_update(modifiers);
        Ok(())
    }

    fn handle_attachment_data(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        let index = decoder.read_int()?;
        let file_size = if index == 0 { Some(decoder.read_long()?) } else { None };
        let is_last = decoder.read_bool()?;
        let guid = decoder.read_string()?;
        let data = decoder.read_payload()?;

        let chunk = DownloadChunk {
            request_id,
            index,
            file_size,
            is_last,
            guid,
            data,
        };
        match self.downloads.push(chunk) {
            ChunkOutcome::Progress(progress) => self.listener.on_download_progress(progress),
            ChunkOutcome::Complete(file) => {
                self.deliver(move |listener| listener.on_download_complete(file));
            }
            ChunkOutcome::Aborted => {
                self.deliver(move |listener| {
                    listener.on_download_failed(request_id, DownloadFailure::OutOfSequence)
                });
            }
            ChunkOutcome::Ignored => {}
        }
        Ok(())
    }

    fn handle_attachment_confirm(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        if self.downloads.is_active(request_id) {
            self.deliver(move |listener| listener.on_download_confirmed(request_id));
        }
        Ok(())
    }

    fn handle_attachment_fail(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        let error = AttachmentRequestError::from_wire(decoder.read_int()?);

        if let Some(guid) = self.downloads.fail(request_id) {
            warn!("📎 Download {} ({}) failed: {:?}", request_id, guid, error);
            self.deliver(move |listener| {
                listener.on_download_failed(request_id, DownloadFailure::Server(error))
            });
        }
        Ok(())
    }

    fn handle_send_result(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        let result = SendResult::from_wire(decoder.read_int()?);
        let details = decoder.read_nullable_string()?;

        if !result.is_ok() {
            warn!("📤 Send request {} failed: {:?}", request_id, result);
        }
        self.deliver(move |listener| listener.on_send_result(request_id, result, details));
        Ok(())
    }

    fn handle_chat_creation(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        let request_id = decoder.read_short()?;
        let result = ChatCreationResult::from_wire(decoder.read_int()?);
        let details = decoder.read_nullable_string()?;

        self.deliver(move |listener| listener.on_chat_creation_result(request_id, result, details));
        Ok(())
    }
}

impl Drop for ProtocolV1 {
    fn drop(&mut self) {
        self.handshake_timer.cancel();
    }
}

// ============================================================================
// PROTOCOL VERSION IMPLEMENTATION
// ============================================================================

impl ProtocolVersion for ProtocolV1 {
    fn version(&self) -> (i32, i32) {
        (PROTOCOL_MAJOR, PROTOCOL_MINOR)
    }

    fn process_data(&mut self, data: &[u8], was_encrypted: bool) -> Result<Dispatch> {
        self.stats.packets_received += 1;

        match self.dispatch(data, was_encrypted) {
            Ok(Dispatch::Consumed) => {
                self.stats.packets_consumed += 1;
                Ok(Dispatch::Consumed)
            }
            Ok(Dispatch::NotConsumed) => {
                self.stats.packets_not_consumed += 1;
                Ok(Dispatch::NotConsumed)
            }
            Err(err) => {
                self.stats.decode_errors += 1;
                let preview = &data[..data.len().min(LOG_PREVIEW_BYTES)];
                if err.is_schema_mismatch() {
                    warn!("❌ Schema mismatch, server may speak another version: {} [{}]", err, hex::encode(preview));
                } else {
                    warn!("⚠️ Failed to process packet: {} [{}]", err, hex::encode(preview));
                }
                Err(err)
            }
        }
    }

    fn send_authentication_request(&mut self, decoder: &mut Decoder<'_>) -> Result<()> {
        self.ensure_open()?;

        let requires_challenge = decoder.read_bool()?;
        let mut encoder = self.encoder(Header::Authentication)?;

        if requires_challenge {
            let transmission_check = decoder.read_payload()?;
            let provider = self
                .encryption
                .clone()
                .ok_or(ProtocolError::EncryptionUnavailable)?;

            let mut secure = Encoder::new(SECURE_ENVELOPE_CAPACITY);
            secure.write_payload(&transmission_check)?;
            secure.write_string(&self.config.installation_id)?;
            secure.write_string(&self.config.client_name)?;
            secure.write_string(&self.config.platform_id)?;

            let sealed = provider.encrypt(&secure.finish())?;
            encoder.write_payload(&sealed)?;
        } else {
            encoder.write_string(&self.config.installation_id)?;
            encoder.write_string(&self.config.client_name)?;
            encoder.write_string(&self.config.platform_id)?;
        }

        // The envelope is already sealed; the transport must not wrap it again
        self.queue(encoder, false, None)?;
        self.state = HandshakeState::Authenticating;
        self.arm_handshake_timer();

        info!("🔑 Authentication request sent (challenge: {})", requires_challenge);
        Ok(())
    }

    fn send_connection_close(&mut self, on_sent: Option<OnSent>) -> Result<()> {
        self.ensure_open()?;
        self.queue_header_only(Header::Close, false, on_sent)
    }

    fn send_ping(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.queue_header_only(Header::Ping, false, None)
    }

    fn send_text_message(&mut self, request_id: RequestId, chat_guid: &str, text: &str) -> Result<()> {
        self.ensure_open()?;

        let mut encoder = self.encoder(Header::SendTextExisting)?;
        encoder.write_short(request_id)?;
        encoder.write_string(chat_guid)?;
        encoder.write_string(text)?;
        self.queue(encoder, true, None)
    }

    fn send_text_message_new(
        &mut self,
        request_id: RequestId,
        members: &[String],
        text: &str,
        service: &str,
    ) -> Result<()> {
        self.ensure_open()?;

        let mut encoder = self.encoder(Header::SendTextNew)?;
        encoder.write_short(request_id)?;
        encoder.write_string_array(members)?;
        encoder.write_string(service)?;
        encoder.write_string(text)?;
        self.queue(encoder, true, None)
    }

    fn request_attachment(&mut self, request_id: RequestId, attachment_guid: &str) -> Result<()> {
        self.ensure_open()?;

        let requested = self.config.attachment_chunk_size;
        let chunk_size = i32::try_from(requested).map_err(|_| EncodeError::LengthOverflow(requested))?;
        let mut encoder = self.encoder(Header::AttachmentRequest)?;
        encoder.write_short(request_id)?;
        encoder.write_int(chunk_size)?;
        encoder.write_string(attachment_guid)?;
        self.queue(encoder, true, None)?;

        self.downloads.register(request_id, attachment_guid);
        Ok(())
    }

    fn request_conversation_info(&mut self, chat_guids: &[String]) -> Result<()> {
        self.ensure_open()?;
        if chat_guids.is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }

        let mut encoder = self.encoder(Header::ConversationUpdate)?;
        encoder.write_string_array(chat_guids)?;
        self.queue(encoder, true, None)
    }

    fn upload_file_packet(&mut self, chunk: &UploadChunk) -> Result<()> {
        self.ensure_open()?;

        let header = match chunk.target {
            UploadTarget::Existing { .. } => Header::SendFileExisting,
            UploadTarget::New { .. } => Header::SendFileNew,
        };
        let mut encoder = self.encoder(header)?;
        encoder.write_short(chunk.request_id)?;
        encoder.write_int(chunk.index)?;
        encoder.write_bool(chunk.is_last)?;

        let file_name = chunk.file_name.as_deref().unwrap_or_default();
        match &chunk.target {
            UploadTarget::Existing { chat_guid } => {
                encoder.write_string(chat_guid)?;
                encoder.write_payload(&chunk.data)?;
                if chunk.index == 0 {
                    encoder.write_string(file_name)?;
                }
            }
            UploadTarget::New { members, service } => {
                encoder.write_string_array(members)?;
                encoder.write_payload(&chunk.data)?;
                if chunk.index == 0 {
                    encoder.write_string(file_name)?;
                    encoder.write_string(service)?;
                }
            }
        }
        self.queue(encoder, true, None)
    }

    fn upload_file(
        &mut self,
        request_id: RequestId,
        target: UploadTarget,
        file_name: &str,
        data: &[u8],
    ) -> Result<usize> {
        self.ensure_open()?;

        let chunker = UploadChunker::new(request_id, target, file_name, data, self.config.attachment_chunk_size);
        let mut sent = 0;
        for chunk in chunker {
            self.upload_file_packet(&chunk)?;
            sent += 1;
        }

        debug!("📤 Upload {} queued: {} bytes in {} chunks", request_id, data.len(), sent);
        Ok(sent)
    }

    fn request_time_range(&mut self, lower: i64, upper: i64) -> Result<()> {
        self.ensure_open()?;

        let mut encoder = self.encoder(Header::TimeRetrieval)?;
        encoder.write_long(lower)?;
        encoder.write_long(upper)?;
        self.queue(encoder, true, None)
    }

    fn request_mass_retrieval(&mut self, request_id: RequestId, params: &MassRetrievalParams) -> Result<()> {
        self.ensure_open()?;

        let mut encoder = self.encoder(Header::MassRetrieval)?;
        encoder.write_short(request_id)?;
        params.write(&mut encoder)?;
        self.queue(encoder, true, None)
    }

    fn request_chat_creation(&mut self, request_id: RequestId, members: &[String], service: &str) -> Result<()> {
        self.ensure_open()?;

        let mut encoder = self.encoder(Header::CreateChat)?;
        encoder.write_short(request_id)?;
        encoder.write_string_array(members)?;
        encoder.write_string(service)?;
        self.queue(encoder, true, None)
    }

    fn cancel_download(&mut self, request_id: RequestId) -> bool {
        self.downloads.cancel(request_id)
    }

    fn cancel_mass_retrieval(&mut self) {
        self.mass_retrieval.cancel();
    }

    fn packager(&self) -> &'static dyn Packager {
        &PROTOCOL_PACKAGER
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        PROTOCOL_HASH
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CryptoError, DecodeError};
    use crate::protocol::codes::{DeliveryError, MessageState};
    use crate::protocol::reassembly::{DownloadedFile, MassRetrievalResult};
    use crate::protocol::schema::{write_list, ItemHeader, MessageInfo};
    use std::sync::Mutex;

    // ========================================================================
    // TEST DOUBLES
    // ========================================================================

    #[derive(Default)]
    struct RecordingConnection {
        closed: bool,
        packets: Mutex<Vec<(Vec<u8>, bool)>>,
        disconnects: Mutex<Vec<ConnectionResult>>,
        servers: Mutex<Vec<ServerInfo>>,
    }

    impl Connection for RecordingConnection {
        fn is_open(&self) -> bool {
            !self.closed
        }

        fn enqueue(&self, packet: Vec<u8>, requires_encryption: bool, on_sent: Option<OnSent>) -> bool {
            self.packets.lock().unwrap().push((packet, requires_encryption));
            if let Some(on_sent) = on_sent {
                on_sent();
            }
            true
        }

        fn disconnect(&self, reason: ConnectionResult) {
            self.disconnects.lock().unwrap().push(reason);
        }

        fn on_handshake_completed(&self, server: ServerInfo) {
            self.servers.lock().unwrap().push(server);
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        items: Mutex<Vec<ConversationItem>>,
        mass_results: Mutex<Vec<MassRetrievalResult>>,
        mass_failures: Mutex<Vec<RequestId>>,
        downloads: Mutex<Vec<DownloadedFile>>,
        download_failures: Mutex<Vec<(RequestId, DownloadFailure)>>,
        confirmations: Mutex<Vec<RequestId>>,
        send_results: Mutex<Vec<(RequestId, SendResult, Option<String>)>>,
        chat_results: Mutex<Vec<(RequestId, ChatCreationResult, Option<String>)>>,
    }

    impl ProtocolListener for RecordingListener {
        fn on_message_update(&self, items: Vec<ConversationItem>) {
            self.items.lock().unwrap().extend(items);
        }

        fn on_mass_retrieval_complete(&self, result: MassRetrievalResult) {
            self.mass_results.lock().unwrap().push(result);
        }

        fn on_mass_retrieval_failed(&self, request_id: RequestId) {
            self.mass_failures.lock().unwrap().push(request_id);
        }

        fn on_download_complete(&self, file: DownloadedFile) {
            self.downloads.lock().unwrap().push(file);
        }

        fn on_download_confirmed(&self, request_id: RequestId) {
            self.confirmations.lock().unwrap().push(request_id);
        }

        fn on_download_failed(&self, request_id: RequestId, failure: DownloadFailure) {
            self.download_failures.lock().unwrap().push((request_id, failure));
        }

        fn on_send_result(&self, request_id: RequestId, result: SendResult, details: Option<String>) {
            self.send_results.lock().unwrap().push((request_id, result, details));
        }

        fn on_chat_creation_result(&self, request_id: RequestId, result: ChatCreationResult, details: Option<String>) {
            self.chat_results.lock().unwrap().push((request_id, result, details));
        }
    }

    /// Reversible stand-in cipher so tests can inspect the sealed envelope
    struct XorEncryption;

    impl EncryptionProvider for XorEncryption {
        fn encrypt(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Ok(plaintext.iter().map(|b| b ^ 0x5A).collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            self.encrypt(ciphertext)
        }
    }

    struct FailingEncryption;

    impl EncryptionProvider for FailingEncryption {
        fn encrypt(&self, _plaintext: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Err(CryptoError::Encrypt)
        }

        fn decrypt(&self, _ciphertext: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Err(CryptoError::Decrypt)
        }
    }

    struct Harness {
        protocol: ProtocolV1,
        connection: Arc<RecordingConnection>,
        listener: Arc<RecordingListener>,
    }

    fn test_config() -> Config {
        Config {
            installation_id: "install-1".to_string(),
            client_name: "test client".to_string(),
            platform_id: "rust".to_string(),
            max_packet_size: 64 * 1024,
            attachment_chunk_size: 4,
            handshake_timeout_ms: 0,
        }
    }

    fn harness_with(encryption: Option<Arc<dyn EncryptionProvider>>) -> Harness {
        let connection = Arc::new(RecordingConnection::default());
        let listener = Arc::new(RecordingListener::default());
        let mut context = ProtocolContext::new(
            test_config(),
            Arc::clone(&connection) as Arc<dyn Connection>,
            Arc::clone(&listener) as Arc<dyn ProtocolListener>,
        );
        if let Some(encryption) = encryption {
            context = context.with_encryption(encryption);
        }
        Harness {
            protocol: ProtocolV1::new(context),
            connection,
            listener,
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn authenticated() -> Harness {
        let mut h = harness();
        h.protocol.process_data(&auth_ok_packet(), false).unwrap();
        assert_eq!(h.protocol.handshake_state(), HandshakeState::Authenticated);
        h
    }

    fn packet(header: Header, body: impl FnOnce(&mut Encoder)) -> Vec<u8> {
        let mut encoder = Encoder::with_header(header, 64 * 1024).unwrap();
        body(&mut encoder);
        encoder.finish()
    }

    fn auth_ok_packet() -> Vec<u8> {
        packet(Header::Authentication, |e| {
            e.write_int(0).unwrap();
            for field in ["server-1", "Mac mini", "14.2", "3.5.0"] {
                e.write_string(field).unwrap();
            }
        })
    }

    fn message(guid: &str) -> ConversationItem {
        ConversationItem::Message(MessageInfo {
            header: ItemHeader {
                server_id: 10,
                guid: guid.to_string(),
                chat_guid: "chat".to_string(),
                date: 1,
            },
            text: Some("hi".to_string()),
            subject: None,
            sender: Some("bob".to_string()),
            attachments: vec![],
            stickers: vec![],
            tapbacks: vec![],
            send_effect: None,
            state: MessageState::Delivered,
            error: DeliveryError::Ok,
            date_read: 0,
        })
    }

    fn sent(h: &Harness) -> Vec<(Vec<u8>, bool)> {
        h.connection.packets.lock().unwrap().clone()
    }

    // ========================================================================
    // HANDSHAKE
    // ========================================================================

    #[test]
    fn test_authentication_request_without_challenge() {
        let mut h = harness();
        let greeting = [0u8];
        h.protocol
            .send_authentication_request(&mut Decoder::new(&greeting))
            .unwrap();

        let packets = sent(&h);
        assert_eq!(packets.len(), 1);
        let (bytes, encrypted) = &packets[0];
        assert!(!encrypted);

        let mut decoder = Decoder::new(bytes);
        assert_eq!(decoder.read_int().unwrap(), 101);
        assert_eq!(decoder.read_string().unwrap(), "install-1");
        assert_eq!(decoder.read_string().unwrap(), "test client");
        assert_eq!(decoder.read_string().unwrap(), "rust");
        assert_eq!(decoder.remaining(), 0);
        assert_eq!(h.protocol.handshake_state(), HandshakeState::Authenticating);
    }

    #[test]
    fn test_authentication_request_with_challenge() {
        let mut h = harness_with(Some(Arc::new(XorEncryption)));
        let mut greeting = Encoder::new(64);
        greeting.write_bool(true).unwrap();
        greeting.write_payload(&[1, 2, 3, 4]).unwrap();
        let greeting = greeting.finish();

        h.protocol
            .send_authentication_request(&mut Decoder::new(&greeting))
            .unwrap();

        let packets = sent(&h);
        let (bytes, encrypted) = &packets[0];
        assert!(!encrypted, "sealed handshake goes out without transport encryption");

        let mut outer = Decoder::new(bytes);
        assert_eq!(outer.read_int().unwrap(), 101);
        let sealed = outer.read_payload().unwrap();
        assert_eq!(outer.remaining(), 0);

        let plain = XorEncryption.decrypt(&sealed).unwrap();
        let mut inner = Decoder::new(&plain);
        assert_eq!(inner.read_payload().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(inner.read_string().unwrap(), "install-1");
        assert_eq!(inner.read_string().unwrap(), "test client");
        assert_eq!(inner.read_string().unwrap(), "rust");
        assert_eq!(inner.remaining(), 0);
    }

    #[test]
    fn test_challenge_without_provider_fails_closed() {
        let mut h = harness();
        let mut greeting = Encoder::new(64);
        greeting.write_bool(true).unwrap();
        greeting.write_payload(b"check").unwrap();
        let greeting = greeting.finish();

        let err = h
            .protocol
            .send_authentication_request(&mut Decoder::new(&greeting))
            .unwrap_err();
        assert_eq!(err, ProtocolError::EncryptionUnavailable);
        assert!(sent(&h).is_empty());
        assert_eq!(h.protocol.handshake_state(), HandshakeState::Unauthenticated);
    }

    #[test]
    fn test_encryption_failure_sends_nothing() {
        let mut h = harness_with(Some(Arc::new(FailingEncryption)));
        let mut greeting = Encoder::new(64);
        greeting.write_bool(true).unwrap();
        greeting.write_payload(b"check").unwrap();
        let greeting = greeting.finish();

        let err = h
            .protocol
            .send_authentication_request(&mut Decoder::new(&greeting))
            .unwrap_err();
        assert_eq!(err, ProtocolError::Crypto(CryptoError::Encrypt));
        assert!(sent(&h).is_empty());
    }

    #[test]
    fn test_oversized_challenge_overflows_inner_envelope() {
        let mut h = harness_with(Some(Arc::new(XorEncryption)));
        let mut greeting = Encoder::new(4096);
        greeting.write_bool(true).unwrap();
        greeting.write_payload(&[0u8; 2000]).unwrap();
        let greeting = greeting.finish();

        let err = h
            .protocol
            .send_authentication_request(&mut Decoder::new(&greeting))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Encode(EncodeError::CapacityExceeded { .. })));
        assert!(sent(&h).is_empty());
    }

    #[test]
    fn test_authentication_success_completes_handshake() {
        let h = authenticated();
        let servers = h.connection.servers.lock().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].device_name, "Mac mini");
        assert_eq!(servers[0].software_version, "3.5.0");
    }

    #[test]
    fn test_authentication_failure_disconnects() {
        for (code, reason) in [
            (1, ConnectionResult::Unauthorized),
            (2, ConnectionResult::BadRequest),
            (77, ConnectionResult::Unknown),
        ] {
            let mut h = harness();
            let response = packet(Header::Authentication, |e| e.write_int(code).unwrap());
            assert_eq!(h.protocol.process_data(&response, false).unwrap(), Dispatch::Consumed);
            assert_eq!(*h.connection.disconnects.lock().unwrap(), vec![reason]);
            assert_eq!(h.protocol.handshake_state(), HandshakeState::Unauthenticated);
        }
    }

    // ========================================================================
    // TIER CLASSIFICATION
    // ========================================================================

    #[test]
    fn test_ping_is_answered_with_pong() {
        let mut h = harness();
        let ping = packet(Header::Ping, |_| {});
        assert_eq!(h.protocol.process_data(&ping, false).unwrap(), Dispatch::Consumed);
        assert_eq!(sent(&h), vec![(vec![0, 0, 0, 2], false)]);
    }

    #[test]
    fn test_close_disconnects() {
        let mut h = harness();
        let close = packet(Header::Close, |_| {});
        h.protocol.process_data(&close, false).unwrap();
        assert_eq!(*h.connection.disconnects.lock().unwrap(), vec![ConnectionResult::Connection]);
    }

    #[test]
    fn test_unknown_header_not_consumed() {
        let mut h = authenticated();
        let before = h.protocol.reassembly_stats();

        for code in [3i32, 99, 300, 301, 401, 404, 2] {
            let data = code.to_be_bytes().to_vec();
            assert_eq!(h.protocol.process_data(&data, true).unwrap(), Dispatch::NotConsumed);
        }

        assert_eq!(h.protocol.reassembly_stats(), before);
        assert_eq!(h.protocol.handshake_state(), HandshakeState::Authenticated);
        assert!(sent(&h).is_empty());
    }

    #[test]
    fn test_unknown_header_on_insecure_channel_leaves_sessions() {
        let mut h = harness_with(Some(Arc::new(XorEncryption)));
        h.protocol.process_data(&auth_ok_packet(), false).unwrap();
        h.protocol.request_attachment(1, "att").unwrap();
        h.protocol.process_data(&mass_retrieval_start(2, 5), true).unwrap();

        let before = h.protocol.reassembly_stats();
        let sent_before = sent(&h).len();
        assert!(before.mass_retrieval_active);
        assert_eq!(before.active_downloads, 1);

        for code in [99i32, 3, 300, 2] {
            let data = code.to_be_bytes().to_vec();
            assert_eq!(h.protocol.process_data(&data, false).unwrap(), Dispatch::NotConsumed);
        }

        assert_eq!(h.protocol.reassembly_stats(), before);
        assert_eq!(h.protocol.handshake_state(), HandshakeState::Authenticated);
        assert_eq!(sent(&h).len(), sent_before);
        assert!(h.connection.disconnects.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hostile_item_count_is_rejected() {
        let mut h = authenticated();
        let mut data = packet(Header::MessageUpdate, |e| e.write_int(i32::MAX).unwrap());
        data.extend(std::iter::repeat(0xFF).take(1024 * 1024));

        let err = h.protocol.process_data(&data, true).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(h.listener.items.lock().unwrap().is_empty());
        assert_eq!(h.protocol.stats().decode_errors, 1);
    }

    #[test]
    fn test_secure_header_rejected_on_insecure_channel() {
        let mut h = harness_with(Some(Arc::new(XorEncryption)));
        h.protocol.process_data(&auth_ok_packet(), false).unwrap();

        let update = packet(Header::MessageUpdate, |e| {
            write_list(e, &[message("m1")], ConversationItem::write).unwrap();
        });
        assert_eq!(h.protocol.process_data(&update, false).unwrap(), Dispatch::NotConsumed);
        assert!(h.listener.items.lock().unwrap().is_empty());

        assert_eq!(h.protocol.process_data(&update, true).unwrap(), Dispatch::Consumed);
        assert_eq!(h.listener.items.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_secure_header_requires_authentication() {
        let mut h = harness();
        let update = packet(Header::MessageUpdate, |e| e.write_array_header(0).unwrap());
        assert_eq!(h.protocol.process_data(&update, true).unwrap(), Dispatch::NotConsumed);
    }

    #[test]
    fn test_underflow_is_reported_without_disconnect() {
        let mut h = authenticated();
        let truncated = packet(Header::SendResult, |e| e.write_short(1).unwrap());

        let err = h.protocol.process_data(&truncated, true).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(DecodeError::Underflow { .. })));
        assert!(h.connection.disconnects.lock().unwrap().is_empty());
        assert_eq!(h.protocol.stats().decode_errors, 1);

        // Too short to even hold a header
        assert!(h.protocol.process_data(&[0, 1], true).is_err());
    }

    #[test]
    fn test_schema_mismatch_is_surfaced() {
        let mut h = authenticated();
        let bad = packet(Header::ModifierUpdate, |e| {
            e.write_array_header(1).unwrap();
            e.write_int(42).unwrap();
            e.write_string("target").unwrap();
        });
        let err = h.protocol.process_data(&bad, true).unwrap_err();
        assert!(err.is_schema_mismatch());
    }

    // ========================================================================
    // TRANSFERS
    // ========================================================================

    fn mass_retrieval_start(id: i16, expected: i32) -> Vec<u8> {
        packet(Header::MassRetrieval, |e| {
            e.write_short(id).unwrap();
            e.write_int(0).unwrap();
            write_list(e, &[ConversationInfo::unavailable("chat")], ConversationInfo::write).unwrap();
            e.write_int(expected).unwrap();
        })
    }

    fn mass_retrieval_batch(id: i16, index: i32, items: &[ConversationItem]) -> Vec<u8> {
        packet(Header::MassRetrieval, |e| {
            e.write_short(id).unwrap();
            e.write_int(index).unwrap();
            write_list(e, items, ConversationItem::write).unwrap();
        })
    }

    #[test]
    fn test_mass_retrieval_end_to_end() {
        let mut h = authenticated();
        h.protocol.process_data(&mass_retrieval_start(1, 3), true).unwrap();
        h.protocol
            .process_data(&mass_retrieval_batch(1, 1, &[message("a"), message("b")]), true)
            .unwrap();
        h.protocol.process_data(&mass_retrieval_batch(1, 2, &[message("c")]), true).unwrap();
        h.protocol.process_data(&packet(Header::MassRetrievalFinish, |_| {}), true).unwrap();

        let results = h.listener.mass_results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].items.len(), 3);
        assert_eq!(results[0].conversations.len(), 1);
        assert!(!h.protocol.reassembly_stats().mass_retrieval_active);
    }

    #[test]
    fn test_mass_retrieval_out_of_order_fails() {
        let mut h = authenticated();
        h.protocol.process_data(&mass_retrieval_start(6, 2), true).unwrap();
        h.protocol.process_data(&mass_retrieval_batch(6, 2, &[message("x")]), true).unwrap();

        assert_eq!(*h.listener.mass_failures.lock().unwrap(), vec![6]);
        assert!(!h.protocol.reassembly_stats().mass_retrieval_active);
    }

    fn attachment_chunk(id: i16, index: i32, last: bool, guid: &str, data: &[u8]) -> Vec<u8> {
        packet(Header::AttachmentRequest, |e| {
            e.write_short(id).unwrap();
            e.write_int(index).unwrap();
            if index == 0 {
                e.write_long(4).unwrap();
            }
            e.write_bool(last).unwrap();
            e.write_string(guid).unwrap();
            e.write_payload(data).unwrap();
        })
    }

    #[test]
    fn test_download_flow() {
        let mut h = authenticated();
        h.protocol.request_attachment(3, "att-guid").unwrap();

        let (request, encrypted) = sent(&h).remove(0);
        assert!(encrypted);
        let mut decoder = Decoder::new(&request);
        assert_eq!(decoder.read_int().unwrap(), 207);
        assert_eq!(decoder.read_short().unwrap(), 3);
        assert_eq!(decoder.read_int().unwrap(), 4);
        assert_eq!(decoder.read_string().unwrap(), "att-guid");

        h.protocol.process_data(&packet(Header::AttachmentRequestConfirm, |e| e.write_short(3).unwrap()), true).unwrap();
        h.protocol.process_data(&attachment_chunk(3, 0, false, "att-guid", b"ab"), true).unwrap();
        // Mismatched GUID is dropped without touching the session
        h.protocol.process_data(&attachment_chunk(3, 1, false, "other", b"zz"), true).unwrap();
        h.protocol.process_data(&attachment_chunk(3, 1, true, "att-guid", b"cd"), true).unwrap();

        assert_eq!(*h.listener.confirmations.lock().unwrap(), vec![3]);
        let downloads = h.listener.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].data, b"abcd");
        assert!(!h.protocol.is_download_active(3));
    }

    #[test]
    fn test_download_failure_from_server() {
        let mut h = authenticated();
        h.protocol.request_attachment(8, "att").unwrap();

        let fail = packet(Header::AttachmentRequestFail, |e| {
            e.write_short(8).unwrap();
            e.write_int(2).unwrap();
        });
        h.protocol.process_data(&fail, true).unwrap();

        assert_eq!(
            *h.listener.download_failures.lock().unwrap(),
            vec![(8, DownloadFailure::Server(AttachmentRequestError::NotSaved))]
        );
        // A late chunk for the failed request is dropped
        h.protocol.process_data(&attachment_chunk(8, 0, true, "att", b"x"), true).unwrap();
        assert!(h.listener.downloads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_download_ignores_chunks() {
        let mut h = authenticated();
        h.protocol.request_attachment(2, "att").unwrap();
        assert!(h.protocol.cancel_download(2));

        h.protocol.process_data(&attachment_chunk(2, 0, true, "att", b"x"), true).unwrap();
        assert!(h.listener.downloads.lock().unwrap().is_empty());
        assert!(h.listener.download_failures.lock().unwrap().is_empty());
    }

    // ========================================================================
    // RESULTS
    // ========================================================================

    #[test]
    fn test_send_and_chat_results_are_mapped() {
        let mut h = authenticated();
        let send = packet(Header::SendResult, |e| {
            e.write_short(11).unwrap();
            e.write_int(4).unwrap();
            e.write_nullable_string(Some("no such chat")).unwrap();
        });
        let create = packet(Header::CreateChat, |e| {
            e.write_short(12).unwrap();
            e.write_int(0).unwrap();
            e.write_nullable_string(Some("chat-guid")).unwrap();
        });
        h.protocol.process_data(&send, true).unwrap();
        h.protocol.process_data(&create, true).unwrap();

        assert_eq!(
            *h.listener.send_results.lock().unwrap(),
            vec![(11, SendResult::NoConversation, Some("no such chat".to_string()))]
        );
        assert_eq!(
            *h.listener.chat_results.lock().unwrap(),
            vec![(12, ChatCreationResult::Ok, Some("chat-guid".to_string()))]
        );
    }

    #[test]
    fn test_unknown_result_code_uses_fallback() {
        let mut h = authenticated();
        let send = packet(Header::SendResult, |e| {
            e.write_short(1).unwrap();
            e.write_int(1234).unwrap();
            e.write_nullable_string(None).unwrap();
        });
        h.protocol.process_data(&send, true).unwrap();
        assert_eq!(h.listener.send_results.lock().unwrap()[0].1, SendResult::Unknown);
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    #[test]
    fn test_requests_fail_when_closed() {
        let connection = Arc::new(RecordingConnection { closed: true, ..Default::default() });
        let listener = Arc::new(RecordingListener::default());
        let mut protocol = ProtocolV1::new(ProtocolContext::new(test_config(), connection.clone(), listener));

        assert_eq!(protocol.send_ping().unwrap_err(), ProtocolError::NotConnected);
        assert_eq!(protocol.send_text_message(1, "c", "t").unwrap_err(), ProtocolError::NotConnected);
        assert_eq!(protocol.request_attachment(1, "g").unwrap_err(), ProtocolError::NotConnected);
        assert!(!protocol.is_download_active(1));
        assert!(connection.packets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_text_message_layouts() {
        let mut h = authenticated();
        h.protocol.send_text_message(5, "chat-1", "hello").unwrap();
        h.protocol
            .send_text_message_new(6, &["a".to_string(), "b".to_string()], "yo", "SMS")
            .unwrap();

        let packets = sent(&h);
        assert!(packets.iter().all(|(_, encrypted)| *encrypted));

        let mut existing = Decoder::new(&packets[0].0);
        assert_eq!(existing.read_int().unwrap(), 401);
        assert_eq!(existing.read_short().unwrap(), 5);
        assert_eq!(existing.read_string().unwrap(), "chat-1");
        assert_eq!(existing.read_string().unwrap(), "hello");

        let mut new = Decoder::new(&packets[1].0);
        assert_eq!(new.read_int().unwrap(), 402);
        assert_eq!(new.read_short().unwrap(), 6);
        assert_eq!(new.read_string_array().unwrap(), vec!["a", "b"]);
        assert_eq!(new.read_string().unwrap(), "SMS");
        assert_eq!(new.read_string().unwrap(), "yo");
    }

    #[test]
    fn test_upload_to_new_chat_layout() {
        let mut h = authenticated();
        let target = UploadTarget::New {
            members: vec!["bob".to_string()],
            service: "iMessage".to_string(),
        };
        let count = h.protocol.upload_file(4, target, "f.bin", b"abcdef").unwrap();
        assert_eq!(count, 2);

        let packets = sent(&h);
        let mut first = Decoder::new(&packets[0].0);
        assert_eq!(first.read_int().unwrap(), 404);
        assert_eq!(first.read_short().unwrap(), 4);
        assert_eq!(first.read_int().unwrap(), 0);
        assert!(!first.read_bool().unwrap());
        assert_eq!(first.read_string_array().unwrap(), vec!["bob"]);
        assert_eq!(first.read_payload().unwrap(), b"abcd");
        assert_eq!(first.read_string().unwrap(), "f.bin");
        assert_eq!(first.read_string().unwrap(), "iMessage");
        assert_eq!(first.remaining(), 0);

        let mut second = Decoder::new(&packets[1].0);
        assert_eq!(second.read_int().unwrap(), 404);
        assert_eq!(second.read_short().unwrap(), 4);
        assert_eq!(second.read_int().unwrap(), 1);
        assert!(second.read_bool().unwrap());
        assert_eq!(second.read_string_array().unwrap(), vec!["bob"]);
        assert_eq!(second.read_payload().unwrap(), b"ef");
        assert_eq!(second.remaining(), 0);
    }

    #[test]
    fn test_upload_empty_file_to_existing_chat() {
        let mut h = authenticated();
        let target = UploadTarget::Existing { chat_guid: "chat".to_string() };
        assert_eq!(h.protocol.upload_file(1, target, "empty.txt", b"").unwrap(), 1);

        let packets = sent(&h);
        let mut decoder = Decoder::new(&packets[0].0);
        assert_eq!(decoder.read_int().unwrap(), 403);
        assert_eq!(decoder.read_short().unwrap(), 1);
        assert_eq!(decoder.read_int().unwrap(), 0);
        assert!(decoder.read_bool().unwrap());
        assert_eq!(decoder.read_string().unwrap(), "chat");
        assert!(decoder.read_payload().unwrap().is_empty());
        assert_eq!(decoder.read_string().unwrap(), "empty.txt");
    }

    #[test]
    fn test_conversation_info_request() {
        let mut h = authenticated();
        assert_eq!(h.protocol.request_conversation_info(&[]).unwrap_err(), ProtocolError::EmptyRequest);

        h.protocol.request_conversation_info(&["c1".to_string()]).unwrap();
        let packets = sent(&h);
        let mut decoder = Decoder::new(&packets[0].0);
        assert_eq!(decoder.read_int().unwrap(), 205);
        assert_eq!(decoder.read_string_array().unwrap(), vec!["c1"]);
    }

    #[test]
    fn test_time_range_and_chat_creation_layouts() {
        let mut h = authenticated();
        h.protocol.request_time_range(100, 200).unwrap();
        h.protocol.request_chat_creation(9, &["x".to_string()], "iMessage").unwrap();
        h.protocol.request_mass_retrieval(10, &MassRetrievalParams::default()).unwrap();

        let packets = sent(&h);
        let mut range = Decoder::new(&packets[0].0);
        assert_eq!(range.read_int().unwrap(), 201);
        assert_eq!(range.read_long().unwrap(), 100);
        assert_eq!(range.read_long().unwrap(), 200);

        let mut create = Decoder::new(&packets[1].0);
        assert_eq!(create.read_int().unwrap(), 405);
        assert_eq!(create.read_short().unwrap(), 9);
        assert_eq!(create.read_string_array().unwrap(), vec!["x"]);
        assert_eq!(create.read_string().unwrap(), "iMessage");

        assert_eq!(packets[2].0, vec![0, 0, 0, 202, 0, 10, 0, 0]);
    }

    #[test]
    fn test_connection_close_runs_on_sent() {
        let mut h = harness();
        let (tx, rx) = std::sync::mpsc::channel();
        h.protocol
            .send_connection_close(Some(Box::new(move || {
                let _ = tx.send(());
            })))
            .unwrap();

        assert!(rx.try_recv().is_ok());
        assert_eq!(sent(&h), vec![(vec![0, 0, 0, 0], false)]);
    }

    #[test]
    fn test_oversized_chunk_size_is_not_clamped() {
        let connection = Arc::new(RecordingConnection::default());
        let listener = Arc::new(RecordingListener::default());
        let requested = i32::MAX as usize + 1;
        let config = Config { attachment_chunk_size: requested, ..test_config() };
        let mut protocol = ProtocolV1::new(ProtocolContext::new(config, connection.clone(), listener));

        let err = protocol.request_attachment(1, "att").unwrap_err();
        assert_eq!(err, ProtocolError::Encode(EncodeError::LengthOverflow(requested)));
        assert!(!protocol.is_download_active(1));
        assert!(connection.packets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_packet_over_limit_is_rejected() {
        let connection = Arc::new(RecordingConnection::default());
        let listener = Arc::new(RecordingListener::default());
        let config = Config { max_packet_size: 16, ..test_config() };
        let mut protocol = ProtocolV1::new(ProtocolContext::new(config, connection.clone(), listener));

        let err = protocol.send_text_message(1, "chat", "a message that is too long").unwrap_err();
        assert!(matches!(err, ProtocolError::Encode(EncodeError::CapacityExceeded { .. })));
        assert!(connection.packets.lock().unwrap().is_empty());
    }
}

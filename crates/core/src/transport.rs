//! Collaborator interfaces the protocol core talks to
//!
//! The core owns no socket, no storage and no UI. It writes framed packets to
//! a [`Connection`], optionally seals handshake data with an
//! [`EncryptionProvider`], and reports decoded events to a
//! [`ProtocolListener`]. Completion notifications are routed through a
//! [`CallbackExecutor`] so the caller decides which thread they run on.

use std::fmt;

use tokio::runtime::Handle;
use tracing::debug;

use crate::error::CryptoError;
use crate::protocol::codes::{ChatCreationResult, ConnectionResult, SendResult};
use crate::protocol::handshake::ServerInfo;
use crate::protocol::reassembly::{
    DownloadFailure, DownloadProgress, DownloadedFile, MassRetrievalFile, MassRetrievalProgress,
    MassRetrievalResult, RequestId,
};
use crate::protocol::schema::{ConversationInfo, ConversationItem, Modifier};

/// Hook run once a packet has actually been written to the wire
pub type OnSent = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// CONNECTION
// ============================================================================

/// Outbound side of the transport
pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a framed packet. `requires_encryption` asks the transport to
    /// encrypt it before writing. Returns `false` if the packet was refused.
    fn enqueue(&self, packet: Vec<u8>, requires_encryption: bool, on_sent: Option<OnSent>) -> bool;

    fn disconnect(&self, reason: ConnectionResult);

    fn on_handshake_completed(&self, server: ServerInfo);
}

// ============================================================================
// ENCRYPTION
// ============================================================================

/// Symmetric encryption shared with the server
pub trait EncryptionProvider: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

// ============================================================================
// LISTENER
// ============================================================================

/// Receives decoded application events.
///
/// Every method has an empty default so listeners only implement what they
/// care about.
#[allow(unused_variables)]
pub trait ProtocolListener: Send + Sync {
    /// Live message update (200) or a time-range retrieval result (201)
    fn on_message_update(&self, items: Vec<ConversationItem>) {}

    fn on_conversation_update(&self, conversations: Vec<ConversationInfo>) {}

    fn on_modifier_update(&self, modifiers: Vec<Modifier>) {}

    fn on_mass_retrieval_started(&self, progress: MassRetrievalProgress) {}

    fn on_mass_retrieval_progress(&self, progress: MassRetrievalProgress) {}

    fn on_mass_retrieval_complete(&self, result: MassRetrievalResult) {}

    fn on_mass_retrieval_file(&self, file: MassRetrievalFile) {}

    fn on_mass_retrieval_failed(&self, request_id: RequestId) {}

    fn on_download_progress(&self, progress: DownloadProgress) {}

    fn on_download_complete(&self, file: DownloadedFile) {}

    fn on_download_confirmed(&self, request_id: RequestId) {}

    fn on_download_failed(&self, request_id: RequestId, failure: DownloadFailure) {}

    fn on_send_result(&self, request_id: RequestId, result: SendResult, details: Option<String>) {}

    fn on_chat_creation_result(
        &self,
        request_id: RequestId,
        result: ChatCreationResult,
        details: Option<String>,
    ) {
    }
}

// ============================================================================
// CALLBACK EXECUTION
// ============================================================================

pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Runs completion callbacks on a caller-chosen thread
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, callback: Callback);
}

/// Runs callbacks immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CallbackExecutor for InlineExecutor {
    fn execute(&self, callback: Callback) {
        callback();
    }
}

/// Spawns each callback as a task on a tokio runtime
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime we are currently running on
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor").finish_non_exhaustive()
    }
}

impl CallbackExecutor for TokioExecutor {
    fn execute(&self, callback: Callback) {
        self.handle.spawn(async move {
            callback();
        });
        debug!("Callback dispatched to tokio runtime");
    }
}

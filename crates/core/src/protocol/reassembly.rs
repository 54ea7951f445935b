//! Chunked transfer reassembly
//!
//! Mass history retrieval, attachment downloads and file uploads all follow
//! the same convention: chunk index 0 carries metadata, every chunk carries a
//! fragment, and the `is_last` flag closes the sequence. Indices must arrive
//! strictly in order; a gap or a repeat aborts the affected transfer.
//!
//! The reassemblers here only track state. Delivering results to a listener is
//! the router's job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::codes::AttachmentRequestError;
use super::schema::{ConversationInfo, ConversationItem};

/// 16-bit request identifier chosen by the client
pub type RequestId = i16;

// ============================================================================
// SHARED SEQUENCE TRACKING
// ============================================================================

/// Accumulates fragments of one chunked file
#[derive(Debug, Default)]
struct ChunkSequence {
    next_index: i32,
    data: Vec<u8>,
}

impl ChunkSequence {
    /// Append a fragment if it is the next expected one
    fn accept(&mut self, index: i32, fragment: &[u8]) -> bool {
        if index != self.next_index {
            return false;
        }
        self.data.extend_from_slice(fragment);
        self.next_index += 1;
        true
    }

    fn received_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Snapshot of in-flight transfers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassemblyStats {
    pub mass_retrieval_active: bool,
    pub pending_files: usize,
    pub active_downloads: usize,
}

// ============================================================================
// MASS RETRIEVAL
// ============================================================================

/// Everything a finished mass retrieval produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassRetrievalResult {
    pub request_id: RequestId,
    pub conversations: Vec<ConversationInfo>,
    pub items: Vec<ConversationItem>,
    /// Item count the server announced in the first packet
    pub expected_items: i32,
}

/// Snapshot reported after every item batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MassRetrievalProgress {
    pub request_id: RequestId,
    pub received_items: usize,
    pub expected_items: i32,
}

/// A file attached to a mass retrieval, fully reassembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MassRetrievalFile {
    pub request_id: RequestId,
    pub file_guid: String,
    pub file_name: String,
    pub data: Vec<u8>,
}

/// One `mass retrieval file` packet
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub request_id: RequestId,
    pub index: i32,
    /// Present on index 0 only
    pub file_name: Option<String>,
    pub is_last: bool,
    pub file_guid: String,
    pub data: Vec<u8>,
}

/// Result of feeding one packet to a reassembler
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome<P, C> {
    /// Accepted, more to come
    Progress(P),
    /// Accepted, and the transfer is complete
    Complete(C),
    /// Out of sequence; the transfer was discarded
    Aborted,
    /// Belongs to no active transfer; nothing changed
    Ignored,
}

#[derive(Debug)]
struct MassRetrievalSession {
    request_id: RequestId,
    conversations: Vec<ConversationInfo>,
    items: Vec<ConversationItem>,
    expected_items: i32,
    next_index: i32,
}

#[derive(Debug)]
struct PendingFile {
    file_name: String,
    sequence: ChunkSequence,
}

/// Reassembles a mass history retrieval. At most one is active at a time.
#[derive(Debug, Default)]
pub struct MassRetrievalReassembler {
    session: Option<MassRetrievalSession>,
    files: HashMap<(RequestId, String), PendingFile>,
}

impl MassRetrievalReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// ID of the retrieval in progress, if any
    pub fn active_request(&self) -> Option<RequestId> {
        self.session.as_ref().map(|s| s.request_id)
    }

    /// Handle packet 0: register a new session, replacing any previous one
    pub fn start(
        &mut self,
        request_id: RequestId,
        conversations: Vec<ConversationInfo>,
        expected_items: i32,
    ) -> MassRetrievalProgress {
        if let Some(previous) = self.session.take() {
            debug!("🔄 Mass retrieval {} replaced by {}", previous.request_id, request_id);
            self.files.clear();
        }

        debug!(
            "📥 Mass retrieval {} started: {} conversations, {} items expected",
            request_id,
            conversations.len(),
            expected_items
        );
        self.session = Some(MassRetrievalSession {
            request_id,
            conversations,
            items: Vec::new(),
            expected_items,
            next_index: 1,
        });

        MassRetrievalProgress {
            request_id,
            received_items: 0,
            expected_items,
        }
    }

    /// Handle packet `index > 0`: append a batch of items
    pub fn push_items(
        &mut self,
        request_id: RequestId,
        index: i32,
        items: Vec<ConversationItem>,
    ) -> ChunkOutcome<MassRetrievalProgress, ()> {
        let session = match self.session.as_mut() {
            Some(session) if session.request_id == request_id => session,
            _ => {
                debug!("Ignoring mass retrieval batch for inactive request {}", request_id);
                return ChunkOutcome::Ignored;
            }
        };

        if index != session.next_index {
            warn!(
                "⚠️ Mass retrieval {} out of sequence: expected {}, got {}",
                request_id, session.next_index, index
            );
            self.cancel();
            return ChunkOutcome::Aborted;
        }

        session.next_index += 1;
        session.items.extend(items);

        ChunkOutcome::Progress(MassRetrievalProgress {
            request_id,
            received_items: session.items.len(),
            expected_items: session.expected_items,
        })
    }

    /// Handle a file chunk belonging to the active retrieval
    pub fn push_file(&mut self, chunk: FileChunk) -> ChunkOutcome<u64, MassRetrievalFile> {
        if self.active_request() != Some(chunk.request_id) {
            debug!("Ignoring file chunk for inactive request {}", chunk.request_id);
            return ChunkOutcome::Ignored;
        }

        let key = (chunk.request_id, chunk.file_guid);
        if chunk.index == 0 {
            self.files.insert(
                key.clone(),
                PendingFile {
                    file_name: chunk.file_name.unwrap_or_default(),
                    sequence: ChunkSequence::default(),
                },
            );
        }

        let pending = match self.files.get_mut(&key) {
            Some(pending) => pending,
            None => {
                warn!("⚠️ File chunk {} for unknown file {}", chunk.index, key.1);
                return ChunkOutcome::Aborted;
            }
        };

        if !pending.sequence.accept(chunk.index, &chunk.data) {
            warn!(
                "⚠️ File {} out of sequence at chunk {}, dropping it",
                key.1, chunk.index
            );
            self.files.remove(&key);
            return ChunkOutcome::Aborted;
        }

        if !chunk.is_last {
            return ChunkOutcome::Progress(pending.sequence.received_bytes());
        }

        match self.files.remove(&key) {
            Some(done) => {
                let (request_id, file_guid) = key;
                ChunkOutcome::Complete(MassRetrievalFile {
                    request_id,
                    file_guid,
                    file_name: done.file_name,
                    data: done.sequence.data,
                })
            }
            None => ChunkOutcome::Ignored,
        }
    }

    /// Handle the finish packet: close the active session and hand back its
    /// contents. The finish packet carries no request ID.
    pub fn finish(&mut self) -> Option<MassRetrievalResult> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                debug!("Ignoring mass retrieval finish with no active session");
                return None;
            }
        };

        self.files.clear();
        Some(MassRetrievalResult {
            request_id: session.request_id,
            conversations: session.conversations,
            items: session.items,
            expected_items: session.expected_items,
        })
    }

    /// Drop the active session and all partial files
    pub fn cancel(&mut self) {
        self.session = None;
        self.files.clear();
    }

    pub fn pending_files(&self) -> usize {
        self.files.len()
    }
}

// ============================================================================
// ATTACHMENT DOWNLOAD
// ============================================================================

/// One attachment data packet
#[derive(Debug, Clone)]
pub struct DownloadChunk {
    pub request_id: RequestId,
    pub index: i32,
    /// Total size, present on index 0 only
    pub file_size: Option<i64>,
    pub is_last: bool,
    pub guid: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub request_id: RequestId,
    pub received_bytes: u64,
    /// Size announced by the server, once chunk 0 has arrived
    pub total_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub request_id: RequestId,
    pub guid: String,
    pub data: Vec<u8>,
}

/// Why a download ended without a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadFailure {
    /// The server refused the request
    Server(AttachmentRequestError),
    /// Chunks arrived out of order or repeated
    OutOfSequence,
}

#[derive(Debug)]
struct DownloadSession {
    guid: String,
    file_size: Option<i64>,
    sequence: ChunkSequence,
}

/// Tracks attachment downloads registered through an attachment request
#[derive(Debug, Default)]
pub struct DownloadReassembler {
    sessions: HashMap<RequestId, DownloadSession>,
}

impl DownloadReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a download before the request goes out
    pub fn register(&mut self, request_id: RequestId, guid: impl Into<String>) {
        let guid = guid.into();
        debug!("📎 Download {} registered for {}", request_id, guid);
        self.sessions.insert(
            request_id,
            DownloadSession {
                guid,
                file_size: None,
                sequence: ChunkSequence::default(),
            },
        );
    }

    pub fn is_active(&self, request_id: RequestId) -> bool {
        self.sessions.contains_key(&request_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Feed one data packet. Chunks whose `(request_id, guid)` does not match
    /// a registered download leave every session untouched.
    pub fn push(&mut self, chunk: DownloadChunk) -> ChunkOutcome<DownloadProgress, DownloadedFile> {
        let session = match self.sessions.get_mut(&chunk.request_id) {
            Some(session) if session.guid == chunk.guid => session,
            _ => {
                debug!(
                    "Dropping attachment chunk {} for unmatched request {} ({})",
                    chunk.index, chunk.request_id, chunk.guid
                );
                return ChunkOutcome::Ignored;
            }
        };

        if chunk.index == 0 {
            session.file_size = chunk.file_size;
        }

        if !session.sequence.accept(chunk.index, &chunk.data) {
            warn!(
                "⚠️ Download {} out of sequence: expected {}, got {}",
                chunk.request_id, session.sequence.next_index, chunk.index
            );
            self.sessions.remove(&chunk.request_id);
            return ChunkOutcome::Aborted;
        }

        if !chunk.is_last {
            return ChunkOutcome::Progress(DownloadProgress {
                request_id: chunk.request_id,
                received_bytes: session.sequence.received_bytes(),
                total_bytes: session.file_size,
            });
        }

        match self.sessions.remove(&chunk.request_id) {
            Some(done) => {
                debug!("✅ Download {} complete: {} bytes", chunk.request_id, done.sequence.data.len());
                ChunkOutcome::Complete(DownloadedFile {
                    request_id: chunk.request_id,
                    guid: done.guid,
                    data: done.sequence.data,
                })
            }
            None => ChunkOutcome::Ignored,
        }
    }

    /// Remove a session after the server reported failure; returns its GUID
    pub fn fail(&mut self, request_id: RequestId) -> Option<String> {
        self.sessions.remove(&request_id).map(|session| session.guid)
    }

    /// Drop a download silently
    pub fn cancel(&mut self, request_id: RequestId) -> bool {
        self.sessions.remove(&request_id).is_some()
    }
}

// ============================================================================
// UPLOAD
// ============================================================================

/// Where an uploaded file is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadTarget {
    /// An existing conversation
    Existing { chat_guid: String },
    /// A new conversation with these members
    New { members: Vec<String>, service: String },
}

/// One outbound file packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    pub request_id: RequestId,
    pub index: i32,
    pub is_last: bool,
    pub target: UploadTarget,
    /// Present on index 0 only
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

/// Splits a file into upload chunks. An empty file yields exactly one chunk,
/// flagged last, with no data.
#[derive(Debug)]
pub struct UploadChunker<'a> {
    request_id: RequestId,
    target: UploadTarget,
    file_name: String,
    data: &'a [u8],
    chunk_size: usize,
    index: i32,
    done: bool,
}

impl<'a> UploadChunker<'a> {
    pub fn new(
        request_id: RequestId,
        target: UploadTarget,
        file_name: impl Into<String>,
        data: &'a [u8],
        chunk_size: usize,
    ) -> Self {
        Self {
            request_id,
            target,
            file_name: file_name.into(),
            data,
            chunk_size: chunk_size.max(1),
            index: 0,
            done: false,
        }
    }
}

impl Iterator for UploadChunker<'_> {
    type Item = UploadChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let take = self.chunk_size.min(self.data.len());
        let (fragment, rest) = self.data.split_at(take);
        self.data = rest;
        let is_last = rest.is_empty();
        self.done = is_last;

        let chunk = UploadChunk {
            request_id: self.request_id,
            index: self.index,
            is_last,
            target: self.target.clone(),
            file_name: (self.index == 0).then(|| self.file_name.clone()),
            data: fragment.to_vec(),
        };
        self.index += 1;
        Some(chunk)
    }
}

// ============================================================================
// TESTS
// ============================================================================

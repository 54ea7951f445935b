// ==============================================================================
// crates/core/src/protocol/constants.rs - Protocol v1 header codes
// ==============================================================================

//! Top-level header codes, their dispatch tier, and protocol-wide constants.
//!
//! The numeric values are fixed by the existing server and must match it
//! byte for byte.

use std::fmt;

/// Identifier reported for this client during authentication
pub const PLATFORM_ID: &str = "rust";

/// Capacity of the inner buffer used for the secured handshake envelope
pub const SECURE_ENVELOPE_CAPACITY: usize = 1024;

/// Default upper bound for a single outbound packet (16 MiB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Default file chunk size advertised to the server (2 MiB)
pub const DEFAULT_ATTACHMENT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Default time the server has to answer an authentication request
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

// ==============================================================================
// HEADER CODES
// ==============================================================================

/// Every header code protocol v1 defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Header {
    // Connection management
    Close = 0,
    Ping = 1,
    Pong = 2,

    Authentication = 101,

    // History and live updates
    MessageUpdate = 200,
    TimeRetrieval = 201,
    MassRetrieval = 202,
    MassRetrievalFile = 203,
    MassRetrievalFinish = 204,
    ConversationUpdate = 205,
    ModifierUpdate = 206,
    AttachmentRequest = 207,
    AttachmentRequestConfirm = 208,
    AttachmentRequestFail = 209,

    // Lightweight retrieval (defined, not served by v1)
    LiteConversationRetrieval = 300,
    LiteThreadRetrieval = 301,

    // Sending
    SendResult = 400,
    SendTextExisting = 401,
    SendTextNew = 402,
    SendFileExisting = 403,
    SendFileNew = 404,
    CreateChat = 405,
}

/// Dispatch classification of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Accepted whether or not the packet was decrypted
    Insecure,
    /// Accepted only over a secured (or trusted) channel
    Secure,
}

impl Header {
    /// Look up a header by its wire code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Header::Close),
            1 => Some(Header::Ping),
            2 => Some(Header::Pong),
            101 => Some(Header::Authentication),
            200 => Some(Header::MessageUpdate),
            201 => Some(Header::TimeRetrieval),
            202 => Some(Header::MassRetrieval),
            203 => Some(Header::MassRetrievalFile),
            204 => Some(Header::MassRetrievalFinish),
            205 => Some(Header::ConversationUpdate),
            206 => Some(Header::ModifierUpdate),
            207 => Some(Header::AttachmentRequest),
            208 => Some(Header::AttachmentRequestConfirm),
            209 => Some(Header::AttachmentRequestFail),
            300 => Some(Header::LiteConversationRetrieval),
            301 => Some(Header::LiteThreadRetrieval),
            400 => Some(Header::SendResult),
            401 => Some(Header::SendTextExisting),
            402 => Some(Header::SendTextNew),
            403 => Some(Header::SendFileExisting),
            404 => Some(Header::SendFileNew),
            405 => Some(Header::CreateChat),
            _ => None,
        }
    }

    /// Wire code of this header
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Which dispatch tier the header belongs to
    pub fn tier(self) -> Tier {
        match self {
            Header::Close | Header::Ping | Header::Pong | Header::Authentication => Tier::Insecure,
            _ => Tier::Secure,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

// ==============================================================================
// HASHING
// ==============================================================================

/// Checksum algorithm the server uses for attachment checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_codes_round_trip() {
        for code in [0, 1, 2, 101, 200, 201, 202, 203, 204, 205, 206, 207, 208, 209, 300, 301, 400, 401, 402, 403, 404, 405] {
            let header = Header::from_code(code).expect("known code");
            assert_eq!(header.code(), code);
        }
        assert_eq!(Header::from_code(3), None);
        assert_eq!(Header::from_code(-1), None);
        assert_eq!(Header::from_code(999), None);
    }

    #[test]
    fn test_tier_classification() {
        assert_eq!(Header::Close.tier(), Tier::Insecure);
        assert_eq!(Header::Authentication.tier(), Tier::Insecure);
        assert_eq!(Header::MessageUpdate.tier(), Tier::Secure);
        assert_eq!(Header::CreateChat.tier(), Tier::Secure);
    }
}

//! Code translation tables.
//!
//! Each numeric result or state code read off the wire is mapped into a local
//! enum before anyone else sees it, so collaborators never depend on server
//! numbering. The mappings are total: values outside the known set land in
//! the table's [`WireCode::FALLBACK`] instead of failing the decode.
//!
//! Structural tags (conversation item type, modifier type) are different:
//! an unknown tag means the schema itself is not understood, so those use
//! `TryFrom` and fail.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// A total mapping between wire integers and a local enum
pub trait WireCode: Sized + Copy {
    /// Value every unrecognized wire code maps to
    const FALLBACK: Self;

    fn from_wire(code: i32) -> Self;

    fn to_wire(self) -> i32;
}

// ============================================================================
// CONNECTION
// ============================================================================

/// Outcome of the authentication handshake as sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationResult {
    Ok,
    Unauthorized,
    BadRequest,
    Unknown,
}

impl WireCode for AuthenticationResult {
    const FALLBACK: Self = AuthenticationResult::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            0 => AuthenticationResult::Ok,
            1 => AuthenticationResult::Unauthorized,
            2 => AuthenticationResult::BadRequest,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            AuthenticationResult::Ok => 0,
            AuthenticationResult::Unauthorized => 1,
            AuthenticationResult::BadRequest => 2,
            AuthenticationResult::Unknown => -1,
        }
    }
}

/// Local reason handed to [`crate::transport::Connection::disconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionResult {
    /// The server closed the connection
    Connection,
    /// The server rejected our credentials
    Unauthorized,
    /// The server could not parse our handshake
    BadRequest,
    /// The server did not answer the handshake in time
    Timeout,
    /// The server answered with a code we do not know
    Unknown,
}

impl AuthenticationResult {
    /// Reason to disconnect with, or `None` if authentication succeeded
    pub fn disconnect_reason(self) -> Option<ConnectionResult> {
        match self {
            AuthenticationResult::Ok => None,
            AuthenticationResult::Unauthorized => Some(ConnectionResult::Unauthorized),
            AuthenticationResult::BadRequest => Some(ConnectionResult::BadRequest),
            AuthenticationResult::Unknown => Some(ConnectionResult::Unknown),
        }
    }
}

// ============================================================================
// MESSAGE STATE
// ============================================================================

/// Delivery state of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    Idle,
    Sent,
    Delivered,
    Read,
}

impl WireCode for MessageState {
    // The server treats anything it cannot classify as idle
    const FALLBACK: Self = MessageState::Idle;

    fn from_wire(code: i32) -> Self {
        match code {
            0 => MessageState::Idle,
            1 => MessageState::Sent,
            2 => MessageState::Delivered,
            3 => MessageState::Read,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            MessageState::Idle => 0,
            MessageState::Sent => 1,
            MessageState::Delivered => 2,
            MessageState::Read => 3,
        }
    }
}

/// Error the upstream messaging service attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryError {
    Ok,
    Unknown,
    Network,
    Unregistered,
}

impl WireCode for DeliveryError {
    const FALLBACK: Self = DeliveryError::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            0 => DeliveryError::Ok,
            2 => DeliveryError::Network,
            3 => DeliveryError::Unregistered,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            DeliveryError::Ok => 0,
            DeliveryError::Unknown => 1,
            DeliveryError::Network => 2,
            DeliveryError::Unregistered => 3,
        }
    }
}

// ============================================================================
// ITEM SUBTYPES
// ============================================================================

/// What happened in a group action item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupActionKind {
    Unknown,
    Join,
    Leave,
}

impl WireCode for GroupActionKind {
    const FALLBACK: Self = GroupActionKind::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            1 => GroupActionKind::Join,
            2 => GroupActionKind::Leave,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            GroupActionKind::Unknown => 0,
            GroupActionKind::Join => 1,
            GroupActionKind::Leave => 2,
        }
    }
}

/// Reaction applied to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapbackKind {
    Heart,
    Like,
    Dislike,
    Laugh,
    Exclamation,
    Question,
    Unknown,
}

impl WireCode for TapbackKind {
    const FALLBACK: Self = TapbackKind::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            0 => TapbackKind::Heart,
            1 => TapbackKind::Like,
            2 => TapbackKind::Dislike,
            3 => TapbackKind::Laugh,
            4 => TapbackKind::Exclamation,
            5 => TapbackKind::Question,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            TapbackKind::Heart => 0,
            TapbackKind::Like => 1,
            TapbackKind::Dislike => 2,
            TapbackKind::Laugh => 3,
            TapbackKind::Exclamation => 4,
            TapbackKind::Question => 5,
            TapbackKind::Unknown => -1,
        }
    }
}

// ============================================================================
// REQUEST RESULTS
// ============================================================================

/// Result of a send-text or send-file request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendResult {
    Ok,
    /// The server's automation failed for an unspecified reason
    ScriptError,
    BadRequest,
    Unauthorized,
    NoConversation,
    /// File chunks stopped arriving at the server
    RequestTimeout,
    Unknown,
}

impl WireCode for SendResult {
    const FALLBACK: Self = SendResult::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            0 => SendResult::Ok,
            1 => SendResult::ScriptError,
            2 => SendResult::BadRequest,
            3 => SendResult::Unauthorized,
            4 => SendResult::NoConversation,
            5 => SendResult::RequestTimeout,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            SendResult::Ok => 0,
            SendResult::ScriptError => 1,
            SendResult::BadRequest => 2,
            SendResult::Unauthorized => 3,
            SendResult::NoConversation => 4,
            SendResult::RequestTimeout => 5,
            SendResult::Unknown => -1,
        }
    }
}

impl SendResult {
    pub fn is_ok(self) -> bool {
        self == SendResult::Ok
    }
}

/// Reason the server refused an attachment download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentRequestError {
    /// No attachment with that GUID
    NotFound,
    /// The attachment is known but its file is not on disk
    NotSaved,
    /// The server has no read access to the file
    Unreadable,
    Io,
    Unknown,
}

impl WireCode for AttachmentRequestError {
    const FALLBACK: Self = AttachmentRequestError::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            1 => AttachmentRequestError::NotFound,
            2 => AttachmentRequestError::NotSaved,
            3 => AttachmentRequestError::Unreadable,
            4 => AttachmentRequestError::Io,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            AttachmentRequestError::NotFound => 1,
            AttachmentRequestError::NotSaved => 2,
            AttachmentRequestError::Unreadable => 3,
            AttachmentRequestError::Io => 4,
            AttachmentRequestError::Unknown => -1,
        }
    }
}

/// Result of a chat creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatCreationResult {
    Ok,
    ScriptError,
    BadRequest,
    Unauthorized,
    Unknown,
}

impl WireCode for ChatCreationResult {
    const FALLBACK: Self = ChatCreationResult::Unknown;

    fn from_wire(code: i32) -> Self {
        match code {
            0 => ChatCreationResult::Ok,
            1 => ChatCreationResult::ScriptError,
            2 => ChatCreationResult::BadRequest,
            3 => ChatCreationResult::Unauthorized,
            _ => Self::FALLBACK,
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            ChatCreationResult::Ok => 0,
            ChatCreationResult::ScriptError => 1,
            ChatCreationResult::BadRequest => 2,
            ChatCreationResult::Unauthorized => 3,
            ChatCreationResult::Unknown => -1,
        }
    }
}

impl ChatCreationResult {
    pub fn is_ok(self) -> bool {
        self == ChatCreationResult::Ok
    }
}

// ============================================================================
// STRUCTURAL TAGS
// ============================================================================

/// Type tag of a conversation item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationItemType {
    Message,
    GroupAction,
    ChatRename,
}

impl TryFrom<i32> for ConversationItemType {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConversationItemType::Message),
            1 => Ok(ConversationItemType::GroupAction),
            2 => Ok(ConversationItemType::ChatRename),
            other => Err(DecodeError::UnknownItemType(other)),
        }
    }
}

impl From<ConversationItemType> for i32 {
    fn from(value: ConversationItemType) -> Self {
        match value {
            ConversationItemType::Message => 0,
            ConversationItemType::GroupAction => 1,
            ConversationItemType::ChatRename => 2,
        }
    }
}

/// Type tag of a modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierType {
    Activity,
    Sticker,
    Tapback,
}

impl ModifierType {
    pub fn name(self) -> &'static str {
        match self {
            ModifierType::Activity => "activity",
            ModifierType::Sticker => "sticker",
            ModifierType::Tapback => "tapback",
        }
    }
}

impl TryFrom<i32> for ModifierType {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ModifierType::Activity),
            1 => Ok(ModifierType::Sticker),
            2 => Ok(ModifierType::Tapback),
            other => Err(DecodeError::UnknownModifierType(other)),
        }
    }
}

impl From<ModifierType> for i32 {
    fn from(value: ModifierType) -> Self {
        match value {
            ModifierType::Activity => 0,
            ModifierType::Sticker => 1,
            ModifierType::Tapback => 2,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Every code in `known` converts back to itself; everything around it
    /// maps to the fallback.
    fn assert_total<T: WireCode + PartialEq + std::fmt::Debug>(known: &[i32]) {
        for &code in known {
            let value = T::from_wire(code);
            assert_eq!(value.to_wire(), code, "code {} did not round trip", code);
        }
        for code in [-100, -1, 6, 7, 99, i32::MIN, i32::MAX] {
            if !known.contains(&code) {
                assert_eq!(T::from_wire(code), T::FALLBACK, "code {} should fall back", code);
            }
        }
    }

    #[test]
    fn test_result_tables_are_total() {
        assert_total::<AuthenticationResult>(&[0, 1, 2]);
        assert_total::<SendResult>(&[0, 1, 2, 3, 4, 5]);
        assert_total::<AttachmentRequestError>(&[1, 2, 3, 4]);
        assert_total::<ChatCreationResult>(&[0, 1, 2, 3]);
        assert_total::<DeliveryError>(&[0, 1, 2, 3]);
        assert_total::<GroupActionKind>(&[0, 1, 2]);
        assert_total::<TapbackKind>(&[0, 1, 2, 3, 4, 5]);
        assert_total::<MessageState>(&[0, 1, 2, 3]);
    }

    #[test]
    fn test_fallback_values_are_stable_on_reencode() {
        // A fallback written back out decodes to the same fallback
        assert_eq!(SendResult::from_wire(SendResult::Unknown.to_wire()), SendResult::Unknown);
        assert_eq!(TapbackKind::from_wire(TapbackKind::Unknown.to_wire()), TapbackKind::Unknown);
        assert_eq!(DeliveryError::from_wire(DeliveryError::Unknown.to_wire()), DeliveryError::Unknown);
        assert_eq!(
            AttachmentRequestError::from_wire(AttachmentRequestError::Unknown.to_wire()),
            AttachmentRequestError::Unknown
        );
    }

    #[test]
    fn test_authentication_disconnect_reasons() {
        assert_eq!(AuthenticationResult::Ok.disconnect_reason(), None);
        assert_eq!(
            AuthenticationResult::from_wire(1).disconnect_reason(),
            Some(ConnectionResult::Unauthorized)
        );
        assert_eq!(
            AuthenticationResult::from_wire(2).disconnect_reason(),
            Some(ConnectionResult::BadRequest)
        );
        assert_eq!(
            AuthenticationResult::from_wire(42).disconnect_reason(),
            Some(ConnectionResult::Unknown)
        );
    }

    #[test]
    fn test_structural_tags_fail_on_unknown() {
        assert_eq!(ConversationItemType::try_from(2), Ok(ConversationItemType::ChatRename));
        assert_eq!(ConversationItemType::try_from(3), Err(DecodeError::UnknownItemType(3)));
        assert_eq!(ModifierType::try_from(1), Ok(ModifierType::Sticker));
        assert_eq!(ModifierType::try_from(-1), Err(DecodeError::UnknownModifierType(-1)));
    }
}

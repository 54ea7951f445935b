//! Message schema: conversations, conversation items, attachments and modifiers
//!
//! These values are built while decoding a single packet and handed straight
//! to a [`crate::transport::ProtocolListener`]; the core keeps no copies
//! except inside an in-progress mass retrieval.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::protocol::binary::{Decoder, Encoder};
use crate::protocol::codes::{
    ConversationItemType, DeliveryError, GroupActionKind, MessageState, ModifierType, TapbackKind,
    WireCode,
};

// ============================================================================
// CONVERSATIONS
// ============================================================================

/// A conversation as described by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub guid: String,
    /// `None` when the conversation exists but the server cannot access it
    pub details: Option<ConversationDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDetails {
    pub service: String,
    pub name: Option<String>,
    pub members: Vec<String>,
}

impl ConversationInfo {
    pub fn available(guid: impl Into<String>, details: ConversationDetails) -> Self {
        Self {
            guid: guid.into(),
            details: Some(details),
        }
    }

    pub fn unavailable(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            details: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.details.is_some()
    }

    pub fn read(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let guid = decoder.read_string()?;
        if !decoder.read_bool()? {
            return Ok(Self::unavailable(guid));
        }

        let service = decoder.read_string()?;
        let name = decoder.read_nullable_string()?;
        let members = decoder.read_string_array()?;

        Ok(Self::available(guid, ConversationDetails { service, name, members }))
    }

    pub fn write(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_string(&self.guid)?;
        encoder.write_bool(self.details.is_some())?;
        if let Some(details) = &self.details {
            encoder.write_string(&details.service)?;
            encoder.write_nullable_string(details.name.as_deref())?;
            encoder.write_string_array(&details.members)?;
        }
        Ok(())
    }
}

// ============================================================================
// ATTACHMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub guid: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub size: i64,
    pub checksum: Option<Vec<u8>>,
}

impl AttachmentInfo {
    pub fn read(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            guid: decoder.read_string()?,
            name: decoder.read_string()?,
            mime_type: decoder.read_nullable_string()?,
            size: decoder.read_long()?,
            checksum: decoder.read_nullable_payload()?,
        })
    }

    pub fn write(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_string(&self.guid)?;
        encoder.write_string(&self.name)?;
        encoder.write_nullable_string(self.mime_type.as_deref())?;
        encoder.write_long(self.size)?;
        encoder.write_nullable_payload(self.checksum.as_deref())
    }
}

// ============================================================================
// MODIFIERS
// ============================================================================

/// Read receipt / delivery update for an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStatusModifier {
    pub target_guid: String,
    pub state: MessageState,
    pub date_read: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerModifier {
    pub target_guid: String,
    /// Index of the message part the sticker is attached to
    pub message_index: i32,
    pub file_guid: String,
    pub sender: Option<String>,
    pub date: i64,
    /// Sticker image, packaged with the protocol's packager
    pub data: Vec<u8>,
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapbackModifier {
    pub target_guid: String,
    pub message_index: i32,
    pub sender: Option<String>,
    /// `false` when the reaction was removed
    pub is_addition: bool,
    pub kind: TapbackKind,
}

/// An update applied to a previously delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    ActivityStatus(ActivityStatusModifier),
    Sticker(StickerModifier),
    Tapback(TapbackModifier),
}

impl ActivityStatusModifier {
    fn read_body(decoder: &mut Decoder<'_>, target_guid: String) -> Result<Self, DecodeError> {
        Ok(Self {
            target_guid,
            state: MessageState::from_wire(decoder.read_int()?),
            date_read: decoder.read_long()?,
        })
    }

    fn write_tagged(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_int(ModifierType::Activity.into())?;
        encoder.write_string(&self.target_guid)?;
        encoder.write_int(self.state.to_wire())?;
        encoder.write_long(self.date_read)
    }
}

impl StickerModifier {
    fn read_body(decoder: &mut Decoder<'_>, target_guid: String) -> Result<Self, DecodeError> {
        Ok(Self {
            target_guid,
            message_index: decoder.read_int()?,
            file_guid: decoder.read_string()?,
            sender: decoder.read_nullable_string()?,
            date: decoder.read_long()?,
            data: decoder.read_payload()?,
            file_type: decoder.read_string()?,
        })
    }

    fn write_tagged(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_int(ModifierType::Sticker.into())?;
        encoder.write_string(&self.target_guid)?;
        encoder.write_int(self.message_index)?;
        encoder.write_string(&self.file_guid)?;
        encoder.write_nullable_string(self.sender.as_deref())?;
        encoder.write_long(self.date)?;
        encoder.write_payload(&self.data)?;
        encoder.write_string(&self.file_type)
    }
}

impl TapbackModifier {
    fn read_body(decoder: &mut Decoder<'_>, target_guid: String) -> Result<Self, DecodeError> {
        Ok(Self {
            target_guid,
            message_index: decoder.read_int()?,
            sender: decoder.read_nullable_string()?,
            is_addition: decoder.read_bool()?,
            kind: TapbackKind::from_wire(decoder.read_int()?),
        })
    }

    fn write_tagged(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        encoder.write_int(ModifierType::Tapback.into())?;
        encoder.write_string(&self.target_guid)?;
        encoder.write_int(self.message_index)?;
        encoder.write_nullable_string(self.sender.as_deref())?;
        encoder.write_bool(self.is_addition)?;
        encoder.write_int(self.kind.to_wire())
    }
}

impl Modifier {
    pub fn kind(&self) -> ModifierType {
        match self {
            Modifier::ActivityStatus(_) => ModifierType::Activity,
            Modifier::Sticker(_) => ModifierType::Sticker,
            Modifier::Tapback(_) => ModifierType::Tapback,
        }
    }

    /// GUID of the message this modifier applies to
    pub fn target_guid(&self) -> &str {
        match self {
            Modifier::ActivityStatus(m) => &m.target_guid,
            Modifier::Sticker(m) => &m.target_guid,
            Modifier::Tapback(m) => &m.target_guid,
        }
    }

    pub fn read(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let kind = ModifierType::try_from(decoder.read_int()?)?;
        let target_guid = decoder.read_string()?;

        Ok(match kind {
            ModifierType::Activity => {
                Modifier::ActivityStatus(ActivityStatusModifier::read_body(decoder, target_guid)?)
            }
            ModifierType::Sticker => Modifier::Sticker(StickerModifier::read_body(decoder, target_guid)?),
            ModifierType::Tapback => Modifier::Tapback(TapbackModifier::read_body(decoder, target_guid)?),
        })
    }

    pub fn write(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        match self {
            Modifier::ActivityStatus(m) => m.write_tagged(encoder),
            Modifier::Sticker(m) => m.write_tagged(encoder),
            Modifier::Tapback(m) => m.write_tagged(encoder),
        }
    }
}

// ============================================================================
// CONVERSATION ITEMS
// ============================================================================

/// Fields every conversation item starts with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHeader {
    /// Server database row ID
    pub server_id: i64,
    pub guid: String,
    pub chat_guid: String,
    /// Milliseconds since the Unix epoch
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub header: ItemHeader,
    pub text: Option<String>,
    pub subject: Option<String>,
    /// `None` for messages sent by the local user
    pub sender: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
    pub stickers: Vec<StickerModifier>,
    pub tapbacks: Vec<TapbackModifier>,
    pub send_effect: Option<String>,
    pub state: MessageState,
    pub error: DeliveryError,
    pub date_read: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupActionInfo {
    pub header: ItemHeader,
    pub agent: Option<String>,
    pub other: Option<String>,
    pub kind: GroupActionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRenameInfo {
    pub header: ItemHeader,
    pub agent: Option<String>,
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationItem {
    Message(MessageInfo),
    GroupAction(GroupActionInfo),
    ChatRename(ChatRenameInfo),
}

impl ConversationItem {
    pub fn kind(&self) -> ConversationItemType {
        match self {
            ConversationItem::Message(_) => ConversationItemType::Message,
            ConversationItem::GroupAction(_) => ConversationItemType::GroupAction,
            ConversationItem::ChatRename(_) => ConversationItemType::ChatRename,
        }
    }

    pub fn header(&self) -> &ItemHeader {
        match self {
            ConversationItem::Message(item) => &item.header,
            ConversationItem::GroupAction(item) => &item.header,
            ConversationItem::ChatRename(item) => &item.header,
        }
    }

    /// Item date as a UTC timestamp, if it is representable
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.header().date).single()
    }

    pub fn read(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        // The tag comes first but is only checked after the common prefix,
        // matching the order the server writes fields in
        let tag = decoder.read_int()?;
        let header = ItemHeader {
            server_id: decoder.read_long()?,
            guid: decoder.read_string()?,
            chat_guid: decoder.read_string()?,
            date: decoder.read_long()?,
        };

        Ok(match ConversationItemType::try_from(tag)? {
            ConversationItemType::Message => {
                let text = decoder.read_nullable_string()?;
                let subject = decoder.read_nullable_string()?;
                let sender = decoder.read_nullable_string()?;
                let attachments = read_list(decoder, AttachmentInfo::read)?;
                let stickers = read_stickers(decoder)?;
                let tapbacks = read_tapbacks(decoder)?;
                let send_effect = decoder.read_nullable_string()?;
                let state = MessageState::from_wire(decoder.read_int()?);
                let error = DeliveryError::from_wire(decoder.read_int()?);
                let date_read = decoder.read_long()?;

                ConversationItem::Message(MessageInfo {
                    header,
                    text,
                    subject,
                    sender,
                    attachments,
                    stickers,
                    tapbacks,
                    send_effect,
                    state,
                    error,
                    date_read,
                })
            }
            ConversationItemType::GroupAction => ConversationItem::GroupAction(GroupActionInfo {
                header,
                agent: decoder.read_nullable_string()?,
                other: decoder.read_nullable_string()?,
                kind: GroupActionKind::from_wire(decoder.read_int()?),
            }),
            ConversationItemType::ChatRename => ConversationItem::ChatRename(ChatRenameInfo {
                header,
                agent: decoder.read_nullable_string()?,
                new_name: decoder.read_nullable_string()?,
            }),
        })
    }

    pub fn write(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        let header = self.header();
        encoder.write_int(self.kind().into())?;
        encoder.write_long(header.server_id)?;
        encoder.write_string(&header.guid)?;
        encoder.write_string(&header.chat_guid)?;
        encoder.write_long(header.date)?;

        match self {
            ConversationItem::Message(message) => {
                encoder.write_nullable_string(message.text.as_deref())?;
                encoder.write_nullable_string(message.subject.as_deref())?;
                encoder.write_nullable_string(message.sender.as_deref())?;
                write_list(encoder, &message.attachments, AttachmentInfo::write)?;
                write_list(encoder, &message.stickers, StickerModifier::write_tagged)?;
                write_list(encoder, &message.tapbacks, TapbackModifier::write_tagged)?;
                encoder.write_nullable_string(message.send_effect.as_deref())?;
                encoder.write_int(message.state.to_wire())?;
                encoder.write_int(message.error.to_wire())?;
                encoder.write_long(message.date_read)
            }
            ConversationItem::GroupAction(action) => {
                encoder.write_nullable_string(action.agent.as_deref())?;
                encoder.write_nullable_string(action.other.as_deref())?;
                encoder.write_int(action.kind.to_wire())
            }
            ConversationItem::ChatRename(rename) => {
                encoder.write_nullable_string(rename.agent.as_deref())?;
                encoder.write_nullable_string(rename.new_name.as_deref())
            }
        }
    }
}

// ============================================================================
// MASS RETRIEVAL PARAMETERS
// ============================================================================

/// Which attachments a mass retrieval should download
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentFilter {
    /// Only attachments newer than this (ms since epoch)
    pub since: Option<i64>,
    /// Only attachments up to this many bytes
    pub max_size: Option<i64>,
    /// MIME type patterns to always download
    pub whitelist: Vec<String>,
    /// MIME type patterns to never download
    pub blacklist: Vec<String>,
    /// Whether types on neither list are downloaded
    pub download_other: bool,
}

/// Options for a full history download
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassRetrievalParams {
    /// Only messages newer than this (ms since epoch)
    pub messages_since: Option<i64>,
    /// `None` skips attachments entirely
    pub attachments: Option<AttachmentFilter>,
}

impl MassRetrievalParams {
    pub fn write(&self, encoder: &mut Encoder) -> Result<(), EncodeError> {
        write_optional_long(encoder, self.messages_since)?;
        encoder.write_bool(self.attachments.is_some())?;

        if let Some(filter) = &self.attachments {
            write_optional_long(encoder, filter.since)?;
            write_optional_long(encoder, filter.max_size)?;
            encoder.write_string_array(&filter.whitelist)?;
            encoder.write_string_array(&filter.blacklist)?;
            encoder.write_bool(filter.download_other)?;
        }
        Ok(())
    }
}

/// Flag followed by the value only when the flag is set
fn write_optional_long(encoder: &mut Encoder, value: Option<i64>) -> Result<(), EncodeError> {
    encoder.write_bool(value.is_some())?;
    if let Some(value) = value {
        encoder.write_long(value)?;
    }
    Ok(())
}

// ============================================================================
// LIST HELPERS
// ============================================================================

/// Read an array header followed by that many elements
pub fn read_list<T>(
    decoder: &mut Decoder<'_>,
    read: impl Fn(&mut Decoder<'_>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let count = decoder.read_array_header()?;
    let mut items = Vec::with_capacity(decoder.bounded_capacity(count));
    for _ in 0..count {
        items.push(read(decoder)?);
    }
    Ok(items)
}

/// Write an array header followed by every element
pub fn write_list<T>(
    encoder: &mut Encoder,
    items: &[T],
    write: impl Fn(&T, &mut Encoder) -> Result<(), EncodeError>,
) -> Result<(), EncodeError> {
    encoder.write_array_header(items.len())?;
    for item in items {
        write(item, encoder)?;
    }
    Ok(())
}

fn read_stickers(decoder: &mut Decoder<'_>) -> Result<Vec<StickerModifier>, DecodeError> {
    read_list(decoder, Modifier::read)?
        .into_iter()
        .map(|modifier| match modifier {
            Modifier::Sticker(sticker) => Ok(sticker),
            other => Err(DecodeError::UnexpectedModifier {
                list: "sticker",
                found: other.kind().name(),
            }),
        })
        .collect()
}

fn read_tapbacks(decoder: &mut Decoder<'_>) -> Result<Vec<TapbackModifier>, DecodeError> {
    read_list(decoder, Modifier::read)?
        .into_iter()
        .map(|modifier| match modifier {
            Modifier::Tapback(tapback) => Ok(tapback),
            other => Err(DecodeError::UnexpectedModifier {
                list: "tapback",
                found: other.kind().name(),
            }),
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

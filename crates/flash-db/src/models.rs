//! Database row type for `messages`, holding the flat encodings exactly as stored.
//! Distinct from `flash_types::MessageRecord` to keep the on-disk layout in one place.

use flash_types::{MessageKind, MessageRecord};
use rusqlite::Row;

use crate::codecs;
use crate::error::{Result, StoreError};

/// Column list shared by every SELECT that builds a `MessageRow`.
pub const MESSAGE_COLUMNS: &str = "id, room_id, content, sender_id, sender_name, created_at, type, \
     read, delivered, reply_to, image, audio, location, duration, reactions";

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    pub created_at: i64,
    pub kind: String,
    pub read: bool,
    pub delivered: bool,
    pub reply_to: Option<String>,
    pub image: Option<String>,
    pub audio: Option<String>,
    pub location: Option<String>,
    pub duration: Option<i64>,
    pub reactions: Option<String>,
}

impl MessageRow {
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            id: record.id.clone(),
            room_id: record.room_id.clone(),
            content: record.content.clone(),
            sender_id: record.sender_id.clone(),
            sender_name: record.sender_name.clone(),
            created_at: record.created_at.timestamp_millis(),
            kind: record.kind.as_str().to_string(),
            read: record.read,
            delivered: record.delivered,
            reply_to: record.reply_to.clone(),
            image: record.image.clone(),
            audio: record.audio.clone(),
            location: codecs::encode_location(record.location.as_ref()),
            duration: record.duration,
            reactions: Some(codecs::encode_reactions(&record.reactions)),
        }
    }

    /// Maps a row selected with [`MESSAGE_COLUMNS`].
    pub fn from_sql(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            content: row.get(2)?,
            sender_id: row.get(3)?,
            sender_name: row.get(4)?,
            created_at: row.get(5)?,
            kind: row.get(6)?,
            read: row.get(7)?,
            delivered: row.get(8)?,
            reply_to: row.get(9)?,
            image: row.get(10)?,
            audio: row.get(11)?,
            location: row.get(12)?,
            duration: row.get(13)?,
            reactions: row.get(14)?,
        })
    }

    pub fn into_record(self) -> Result<MessageRecord> {
        let Some(created_at) = codecs::decode_timestamp(Some(self.created_at)) else {
            return Err(StoreError::CorruptRow {
                reason: format!("created_at {} is out of range", self.created_at),
                id: self.id,
            });
        };

        Ok(MessageRecord {
            created_at,
            kind: MessageKind::from(self.kind),
            location: codecs::decode_location(self.location.as_deref()),
            reactions: codecs::decode_reactions(self.reactions.as_deref()),
            id: self.id,
            room_id: self.room_id,
            content: self.content,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            read: self.read,
            delivered: self.delivered,
            reply_to: self.reply_to,
            image: self.image,
            audio: self.audio,
            duration: self.duration,
        })
    }
}

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reactor identity -> reaction symbol. Ordered so the flat encoding is stable.
pub type Reactions = BTreeMap<String, String>;

/// A single cached chat message.
///
/// This is also the wire shape exchanged with the remote backend: camelCase
/// fields, `createdAt` as epoch milliseconds, kind under `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub room_id: String,
    #[serde(default)]
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub reactions: Reactions,
}

impl MessageRecord {
    /// A fresh text message composed on this device: random id, creation time
    /// now (millisecond precision, matching what the store keeps), unread and
    /// not yet delivered.
    pub fn new_local(room_id: &str, sender_id: &str, sender_name: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            content: content.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            created_at: Utc::now().trunc_subsecs(3),
            kind: MessageKind::Text,
            read: false,
            delivered: false,
            reply_to: None,
            image: None,
            audio: None,
            location: None,
            duration: None,
            reactions: Reactions::new(),
        }
    }
}

/// What a message carries. Unknown tags from newer clients are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    Location,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Location => "location",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        match tag {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "location" => Self::Location,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One row of the chat list: the newest message of a room plus its unread count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub last_message: String,
    pub last_sender_id: String,
    pub last_kind: MessageKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_roundtrip_including_unknown() {
        for tag in ["text", "image", "audio", "location", "sticker"] {
            assert_eq!(MessageKind::from(tag).as_str(), tag);
        }
        assert_eq!(MessageKind::from("sticker"), MessageKind::Other("sticker".into()));
    }

    #[test]
    fn parses_remote_payload() {
        let json = r#"{
            "id": "m1",
            "roomId": "r1",
            "content": "",
            "senderId": "u1",
            "senderName": "Ama",
            "createdAt": 1700000000123,
            "type": "location",
            "location": { "latitude": 5.6037, "longitude": -0.187 },
            "reactions": { "u2": "👍" }
        }"#;

        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, MessageKind::Location);
        assert_eq!(record.created_at.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(record.location, Some(Location::new(5.6037, -0.187)));
        assert!(!record.read);
        assert!(record.reply_to.is_none());
        assert_eq!(record.reactions.get("u2").map(String::as_str), Some("👍"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["type"], "location");
        assert_eq!(back["createdAt"], 1_700_000_000_123i64);
    }

    #[test]
    fn missing_reactions_default_to_empty() {
        let json = r#"{"id":"m","roomId":"r","senderId":"u","senderName":"n","createdAt":1}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert!(record.reactions.is_empty());
        assert_eq!(record.kind, MessageKind::Text);
    }

    #[test]
    fn local_messages_have_millisecond_precision() {
        let record = MessageRecord::new_local("r1", "u1", "Ama", "hi");
        assert_eq!(record.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(!record.delivered);
    }
}

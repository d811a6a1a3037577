use serde::{Deserialize, Serialize};

use crate::models::MessageRecord;

/// A targeted mutation of exactly one field of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum Patch {
    /// Read receipt
    Read(bool),

    /// Delivery acknowledgement
    Delivered(bool),

    /// Edited message body
    Content(String),

    /// Set (or replace) the reaction of one reactor
    React { reactor: String, symbol: String },

    /// Clear the reaction of one reactor
    Unreact { reactor: String },
}

impl Patch {
    /// Name of the field this patch touches, for logs.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Delivered(_) => "delivered",
            Self::Content(_) => "content",
            Self::React { .. } | Self::Unreact { .. } => "reactions",
        }
    }

    /// Apply to an in-memory record. Returns `true` if the record changed.
    pub fn apply(&self, record: &mut MessageRecord) -> bool {
        match self {
            Self::Read(read) => std::mem::replace(&mut record.read, *read) != *read,
            Self::Delivered(delivered) => {
                std::mem::replace(&mut record.delivered, *delivered) != *delivered
            }
            Self::Content(content) => {
                if record.content == *content {
                    return false;
                }
                record.content.clone_from(content);
                true
            }
            Self::React { reactor, symbol } => {
                record.reactions.insert(reactor.clone(), symbol.clone()).as_ref() != Some(symbol)
            }
            Self::Unreact { reactor } => record.reactions.remove(reactor).is_some(),
        }
    }
}

/// A point update pushed by the remote backend for a message it already sent us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUpdate {
    pub id: String,
    pub patch: Patch,
}

/// Published by the store after a write that altered a room's messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChange {
    pub room_id: String,
}

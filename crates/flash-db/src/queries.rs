use chrono::{DateTime, Utc};
use flash_types::{MessageKind, MessageRecord, Patch, RoomSummary};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::codecs;
use crate::error::{Result, StoreError};
use crate::models::{MESSAGE_COLUMNS, MessageRow};
use crate::Database;

/// Result of applying a [`Patch`] to one stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// No message with that id; nothing to do.
    Missing,
    /// The field already held the patched value.
    Unchanged,
    Applied { room_id: String },
}

impl Database {
    // -- Writes --

    /// Insert or fully replace each record by id, in one transaction.
    /// Records identical to the stored row are skipped. Returns the rooms whose
    /// contents changed.
    pub fn upsert_messages(&self, records: &[MessageRecord]) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut changed_rooms: Vec<String> = Vec::new();

            {
                let mut upsert = tx.prepare_cached(
                    "INSERT OR REPLACE INTO messages
                        (id, room_id, content, sender_id, sender_name, created_at, type,
                         read, delivered, reply_to, image, audio, location, duration, reactions)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )?;

                for record in records {
                    let row = MessageRow::from_record(record);
                    let existing = select_row(&tx, &row.id)?;
                    if existing.as_ref() == Some(&row) {
                        continue;
                    }

                    upsert.execute(params![
                        row.id,
                        row.room_id,
                        row.content,
                        row.sender_id,
                        row.sender_name,
                        row.created_at,
                        row.kind,
                        row.read,
                        row.delivered,
                        row.reply_to,
                        row.image,
                        row.audio,
                        row.location,
                        row.duration,
                        row.reactions,
                    ])?;

                    // A replacement may move a message between rooms
                    if let Some(previous) = existing {
                        push_unique(&mut changed_rooms, previous.room_id);
                    }
                    push_unique(&mut changed_rooms, row.room_id);
                }
            }

            tx.commit()?;
            Ok(changed_rooms)
        })
    }

    /// Apply a single-field mutation atomically. Unknown ids are a no-op.
    pub fn apply_patch(&self, id: &str, patch: &Patch) -> Result<PatchOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let Some(row) = select_row(&tx, id)? else {
                debug!("Patch {} for unknown message {}", patch.field(), id);
                return Ok(PatchOutcome::Missing);
            };

            let mut record = row.into_record()?;
            if !patch.apply(&mut record) {
                return Ok(PatchOutcome::Unchanged);
            }

            match patch {
                Patch::Read(read) => {
                    tx.execute("UPDATE messages SET read = ?1 WHERE id = ?2", params![read, id])?;
                }
                Patch::Delivered(delivered) => {
                    tx.execute(
                        "UPDATE messages SET delivered = ?1 WHERE id = ?2",
                        params![delivered, id],
                    )?;
                }
                Patch::Content(content) => {
                    tx.execute(
                        "UPDATE messages SET content = ?1 WHERE id = ?2",
                        params![content, id],
                    )?;
                }
                Patch::React { .. } | Patch::Unreact { .. } => {
                    tx.execute(
                        "UPDATE messages SET reactions = ?1 WHERE id = ?2",
                        params![codecs::encode_reactions(&record.reactions), id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(PatchOutcome::Applied {
                room_id: record.room_id,
            })
        })
    }

    /// Returns the room the message belonged to, or `None` if it was already gone.
    pub fn delete_message(&self, id: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let room_id = conn
                .query_row("DELETE FROM messages WHERE id = ?1 RETURNING room_id", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(room_id)
        })
    }

    /// Record that remote messages up to `watermark` have been pulled into
    /// `room_id`. The stored value never moves backwards.
    pub fn advance_sync_watermark(&self, room_id: &str, watermark: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_state (room_id, watermark) VALUES (?1, ?2)
                 ON CONFLICT(room_id) DO UPDATE SET watermark = MAX(watermark, excluded.watermark)",
                params![room_id, codecs::encode_timestamp(Some(watermark))],
            )?;
            Ok(())
        })
    }

    // -- Reads --

    /// Newest remote `created_at` synced into a room, if it was ever synced.
    pub fn sync_watermark(&self, room_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let millis: Option<i64> = conn
                .query_row("SELECT watermark FROM sync_state WHERE room_id = ?1", [room_id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(codecs::decode_timestamp(millis))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRecord>> {
        self.with_conn(|conn| select_row(conn, id)?.map(MessageRow::into_record).transpose())
    }

    /// Full history of a room, newest first.
    pub fn messages_for_room(&self, room_id: &str) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM messages
                 WHERE room_id = ?1
                 ORDER BY created_at DESC, id DESC",
                MESSAGE_COLUMNS
            ))?;

            let rows = stmt
                .query_map([room_id], MessageRow::from_sql)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(MessageRow::into_record).collect()
        })
    }

    /// Messages of a room created strictly after `since`, newest first.
    pub fn messages_since(&self, room_id: &str, since: DateTime<Utc>) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM messages
                 WHERE room_id = ?1 AND created_at > ?2
                 ORDER BY created_at DESC, id DESC",
                MESSAGE_COLUMNS
            ))?;

            let rows = stmt
                .query_map(params![room_id, since.timestamp_millis()], MessageRow::from_sql)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(MessageRow::into_record).collect()
        })
    }

    /// Creation time of the newest message stored for a room.
    pub fn latest_created_at(&self, room_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let millis: Option<i64> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            Ok(codecs::decode_timestamp(millis))
        })
    }

    /// One summary per room, most recently active room first. Unread counts
    /// exclude messages sent by `viewer_id`.
    pub fn room_summaries(&self, viewer_id: &str) -> Result<Vec<RoomSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT m.room_id, m.content, m.sender_id, m.type, m.created_at,
                        (SELECT COUNT(*) FROM messages u
                          WHERE u.room_id = m.room_id AND u.read = 0 AND u.sender_id != ?1)
                 FROM messages m
                 WHERE m.id = (SELECT l.id FROM messages l
                                WHERE l.room_id = m.room_id
                                ORDER BY l.created_at DESC, l.id DESC
                                LIMIT 1)
                 ORDER BY m.created_at DESC, m.room_id",
            )?;

            let rows = stmt
                .query_map([viewer_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, u32>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(room_id, last_message, last_sender_id, kind, created_at, unread_count)| -> Result<RoomSummary> {
                    let last_message_at = codecs::decode_timestamp(Some(created_at)).ok_or_else(|| {
                        StoreError::CorruptRow {
                            id: room_id.clone(),
                            reason: format!("created_at {} is out of range", created_at),
                        }
                    })?;
                    Ok(RoomSummary {
                        room_id,
                        last_message,
                        last_sender_id,
                        last_kind: MessageKind::from(kind),
                        last_message_at,
                        unread_count,
                    })
                })
                .collect()
        })
    }
}

fn select_row(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS))?;
    let row = stmt.query_row([id], MessageRow::from_sql).optional()?;
    Ok(row)
}

fn push_unique(rooms: &mut Vec<String>, room_id: String) {
    if !rooms.contains(&room_id) {
        rooms.push(room_id);
    }
}

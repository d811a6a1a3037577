use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flash_types::{MessageRecord, Patch, RoomChange, RoomSummary};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::live::{self, RoomSubscription};
use crate::queries::PatchOutcome;
use crate::Database;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Async handle to the message cache. Cheap to clone; every clone shares the
/// same database and change feed.
///
/// Database work runs on the blocking pool. Writes that alter data publish a
/// [`RoomChange`] so live subscriptions can refresh.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) db: Database,
    pub(crate) changes: broadcast::Sender<RoomChange>,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner { db, changes }),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    // -- Writes --

    /// Insert or replace every record by id. Either all become visible or, if
    /// the call fails, none do.
    pub async fn upsert_many(&self, records: Vec<MessageRecord>) -> Result<()> {
        let changed = self.run(move |db| db.upsert_messages(&records)).await?;
        for room_id in changed {
            self.publish(room_id);
        }
        Ok(())
    }

    pub async fn upsert_one(&self, record: MessageRecord) -> Result<()> {
        self.upsert_many(vec![record]).await
    }

    /// Returns `false` when no message has that id.
    pub async fn apply_patch(&self, id: &str, patch: Patch) -> Result<bool> {
        let id = id.to_string();
        let outcome = self.run(move |db| db.apply_patch(&id, &patch)).await?;

        match outcome {
            PatchOutcome::Missing => Ok(false),
            PatchOutcome::Unchanged => Ok(true),
            PatchOutcome::Applied { room_id } => {
                self.publish(room_id);
                Ok(true)
            }
        }
    }

    pub async fn update_read_status(&self, id: &str, read: bool) -> Result<bool> {
        self.apply_patch(id, Patch::Read(read)).await
    }

    pub async fn update_delivered_status(&self, id: &str, delivered: bool) -> Result<bool> {
        self.apply_patch(id, Patch::Delivered(delivered)).await
    }

    pub async fn edit_content(&self, id: &str, content: &str) -> Result<bool> {
        self.apply_patch(id, Patch::Content(content.to_string())).await
    }

    /// Idempotent. Returns whether a message was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let removed = self.run(move |db| db.delete_message(&id)).await?;

        Ok(match removed {
            Some(room_id) => {
                self.publish(room_id);
                true
            }
            None => false,
        })
    }

    /// Persist the sync watermark for a room. Publishes nothing: message
    /// contents are unchanged.
    pub async fn advance_sync_watermark(&self, room_id: &str, watermark: DateTime<Utc>) -> Result<()> {
        let room_id = room_id.to_string();
        self.run(move |db| db.advance_sync_watermark(&room_id, watermark)).await
    }

    // -- Snapshots --

    pub async fn get(&self, id: &str) -> Result<Option<MessageRecord>> {
        let id = id.to_string();
        self.run(move |db| db.get_message(&id)).await
    }

    pub async fn query_room(&self, room_id: &str) -> Result<Vec<MessageRecord>> {
        let room_id = room_id.to_string();
        self.run(move |db| db.messages_for_room(&room_id)).await
    }

    pub async fn query_room_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>> {
        let room_id = room_id.to_string();
        self.run(move |db| db.messages_since(&room_id, since)).await
    }

    pub async fn latest_created_at(&self, room_id: &str) -> Result<Option<DateTime<Utc>>> {
        let room_id = room_id.to_string();
        self.run(move |db| db.latest_created_at(&room_id)).await
    }

    pub async fn sync_watermark(&self, room_id: &str) -> Result<Option<DateTime<Utc>>> {
        let room_id = room_id.to_string();
        self.run(move |db| db.sync_watermark(&room_id)).await
    }

    pub async fn room_summaries(&self, viewer_id: &str) -> Result<Vec<RoomSummary>> {
        let viewer_id = viewer_id.to_string();
        self.run(move |db| db.room_summaries(&viewer_id)).await
    }

    // -- Live queries --

    /// Live, newest-first view of a room. Must be called inside a tokio runtime.
    pub fn observe_room(&self, room_id: &str) -> RoomSubscription {
        live::subscribe(self.inner.clone(), room_id.to_string(), None)
    }

    /// Live view restricted to messages created after `since`.
    pub fn observe_room_since(&self, room_id: &str, since: DateTime<Utc>) -> RoomSubscription {
        live::subscribe(self.inner.clone(), room_id.to_string(), Some(since))
    }

    /// Raw change feed, one event per room altered by a write.
    pub fn changes(&self) -> broadcast::Receiver<RoomChange> {
        self.inner.changes.subscribe()
    }

    /// Live subscriptions plus raw `changes()` receivers still attached.
    pub fn change_receiver_count(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.run(f).await
    }

    fn publish(&self, room_id: String) {
        debug!("Room {} changed", room_id);
        // No receivers is fine: nobody is observing
        let _ = self.inner.changes.send(RoomChange { room_id });
    }
}

impl StoreInner {
    /// Run blocking DB work off the async runtime.
    pub(crate) async fn run<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.clone();
        tokio::task::spawn_blocking(move || f(&inner.db)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_types::{MessageKind, Reactions};

    fn record(id: &str, room_id: &str, created_at: i64, content: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            room_id: room_id.to_string(),
            content: content.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Ama".to_string(),
            created_at: DateTime::from_timestamp_millis(created_at).unwrap(),
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

    #[tokio::test]
    async fn upsert_then_query_contains_exactly_one_copy() {
        let store = MessageStore::open_in_memory().unwrap();
        let r = record("m1", "r1", 100, "hello");

        store.upsert_one(r.clone()).await.unwrap();
        store.upsert_one(r.clone()).await.unwrap();

        let history = store.query_room("r1").await.unwrap();
        let matching: Vec<_> = history.iter().filter(|m| m.id == r.id).collect();
        assert_eq!(matching, vec![&r]);
    }

    #[tokio::test]
    async fn latest_insert_wins() {
        let store = MessageStore::open_in_memory().unwrap();
        store.upsert_one(record("m1", "r1", 100, "first")).await.unwrap();
        store.upsert_one(record("m1", "r1", 100, "second")).await.unwrap();

        let history = store.query_room("r1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "second");
    }

    #[tokio::test]
    async fn point_updates_report_missing_ids() {
        let store = MessageStore::open_in_memory().unwrap();
        store.upsert_one(record("m1", "r1", 100, "hello")).await.unwrap();

        assert!(store.update_read_status("m1", true).await.unwrap());
        assert!(store.update_delivered_status("m1", true).await.unwrap());
        assert!(store.edit_content("m1", "hello!").await.unwrap());
        assert!(!store.update_read_status("ghost", true).await.unwrap());
        assert!(!store.edit_content("ghost", "x").await.unwrap());

        let stored = store.get("m1").await.unwrap().unwrap();
        assert!(stored.read && stored.delivered);
        assert_eq!(stored.content, "hello!");

        assert!(store.delete("m1").await.unwrap());
        assert!(!store.delete("m1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_do_not_clobber_each_other() {
        let store = MessageStore::open_in_memory().unwrap();

        let mut writers = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                let id = format!("m{}", i);
                store.upsert_one(record(&id, "r1", i, "draft")).await.unwrap();
                store.edit_content(&id, &format!("final {}", i)).await.unwrap();
                if i % 2 == 0 {
                    store.update_read_status(&id, true).await.unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        let history = store.query_room("r1").await.unwrap();
        assert_eq!(history.len(), 32);
        for message in &history {
            let i: i64 = message.id[1..].parse().unwrap();
            assert_eq!(message.content, format!("final {}", i));
            assert_eq!(message.read, i % 2 == 0);
            assert_eq!(message.created_at.timestamp_millis(), i);
        }
    }

    #[tokio::test]
    async fn writes_publish_room_changes() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut changes = store.changes();

        store.upsert_one(record("m1", "r1", 100, "hello")).await.unwrap();
        assert_eq!(changes.recv().await.unwrap().room_id, "r1");

        // Identical replay and no-op patches stay quiet
        store.upsert_one(record("m1", "r1", 100, "hello")).await.unwrap();
        store.update_read_status("ghost", true).await.unwrap();
        store.update_read_status("m1", false).await.unwrap();
        assert!(changes.try_recv().is_err());

        store.delete("m1").await.unwrap();
        assert_eq!(changes.recv().await.unwrap().room_id, "r1");
    }
}

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use flash_types::{MessageRecord, RoomChange};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;
use crate::store::StoreInner;

const SNAPSHOT_BUFFER: usize = 4;

/// A continuously updating, newest-first view of one room.
///
/// The first snapshot is delivered right away; after that a fresh snapshot
/// follows every write that touched the room. Bursts of writes are coalesced,
/// so a slow consumer sees the latest state rather than every intermediate
/// one. Dropping the subscription stops its background task.
pub struct RoomSubscription {
    room_id: String,
    snapshots: mpsc::Receiver<Result<Vec<MessageRecord>>>,
    task: JoinHandle<()>,
}

impl RoomSubscription {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Waits for the next snapshot. `None` once the store has been dropped.
    pub async fn next(&mut self) -> Option<Result<Vec<MessageRecord>>> {
        self.snapshots.recv().await
    }

    /// Tear down the subscription. Same as dropping it.
    pub fn cancel(self) {}
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn subscribe(
    store: Arc<StoreInner>,
    room_id: String,
    since: Option<DateTime<Utc>>,
) -> RoomSubscription {
    // Subscribe before the first query so no write can slip in between
    let changes = store.changes.subscribe();
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);

    let task = tokio::spawn(run_subscription(
        Arc::downgrade(&store),
        room_id.clone(),
        since,
        changes,
        tx,
    ));

    RoomSubscription {
        room_id,
        snapshots: rx,
        task,
    }
}

async fn run_subscription(
    store: Weak<StoreInner>,
    room_id: String,
    since: Option<DateTime<Utc>>,
    mut changes: broadcast::Receiver<RoomChange>,
    tx: mpsc::Sender<Result<Vec<MessageRecord>>>,
) {
    loop {
        let Some(inner) = store.upgrade() else {
            break;
        };
        let snapshot = query(&inner, &room_id, since).await;
        drop(inner);

        if tx.send(snapshot).await.is_err() {
            break;
        }
        if !wait_for_change(&mut changes, &room_id, &tx).await {
            break;
        }
    }

    debug!("Live query for room {} closed", room_id);
}

async fn query(
    store: &Arc<StoreInner>,
    room_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MessageRecord>> {
    let room_id = room_id.to_string();
    store
        .run(move |db| match since {
            Some(since) => db.messages_since(&room_id, since),
            None => db.messages_for_room(&room_id),
        })
        .await
}

/// Returns `false` when the subscription should end.
async fn wait_for_change(
    changes: &mut broadcast::Receiver<RoomChange>,
    room_id: &str,
    tx: &mpsc::Sender<Result<Vec<MessageRecord>>>,
) -> bool {
    loop {
        let event = tokio::select! {
            _ = tx.closed() => return false,
            event = changes.recv() => event,
        };

        match event {
            Ok(change) if change.room_id == room_id => break,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                // Can't tell which rooms were in the skipped events
                debug!("Live query for room {} lagged by {} changes", room_id, skipped);
                break;
            }
            Err(RecvError::Closed) => return false,
        }
    }

    // Coalesce whatever else is already queued into the one refresh
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flash_types::{MessageKind, Reactions};
    use tokio::time::timeout;

    use crate::MessageStore;

    use super::*;

    fn record(id: &str, room_id: &str, created_at: i64) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            room_id: room_id.to_string(),
            content: String::new(),
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

    fn ids(snapshot: &[MessageRecord]) -> Vec<&str> {
        snapshot.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn delivers_initial_and_updated_snapshots() {
        let store = MessageStore::open_in_memory().unwrap();
        store.upsert_one(record("A", "r1", 100)).await.unwrap();

        let mut sub = store.observe_room("r1");
        assert_eq!(sub.room_id(), "r1");
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(ids(&first), vec!["A"]);

        store.upsert_one(record("B", "r1", 200)).await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(ids(&second), vec!["B", "A"]);

        store.update_read_status("A", true).await.unwrap();
        let third = sub.next().await.unwrap().unwrap();
        assert!(third[1].read);
    }

    #[tokio::test]
    async fn since_view_only_shows_newer_messages() {
        let store = MessageStore::open_in_memory().unwrap();
        store
            .upsert_many(vec![record("A", "r1", 100), record("B", "r1", 200)])
            .await
            .unwrap();

        let since = DateTime::from_timestamp_millis(150).unwrap();
        let mut sub = store.observe_room_since("r1", since);
        assert_eq!(ids(&sub.next().await.unwrap().unwrap()), vec!["B"]);

        store.upsert_one(record("C", "r1", 120)).await.unwrap();
        assert_eq!(ids(&sub.next().await.unwrap().unwrap()), vec!["B"]);

        store.upsert_one(record("D", "r1", 300)).await.unwrap();
        assert_eq!(ids(&sub.next().await.unwrap().unwrap()), vec!["D", "B"]);
    }

    #[tokio::test]
    async fn other_rooms_do_not_wake_the_view() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut sub = store.observe_room("r1");
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        store.upsert_one(record("X", "r2", 100)).await.unwrap();
        assert!(timeout(Duration::from_millis(100), sub.next()).await.is_err());
    }

    #[tokio::test]
    async fn dropping_the_subscription_releases_it() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut sub = store.observe_room("r1");
        sub.next().await.unwrap().unwrap();
        assert_eq!(store.change_receiver_count(), 1);

        sub.cancel();
        for _ in 0..100 {
            if store.change_receiver_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.change_receiver_count(), 0);

        // Writes after teardown are fine
        store.upsert_one(record("A", "r1", 100)).await.unwrap();
    }

    #[tokio::test]
    async fn ends_when_the_store_is_dropped() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut sub = store.observe_room("r1");
        sub.next().await.unwrap().unwrap();

        drop(store);
        assert!(sub.next().await.is_none());
    }
}

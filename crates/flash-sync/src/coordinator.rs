use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flash_db::MessageStore;
use flash_types::{MessageRecord, Patch, RemoteUpdate};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::remote::RemoteSource;

/// Result of one sync pass over a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The fetch failed; nothing changed and the next cycle retries.
    NoProgress,
    /// `fetched` messages were stored; `watermark` is the newest synced `created_at`.
    Synced {
        fetched: usize,
        watermark: Option<DateTime<Utc>>,
    },
}

/// Bridges the remote backend and the local store.
///
/// Remote-originated writes (`sync_room`, `apply_remote_updates`) run one at a
/// time under the watermark lock. Local user actions go straight to the store.
pub struct SyncCoordinator<R> {
    store: MessageStore,
    remote: R,
    /// room_id -> newest remote created_at pulled into the store
    watermarks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl<R: RemoteSource> SyncCoordinator<R> {
    pub fn new(store: MessageStore, remote: R) -> Self {
        Self {
            store,
            remote,
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub async fn watermark(&self, room_id: &str) -> Option<DateTime<Utc>> {
        self.watermarks.lock().await.get(room_id).copied()
    }

    // -- Remote-originated writes --

    /// Pull everything newer than the room's watermark into the store.
    ///
    /// Safe to repeat: overlapping batches upsert the same ids, and the
    /// watermark never moves backwards. Storage failures are returned;
    /// fetch failures are not.
    pub async fn sync_room(&self, room_id: &str) -> Result<SyncOutcome, SyncError> {
        let mut watermarks = self.watermarks.lock().await;

        // After a restart, resume from the persisted watermark. Locally sent or
        // pushed messages never count: a room that was never synced is fetched whole.
        let watermark = match watermarks.get(room_id) {
            Some(watermark) => Some(*watermark),
            None => self.store.sync_watermark(room_id).await?,
        };

        let batch = match self.remote.fetch(room_id, watermark).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Fetch for room {} failed, retrying next cycle: {}", room_id, e);
                return Ok(SyncOutcome::NoProgress);
            }
        };

        let (batch, foreign): (Vec<MessageRecord>, Vec<MessageRecord>) =
            batch.into_iter().partition(|m| m.room_id == room_id);
        if !foreign.is_empty() {
            warn!("Dropped {} messages addressed to other rooms while syncing {}", foreign.len(), room_id);
        }

        let fetched = batch.len();
        let newest = batch.iter().map(|m| m.created_at).max();
        if fetched > 0 {
            self.store.upsert_many(batch).await?;
        }

        if let Some(newest) = newest {
            self.store.advance_sync_watermark(room_id, newest).await?;
        }
        let watermark = watermark.max(newest);
        if let Some(watermark) = watermark {
            watermarks.insert(room_id.to_string(), watermark);
        }

        if fetched > 0 {
            info!("Synced {} messages into room {}", fetched, room_id);
        } else {
            debug!("Room {} is up to date", room_id);
        }
        Ok(SyncOutcome::Synced { fetched, watermark })
    }

    /// Sync each room in turn. A storage failure in one room is logged and
    /// does not stop the others; the first such error is returned at the end.
    pub async fn sync_all(&self, room_ids: &[String]) -> Result<(), SyncError> {
        let mut first_error = None;
        for room_id in room_ids {
            if let Err(e) = self.sync_room(room_id).await {
                error!("Sync of room {} failed: {}", room_id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Apply read receipts, delivery acks and edits pushed by the backend.
    /// Always point mutations, so a stale full record can't undo them.
    /// Returns how many updates matched a cached message.
    pub async fn apply_remote_updates(&self, updates: Vec<RemoteUpdate>) -> Result<usize, SyncError> {
        let _serialized = self.watermarks.lock().await;

        let mut matched = 0;
        for RemoteUpdate { id, patch } in updates {
            if self.store.apply_patch(&id, patch).await? {
                matched += 1;
            }
        }
        Ok(matched)
    }

    // -- Local user actions --

    /// Store a locally composed message, post it, and mark it delivered once
    /// the backend acks. If the post fails the message stays cached as
    /// undelivered and the remote error is returned.
    pub async fn send(&self, mut record: MessageRecord) -> Result<MessageRecord, SyncError> {
        record.delivered = false;
        self.store.upsert_one(record.clone()).await?;

        if let Err(e) = self.remote.post(&record).await {
            warn!("Posting message {} failed: {}", record.id, e);
            return Err(e.into());
        }

        self.store.update_delivered_status(&record.id, true).await?;
        record.delivered = true;
        Ok(record)
    }

    /// Cache a message that arrived outside the sync cycle (e.g. a push).
    pub async fn receive(&self, record: MessageRecord) -> Result<(), SyncError> {
        Ok(self.store.upsert_one(record).await?)
    }

    pub async fn mark_read(&self, id: &str) -> Result<bool, SyncError> {
        Ok(self.store.update_read_status(id, true).await?)
    }

    pub async fn edit(&self, id: &str, content: &str) -> Result<bool, SyncError> {
        Ok(self.store.edit_content(id, content).await?)
    }

    pub async fn react(&self, id: &str, reactor: &str, symbol: &str) -> Result<bool, SyncError> {
        let patch = Patch::React {
            reactor: reactor.to_string(),
            symbol: symbol.to_string(),
        };
        Ok(self.store.apply_patch(id, patch).await?)
    }

    pub async fn unreact(&self, id: &str, reactor: &str) -> Result<bool, SyncError> {
        let patch = Patch::Unreact {
            reactor: reactor.to_string(),
        };
        Ok(self.store.apply_patch(id, patch).await?)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, SyncError> {
        Ok(self.store.delete(id).await?)
    }
}

/// Background task that syncs `room_ids` every `interval`, starting immediately.
pub async fn run_sync_loop<R: RemoteSource>(
    coordinator: Arc<SyncCoordinator<R>>,
    room_ids: Vec<String>,
    interval: Duration,
) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let Err(e) = coordinator.sync_all(&room_ids).await {
            warn!("Sync cycle finished with errors: {}", e);
        }
    }
}

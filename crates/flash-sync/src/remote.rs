use std::future::Future;

use chrono::{DateTime, Utc};
use flash_types::MessageRecord;

use crate::error::RemoteError;

/// The chat backend the cache synchronizes against.
///
/// Implementations own their retry/backoff and timeouts. A failed `fetch` is
/// treated by the coordinator as "nothing new this cycle".
pub trait RemoteSource: Send + Sync + 'static {
    /// Messages of `room_id` created strictly after `since` (all of them when
    /// `since` is `None`).
    fn fetch(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, RemoteError>> + Send;

    /// Publish a locally composed message. `Ok` is the backend's ack.
    fn post(&self, message: &MessageRecord) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use flash_types::MessageRecord;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::RemoteError;
use crate::remote::RemoteSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST chat backend:
/// `GET {base}/rooms/{room}/messages?since=<millis>` and
/// `POST {base}/rooms/{room}/messages` with a JSON `MessageRecord`.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url).map_err(|_| RemoteError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    fn messages_url(&self, room_id: &str) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["rooms", room_id, "messages"]);
        Ok(url)
    }
}

impl RemoteSource for HttpRemote {
    async fn fetch(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageRecord>, RemoteError> {
        let mut request = self.client.get(self.messages_url(room_id)?);
        if let Some(since) = since {
            request = request.query(&[("since", since.timestamp_millis())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }

        let messages: Vec<MessageRecord> = response.json().await?;
        debug!("Fetched {} messages for room {}", messages.len(), room_id);
        Ok(messages)
    }

    async fn post(&self, message: &MessageRecord) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.messages_url(&message.room_id)?)
            .json(message)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }
        Ok(())
    }
}

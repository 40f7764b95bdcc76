use crate::domain::{DomainResult, ParsedPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted raw payload: 12 bytes, hex encoded
pub const MAX_ENCODED_PAYLOAD_LEN: usize = 24;

/// A telemetry record received from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Raw payload as hex text
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub data_parsed: Option<ParsedPayload>,
    #[serde(default)]
    pub geoloc_ids: Vec<String>,
}

impl Message {
    /// Raw payload if present and non-empty
    pub fn raw_payload(&self) -> Option<&str> {
        self.data.as_deref().filter(|data| !data.is_empty())
    }
}

/// Most recent message of `device_id` created strictly before `before`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindPreviousMessageRepoInput {
    pub device_id: String,
    pub before: DateTime<Utc>,
}

/// All messages of a device, ascending by `created_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDeviceMessagesRepoInput {
    pub device_id: String,
}

/// Create the message if absent, replace it otherwise
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertMessageRepoInput {
    pub message: Message,
}

/// Repository trait for telemetry message storage
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_previous_message(
        &self,
        input: FindPreviousMessageRepoInput,
    ) -> DomainResult<Option<Message>>;

    async fn list_device_messages(
        &self,
        input: ListDeviceMessagesRepoInput,
    ) -> DomainResult<Vec<Message>>;

    async fn upsert_message(&self, input: UpsertMessageRepoInput) -> DomainResult<Message>;
}

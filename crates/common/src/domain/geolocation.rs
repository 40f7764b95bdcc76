use crate::domain::{DomainResult, Message};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Location derived from a parsed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub id: String,
    pub message_id: String,
    pub device_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub precision: Option<f64>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Insert or replace by `id`; a replaced geolocation keeps its `created_at`
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertGeolocationRepoInput {
    pub id: String,
    pub message_id: String,
    pub device_id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub precision: Option<f64>,
    pub source: String,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GeolocationRepository: Send + Sync {
    async fn upsert_geolocation(&self, input: UpsertGeolocationRepoInput)
        -> DomainResult<Geolocation>;
}

/// Downstream collaborator reacting to freshly parsed messages
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GeolocationExtractor: Send + Sync {
    /// Derive and store locations from `message.data_parsed`
    async fn create_from_parsed_message(&self, message: &Message) -> DomainResult<Vec<Geolocation>>;
}

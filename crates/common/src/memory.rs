//! In-memory document store backing every repository trait.
//!
//! Used by the all-in-one binary when no external store is wired in, and by
//! integration tests. Optionally seeded from a JSON snapshot file.

use crate::domain::{
    CreateParserRepoInput, DeleteParserRepoInput, Device, DeviceRepository, DeviceWithParser,
    DomainError, DomainResult, FindPreviousMessageRepoInput, Geolocation, GeolocationRepository,
    GetDeviceWithParserRepoInput, ListDeviceMessagesRepoInput, ListParserDevicesRepoInput,
    ListParsersRepoInput, Message, MessageRepository, ParserDefinition, ParserRepository,
    UpdateParserRepoInput, UpsertGeolocationRepoInput, UpsertMessageRepoInput,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Serialized store contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub parsers: Vec<ParserDefinition>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

pub struct InMemoryDocumentStore {
    parsers: Arc<RwLock<HashMap<String, ParserDefinition>>>,
    devices: Arc<RwLock<HashMap<String, Device>>>,
    messages: Arc<RwLock<HashMap<String, Message>>>,
    geolocations: Arc<RwLock<HashMap<String, Geolocation>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            parsers: Arc::new(RwLock::new(HashMap::new())),
            devices: Arc::new(RwLock::new(HashMap::new())),
            messages: Arc::new(RwLock::new(HashMap::new())),
            geolocations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            parsers: Arc::new(RwLock::new(index_by(snapshot.parsers, |p| p.id.clone()))),
            devices: Arc::new(RwLock::new(index_by(snapshot.devices, |d| d.id.clone()))),
            messages: Arc::new(RwLock::new(index_by(snapshot.messages, |m| m.id.clone()))),
            geolocations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn load_snapshot_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read store snapshot {}", path.display()))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to decode store snapshot {}", path.display()))?;

        info!(
            path = %path.display(),
            parsers = snapshot.parsers.len(),
            devices = snapshot.devices.len(),
            messages = snapshot.messages.len(),
            "Loaded store snapshot"
        );
        Ok(Self::with_snapshot(snapshot))
    }

    /// Insert a parser as-is, keeping its timestamps
    pub async fn insert_parser(&self, parser: ParserDefinition) {
        self.parsers.write().await.insert(parser.id.clone(), parser);
    }

    pub async fn insert_device(&self, device: Device) {
        self.devices.write().await.insert(device.id.clone(), device);
    }

    pub async fn message(&self, id: &str) -> Option<Message> {
        self.messages.read().await.get(id).cloned()
    }

    pub async fn geolocations_for_message(&self, message_id: &str) -> Vec<Geolocation> {
        self.geolocations
            .read()
            .await
            .values()
            .filter(|g| g.message_id == message_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn index_by<T>(items: Vec<T>, id: impl Fn(&T) -> String) -> HashMap<String, T> {
    items.into_iter().map(|item| (id(&item), item)).collect()
}

/// Next `updated_at` for a revision: now, but never at or before `previous`
fn next_revision(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[async_trait]
impl ParserRepository for InMemoryDocumentStore {
    async fn create_parser(&self, input: CreateParserRepoInput) -> DomainResult<ParserDefinition> {
        let now = Utc::now();
        let parser = ParserDefinition {
            id: input.id,
            user_id: input.user_id,
            name: input.name,
            description: input.description,
            function: input.function,
            hidden: input.hidden,
            created_at: now,
            updated_at: now,
        };

        let mut parsers = self.parsers.write().await;
        if parsers.contains_key(&parser.id) {
            return Err(DomainError::ValidationError(format!(
                "Parser {} already exists",
                parser.id
            )));
        }
        parsers.insert(parser.id.clone(), parser.clone());
        Ok(parser)
    }

    async fn update_parser(&self, input: UpdateParserRepoInput) -> DomainResult<ParserDefinition> {
        let mut parsers = self.parsers.write().await;
        let parser = parsers
            .get_mut(&input.id)
            .ok_or_else(|| DomainError::ParserNotFound(input.id.clone()))?;

        if let Some(name) = input.name {
            parser.name = name;
        }
        if let Some(description) = input.description {
            parser.description = description;
        }
        if let Some(function) = input.function {
            parser.function = function;
        }
        if let Some(hidden) = input.hidden {
            parser.hidden = hidden;
        }
        parser.updated_at = next_revision(parser.updated_at);

        Ok(parser.clone())
    }

    async fn delete_parser(&self, input: DeleteParserRepoInput) -> DomainResult<()> {
        self.parsers
            .write()
            .await
            .remove(&input.id)
            .map(|_| ())
            .ok_or(DomainError::ParserNotFound(input.id))
    }

    async fn list_parsers(
        &self,
        input: ListParsersRepoInput,
    ) -> DomainResult<Vec<ParserDefinition>> {
        let parsers = self.parsers.read().await;

        let mut matching: Vec<ParserDefinition> = parsers
            .values()
            .filter(|p| input.filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        let page = matching.into_iter().skip(input.offset);
        Ok(match input.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDocumentStore {
    async fn get_device_with_parser(
        &self,
        input: GetDeviceWithParserRepoInput,
    ) -> DomainResult<Option<DeviceWithParser>> {
        let Some(device) = self.devices.read().await.get(&input.device_id).cloned() else {
            return Ok(None);
        };

        let parser = match &device.parser_id {
            Some(parser_id) => self.parsers.read().await.get(parser_id).cloned(),
            None => None,
        };

        Ok(Some(DeviceWithParser { device, parser }))
    }

    async fn list_parser_devices(
        &self,
        input: ListParserDevicesRepoInput,
    ) -> DomainResult<Vec<Device>> {
        let devices = self.devices.read().await;

        let mut matching: Vec<Device> = devices
            .values()
            .filter(|d| {
                d.parser_id.as_deref() == Some(input.parser_id.as_str())
                    && d.user_id == input.user_id
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        matching.truncate(input.limit);

        Ok(matching)
    }
}

#[async_trait]
impl MessageRepository for InMemoryDocumentStore {
    async fn find_previous_message(
        &self,
        input: FindPreviousMessageRepoInput,
    ) -> DomainResult<Option<Message>> {
        let messages = self.messages.read().await;

        Ok(messages
            .values()
            .filter(|m| m.device_id == input.device_id && m.created_at < input.before)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn list_device_messages(
        &self,
        input: ListDeviceMessagesRepoInput,
    ) -> DomainResult<Vec<Message>> {
        let messages = self.messages.read().await;

        let mut matching: Vec<Message> = messages
            .values()
            .filter(|m| m.device_id == input.device_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(matching)
    }

    async fn upsert_message(&self, input: UpsertMessageRepoInput) -> DomainResult<Message> {
        let message = input.message;
        debug!(message_id = %message.id, device_id = %message.device_id, "Upserting message");

        self.messages
            .write()
            .await
            .insert(message.id.clone(), message.clone());
        Ok(message)
    }
}

#[async_trait]
impl GeolocationRepository for InMemoryDocumentStore {
    async fn upsert_geolocation(
        &self,
        input: UpsertGeolocationRepoInput,
    ) -> DomainResult<Geolocation> {
        let mut geolocations = self.geolocations.write().await;
        let created_at = geolocations
            .get(&input.id)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);

        let geolocation = Geolocation {
            id: input.id,
            message_id: input.message_id,
            device_id: input.device_id,
            user_id: input.user_id,
            latitude: input.latitude,
            longitude: input.longitude,
            precision: input.precision,
            source: input.source,
            created_at,
        };

        geolocations.insert(geolocation.id.clone(), geolocation.clone());
        Ok(geolocation)
    }
}

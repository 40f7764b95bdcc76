use crate::domain::{DomainResult, ParserDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parser_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Device joined with its parser association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceWithParser {
    pub device: Device,
    pub parser: Option<ParserDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDeviceWithParserRepoInput {
    pub device_id: String,
}

/// Devices associated to a parser and owned by `user_id`, most recently updated first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParserDevicesRepoInput {
    pub parser_id: String,
    pub user_id: String,
    pub limit: usize,
}

/// Repository trait for device storage operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Get a device together with its associated parser definition
    async fn get_device_with_parser(
        &self,
        input: GetDeviceWithParserRepoInput,
    ) -> DomainResult<Option<DeviceWithParser>>;

    async fn list_parser_devices(
        &self,
        input: ListParserDevicesRepoInput,
    ) -> DomainResult<Vec<Device>>;
}

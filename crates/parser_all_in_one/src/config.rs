use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Stream receiving parser events, published on `<stream>.<owner id>` or `<stream>.all`
    #[serde(default = "default_events_stream")]
    pub events_stream: String,

    /// Stream carrying batch reparse commands
    #[serde(default = "default_commands_stream")]
    pub commands_stream: String,

    #[serde(default = "default_commands_subject")]
    pub commands_subject: String,

    #[serde(default = "default_commands_consumer_name")]
    pub commands_consumer_name: String,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Startup timeout for initialization operations in seconds
    /// Core NATS subject answering parser CRUD and payload trial requests
    #[serde(default = "default_requests_subject")]
    pub requests_subject: String,

    #[serde(default = "default_requests_queue_group")]
    pub requests_queue_group: String,

    #[serde(default = "default_requests_max_in_flight")]
    pub requests_max_in_flight: usize,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Script sandbox
    /// Wall-clock budget per script run
    #[serde(default = "default_script_timeout_ms")]
    pub script_timeout_ms: u64,

    #[serde(default = "default_script_cache_capacity")]
    pub script_cache_capacity: usize,

    /// 0 = unlimited; the wall-clock budget still applies
    #[serde(default)]
    pub script_max_operations: u64,

    // Batch reparse
    #[serde(default = "default_device_concurrency")]
    pub device_concurrency: usize,

    #[serde(default = "default_parser_devices_limit")]
    pub parser_devices_limit: usize,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// JSON snapshot seeding the in-memory store
    #[serde(default)]
    pub store_snapshot_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "parser-all-in-one".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_events_stream() -> String {
    "parser".to_string()
}

fn default_commands_stream() -> String {
    "parser_commands".to_string()
}

fn default_commands_subject() -> String {
    "parser_commands.>".to_string()
}

fn default_commands_consumer_name() -> String {
    "parser-worker-commands".to_string()
}

fn default_nats_batch_size() -> usize {
    10
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_requests_subject() -> String {
    "parser_requests".to_string()
}

fn default_requests_queue_group() -> String {
    "parser-worker".to_string()
}

fn default_requests_max_in_flight() -> usize {
    16
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// Sandbox defaults
fn default_script_timeout_ms() -> u64 {
    5000
}

fn default_script_cache_capacity() -> usize {
    1024
}

// Batch defaults
fn default_device_concurrency() -> usize {
    4
}

fn default_parser_devices_limit() -> usize {
    100
}

fn default_event_queue_capacity() -> usize {
    1024
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("PARSER"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // env vars are process-wide
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: serialized by TEST_LOCK
        unsafe {
            std::env::remove_var("PARSER_LOG_LEVEL");
            std::env::remove_var("PARSER_SCRIPT_TIMEOUT_MS");
            std::env::remove_var("PARSER_STORE_SNAPSHOT_PATH");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.script_timeout_ms, 5000);
        assert_eq!(config.script_cache_capacity, 1024);
        assert_eq!(config.script_max_operations, 0);
        assert_eq!(config.parser_devices_limit, 100);
        assert_eq!(config.events_stream, "parser");
        assert_eq!(config.requests_subject, "parser_requests");
        assert_eq!(config.requests_max_in_flight, 16);
        assert!(config.store_snapshot_path.is_none());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: serialized by TEST_LOCK
        unsafe {
            std::env::set_var("PARSER_LOG_LEVEL", "debug");
            std::env::set_var("PARSER_SCRIPT_TIMEOUT_MS", "250");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.script_timeout_ms, 250);

        // SAFETY: serialized by TEST_LOCK
        unsafe {
            std::env::remove_var("PARSER_LOG_LEVEL");
            std::env::remove_var("PARSER_SCRIPT_TIMEOUT_MS");
        }
    }
}

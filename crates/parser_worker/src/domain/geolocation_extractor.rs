use async_trait::async_trait;
use common::domain::{
    DomainResult, Geolocation, GeolocationExtractor, GeolocationRepository, Message,
    MessageRepository, ParsedPayload, UpsertGeolocationRepoInput, UpsertMessageRepoInput,
};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const LATITUDE_KEY: &str = "lat";
pub const LONGITUDE_KEY: &str = "lng";
pub const PRECISION_KEY: &str = "precision";
pub const GPS_SOURCE: &str = "gps";

/// Derives a GPS location from `lat`/`lng` entries of a parsed payload
pub struct ParsedPayloadGeolocationExtractor {
    geolocation_repository: Arc<dyn GeolocationRepository>,
    message_repository: Arc<dyn MessageRepository>,
}

impl ParsedPayloadGeolocationExtractor {
    pub fn new(
        geolocation_repository: Arc<dyn GeolocationRepository>,
        message_repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            geolocation_repository,
            message_repository,
        }
    }
}

/// One GPS location per message, so reparsing replaces instead of accumulating
pub fn gps_geolocation_id(message_id: &str) -> String {
    format!("{message_id}.{GPS_SOURCE}")
}

fn numeric_entry(parsed: &ParsedPayload, key: &str) -> Option<f64> {
    parsed.entry(key).and_then(|entry| entry.value.as_f64())
}

/// `(latitude, longitude, precision)` when both coordinates are present and in range
fn coordinates(parsed: &ParsedPayload) -> Option<(f64, f64, Option<f64>)> {
    let latitude = numeric_entry(parsed, LATITUDE_KEY)?;
    let longitude = numeric_entry(parsed, LONGITUDE_KEY)?;

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }

    Some((latitude, longitude, numeric_entry(parsed, PRECISION_KEY)))
}

#[async_trait]
impl GeolocationExtractor for ParsedPayloadGeolocationExtractor {
    #[instrument(skip(self, message), fields(message_id = %message.id, device_id = %message.device_id))]
    async fn create_from_parsed_message(&self, message: &Message) -> DomainResult<Vec<Geolocation>> {
        let Some((latitude, longitude, precision)) =
            message.data_parsed.as_ref().and_then(coordinates)
        else {
            debug!("No coordinates in parsed payload");
            return Ok(Vec::new());
        };

        let geolocation = self
            .geolocation_repository
            .upsert_geolocation(UpsertGeolocationRepoInput {
                id: gps_geolocation_id(&message.id),
                message_id: message.id.clone(),
                device_id: message.device_id.clone(),
                user_id: message.user_id.clone(),
                latitude,
                longitude,
                precision,
                source: GPS_SOURCE.to_string(),
            })
            .await?;

        if !message.geoloc_ids.contains(&geolocation.id) {
            let mut updated = message.clone();
            updated.geoloc_ids.push(geolocation.id.clone());
            self.message_repository
                .upsert_message(UpsertMessageRepoInput { message: updated })
                .await?;
        }

        debug!(geolocation_id = %geolocation.id, "Stored geolocation from parsed payload");
        Ok(vec![geolocation])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{MockGeolocationRepository, MockMessageRepository};
    use serde_json::json;

    fn message(parsed: serde_json::Value) -> Message {
        Message {
            id: "m-1".to_string(),
            device_id: "d-1".to_string(),
            user_id: "u-1".to_string(),
            created_at: Utc::now(),
            data: Some("AABB".to_string()),
            data_parsed: Some(ParsedPayload::new(parsed)),
            geoloc_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_coordinates_create_geolocation_and_link_message() {
        // Arrange
        let mut geo_repo = MockGeolocationRepository::new();
        let mut message_repo = MockMessageRepository::new();

        geo_repo
            .expect_upsert_geolocation()
            .withf(|input: &UpsertGeolocationRepoInput| {
                input.id == "m-1.gps"
                    && input.latitude == 48.85
                    && input.longitude == 2.35
                    && input.precision == Some(10.0)
                    && input.source == "gps"
            })
            .times(1)
            .returning(|input| {
                Ok(Geolocation {
                    id: input.id,
                    message_id: input.message_id,
                    device_id: input.device_id,
                    user_id: input.user_id,
                    latitude: input.latitude,
                    longitude: input.longitude,
                    precision: input.precision,
                    source: input.source,
                    created_at: Utc::now(),
                })
            });
        message_repo
            .expect_upsert_message()
            .withf(|input: &UpsertMessageRepoInput| input.message.geoloc_ids.len() == 1)
            .times(1)
            .returning(|input| Ok(input.message));

        let extractor =
            ParsedPayloadGeolocationExtractor::new(Arc::new(geo_repo), Arc::new(message_repo));

        // Act
        let created = extractor
            .create_from_parsed_message(&message(json!([
                {"key": "lat", "value": 48.85},
                {"key": "lng", "value": 2.35},
                {"key": "precision", "value": 10}
            ])))
            .await
            .unwrap();

        // Assert
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn test_payload_without_coordinates_is_ignored() {
        let mut geo_repo = MockGeolocationRepository::new();
        let mut message_repo = MockMessageRepository::new();
        geo_repo.expect_upsert_geolocation().times(0);
        message_repo.expect_upsert_message().times(0);

        let extractor =
            ParsedPayloadGeolocationExtractor::new(Arc::new(geo_repo), Arc::new(message_repo));

        let created = extractor
            .create_from_parsed_message(&message(json!([{"key": "temperature", "value": 21}])))
            .await
            .unwrap();

        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_already_linked_geolocation_is_replaced_without_relinking() {
        // Arrange
        let mut geo_repo = MockGeolocationRepository::new();
        let mut message_repo = MockMessageRepository::new();

        geo_repo
            .expect_upsert_geolocation()
            .withf(|input: &UpsertGeolocationRepoInput| input.id == "m-1.gps")
            .times(1)
            .returning(|input| {
                Ok(Geolocation {
                    id: input.id,
                    message_id: input.message_id,
                    device_id: input.device_id,
                    user_id: input.user_id,
                    latitude: input.latitude,
                    longitude: input.longitude,
                    precision: input.precision,
                    source: input.source,
                    created_at: Utc::now(),
                })
            });
        message_repo.expect_upsert_message().times(0);

        let extractor =
            ParsedPayloadGeolocationExtractor::new(Arc::new(geo_repo), Arc::new(message_repo));

        let mut linked = message(json!([
            {"key": "lat", "value": 10.0},
            {"key": "lng", "value": 20.0}
        ]));
        linked.geoloc_ids = vec![gps_geolocation_id("m-1")];

        // Act
        let created = extractor.create_from_parsed_message(&linked).await.unwrap();

        // Assert
        assert_eq!(created[0].latitude, 10.0);
    }

    #[test]
    fn test_out_of_range_coordinates_are_rejected() {
        let parsed = ParsedPayload::new(json!([
            {"key": "lat", "value": 123.0},
            {"key": "lng", "value": 2.0}
        ]));
        assert!(coordinates(&parsed).is_none());
    }
}

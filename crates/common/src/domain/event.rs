use crate::domain::{DomainResult, ParserDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kind tag for parser definition changes
pub const PARSER_EVENT: &str = "parser";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventAction::Create => f.write_str("CREATE"),
            EventAction::Update => f.write_str("UPDATE"),
            EventAction::Delete => f.write_str("DELETE"),
        }
    }
}

/// State-change notification for real-time consumers. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event: String,
    pub content: serde_json::Value,
    pub action: EventAction,
    /// Owner identity used to partition subscriptions
    #[serde(skip)]
    pub routing_key: Option<String>,
}

impl DomainEvent {
    /// Create and update events are routed to the owner; deletes are not routed
    pub fn parser(action: EventAction, parser: &ParserDefinition) -> Self {
        let routing_key = match action {
            EventAction::Create | EventAction::Update => Some(parser.user_id.clone()),
            EventAction::Delete => None,
        };

        Self {
            event: PARSER_EVENT.to_string(),
            // ParserDefinition only holds strings, bools and timestamps
            content: serde_json::to_value(parser).unwrap_or(serde_json::Value::Null),
            action,
            routing_key,
        }
    }
}

/// Publishes domain events to the message bus
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn parser() -> ParserDefinition {
        ParserDefinition {
            id: "p-1".to_string(),
            user_id: "u-1".to_string(),
            name: "counter".to_string(),
            description: String::new(),
            function: "payload".to_string(),
            hidden: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_routing_key_per_action() {
        let parser = parser();

        assert_eq!(
            DomainEvent::parser(EventAction::Create, &parser).routing_key,
            Some("u-1".to_string())
        );
        assert_eq!(
            DomainEvent::parser(EventAction::Update, &parser).routing_key,
            Some("u-1".to_string())
        );
        assert_eq!(DomainEvent::parser(EventAction::Delete, &parser).routing_key, None);
    }

    #[test]
    fn test_wire_shape() {
        let event = DomainEvent::parser(EventAction::Delete, &parser());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "parser");
        assert_eq!(json["action"], "DELETE");
        assert_eq!(json["content"]["id"], "p-1");
        assert!(json.get("routing_key").is_none());
    }
}

use crate::domain::{Caller, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored, user-authored payload transformation plus ownership metadata.
///
/// `function` is untrusted script source and only ever runs inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserDefinition {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub function: String,
    #[serde(default)]
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query predicate over parser definitions.
///
/// Evaluated by the store before sorting and pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserFilter {
    All,
    IdEquals(String),
    OwnedBy(String),
    NotHidden,
    NameContains(String),
    And(Vec<ParserFilter>),
    Or(Vec<ParserFilter>),
}

impl ParserFilter {
    pub fn matches(&self, parser: &ParserDefinition) -> bool {
        match self {
            ParserFilter::All => true,
            ParserFilter::IdEquals(id) => parser.id == *id,
            ParserFilter::OwnedBy(user_id) => parser.user_id == *user_id,
            ParserFilter::NotHidden => !parser.hidden,
            ParserFilter::NameContains(needle) => parser
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            ParserFilter::And(filters) => filters.iter().all(|f| f.matches(parser)),
            ParserFilter::Or(filters) => filters.iter().any(|f| f.matches(parser)),
        }
    }

    /// Restricts `base` to what `caller` may read.
    ///
    /// Admins are unrestricted. Anyone else gets `base AND (NOT hidden OR owned)`;
    /// anonymous callers own nothing and so only see public parsers.
    pub fn scoped_for(caller: &Caller, base: Option<ParserFilter>) -> ParserFilter {
        if caller.is_admin && caller.is_authenticated() {
            return base.unwrap_or(ParserFilter::All);
        }

        let visibility = if caller.is_authenticated() {
            ParserFilter::Or(vec![
                ParserFilter::NotHidden,
                ParserFilter::OwnedBy(caller.user_id.clone()),
            ])
        } else {
            ParserFilter::NotHidden
        };

        match base {
            Some(base) => ParserFilter::And(vec![base, visibility]),
            None => visibility,
        }
    }
}

/// Repository input for creating a parser (service -> repository)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParserRepoInput {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub function: String,
    pub hidden: bool,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateParserRepoInput {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub function: Option<String>,
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteParserRepoInput {
    pub id: String,
}

/// Filtered listing, newest `updated_at` first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParsersRepoInput {
    pub filter: ParserFilter,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Repository trait for parser definition storage
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ParserRepository: Send + Sync {
    /// Create a parser; the store stamps `created_at` and `updated_at`
    async fn create_parser(&self, input: CreateParserRepoInput) -> DomainResult<ParserDefinition>;

    /// Update a parser; `updated_at` must strictly increase
    async fn update_parser(&self, input: UpdateParserRepoInput) -> DomainResult<ParserDefinition>;

    async fn delete_parser(&self, input: DeleteParserRepoInput) -> DomainResult<()>;

    async fn list_parsers(&self, input: ListParsersRepoInput)
        -> DomainResult<Vec<ParserDefinition>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(id: &str, owner: &str, hidden: bool) -> ParserDefinition {
        ParserDefinition {
            id: id.to_string(),
            user_id: owner.to_string(),
            name: format!("Parser {id}"),
            description: String::new(),
            function: "payload".to_string(),
            hidden,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_admin_sees_everything() {
        let filter = ParserFilter::scoped_for(&Caller::admin("root"), None);
        assert_eq!(filter, ParserFilter::All);
        assert!(filter.matches(&parser("p1", "alice", true)));
    }

    #[test]
    fn test_user_sees_public_and_own_hidden() {
        let filter = ParserFilter::scoped_for(&Caller::user("alice"), None);

        assert!(filter.matches(&parser("p1", "bob", false)));
        assert!(filter.matches(&parser("p2", "alice", true)));
        assert!(!filter.matches(&parser("p3", "bob", true)));
    }

    #[test]
    fn test_base_filter_is_combined_not_replaced() {
        let base = ParserFilter::IdEquals("p1".to_string());
        let filter = ParserFilter::scoped_for(&Caller::user("alice"), Some(base));

        assert!(filter.matches(&parser("p1", "bob", false)));
        assert!(filter.matches(&parser("p1", "alice", true)));
        assert!(!filter.matches(&parser("p1", "bob", true)));
        // own parsers outside the base predicate stay excluded
        assert!(!filter.matches(&parser("p9", "alice", true)));
    }

    #[test]
    fn test_anonymous_sees_only_public() {
        let filter = ParserFilter::scoped_for(&Caller::anonymous(), None);

        assert!(filter.matches(&parser("p1", "bob", false)));
        assert!(!filter.matches(&parser("p2", "", true)));
    }

    #[test]
    fn test_name_contains_is_case_insensitive() {
        let filter = ParserFilter::NameContains("PARSER p".to_string());
        assert!(filter.matches(&parser("p1", "bob", false)));
    }
}

use crate::domain::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};

/// Identity attached to an incoming request.
///
/// Authentication happens upstream; an empty `user_id` means the request
/// carried no valid access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.trim().is_empty()
    }

    /// Returns the caller's user id, or `Unauthorized` if there is none
    pub fn require_authenticated(&self) -> DomainResult<&str> {
        if self.is_authenticated() {
            Ok(&self.user_id)
        } else {
            Err(DomainError::Unauthorized)
        }
    }

    /// Owner or admin
    pub fn can_modify(&self, owner_id: &str) -> bool {
        self.is_authenticated() && (self.is_admin || self.user_id == owner_id)
    }
}

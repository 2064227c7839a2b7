//! The cached current-user record.

use serde::{Deserialize, Serialize};

/// The signed-in user as held in the local cache.
///
/// Only the fields the dispatcher reads are modeled; unknown fields in the
/// cached JSON are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Remote user identifier, used for profile lookups.
    pub id: String,
    /// Display name sent in the `x-user-username` header.
    pub username: String,
    /// The user's own bearer token, if known locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_token: Option<String>,
    /// Servers this user is scoped to. Empty means the full registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
}

impl UserProfile {
    /// Create a profile with no token and no server scope.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            personal_token: None,
            servers: Vec::new(),
        }
    }

    /// The personal token, if present and non-blank.
    pub fn personal_token(&self) -> Option<&str> {
        self.personal_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_personal_token_counts_as_missing() {
        let mut user = UserProfile::new("u-1", "ana");
        user.personal_token = Some("  ".into());
        assert!(user.personal_token().is_none());
        user.personal_token = Some("tok".into());
        assert_eq!(user.personal_token(), Some("tok"));
    }

    #[test]
    fn ignores_unknown_fields() {
        let json = r#"{"id":"u-1","username":"ana","role":"admin","avatar":null}"#;
        let user: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(user.username, "ana");
        assert!(user.servers.is_empty());
    }
}

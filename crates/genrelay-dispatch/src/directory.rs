//! Remote token directory: the source of personal tokens on a cache miss and
//! of shared-pool tokens.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RemoteError;
use crate::rest::RestStore;

/// Table holding user profiles.
const PROFILES_TABLE: &str = "profiles";
/// Table holding issued shared tokens.
const SHARED_TOKENS_TABLE: &str = "shared_tokens";

/// Remote lookups used by the token resolver.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` across concurrent dispatches.
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    /// Personal token stored on the profile of `user_id`, if any.
    async fn profile_token(&self, user_id: &str) -> Result<Option<String>, RemoteError>;

    /// Up to `limit` shared tokens, most recently issued first.
    async fn latest_shared_tokens(&self, limit: usize) -> Result<Vec<String>, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    personal_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SharedTokenRow {
    token: String,
}

/// [`TokenDirectory`] backed by the remote store's REST interface.
///
/// | Method | Path | Operation |
/// |--------|------|-----------|
/// | GET | `/rest/v1/profiles?id=eq.{id}&select=personal_token` | Personal token |
/// | GET | `/rest/v1/shared_tokens?select=token&order=created_at.desc&limit={n}` | Latest shared tokens |
#[derive(Debug, Clone)]
pub struct RestTokenDirectory {
    store: RestStore,
}

impl RestTokenDirectory {
    /// Wrap a store client.
    pub fn new(store: RestStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenDirectory for RestTokenDirectory {
    async fn profile_token(&self, user_id: &str) -> Result<Option<String>, RemoteError> {
        let rows: Vec<ProfileRow> = self
            .store
            .select(
                PROFILES_TABLE,
                &[
                    ("id", format!("eq.{user_id}")),
                    ("select", "personal_token".to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.personal_token)
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty()))
    }

    async fn latest_shared_tokens(&self, limit: usize) -> Result<Vec<String>, RemoteError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<SharedTokenRow> = self
            .store
            .select(
                SHARED_TOKENS_TABLE,
                &[
                    ("select", "token".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.token.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }
}

//! # Token Resolver
//!
//! Produces the ordered candidate token list for a request.
//!
//! 1. An explicit token on the request wins outright; nothing else is consulted.
//! 2. The personal token comes from the cached current user. On a miss the
//!    remote directory is asked in bounded rounds (see [`crate::retry`]): the
//!    user's profile first, then, for pool-capable services, the most
//!    recently issued shared token.
//! 3. Pool-capable services append the cached pool, deduplicated. An empty
//!    pool cache is filled from the directory on demand.
//!
//! An empty result is an [`DispatchError::Authentication`] whose message names
//! the remediation step.

use std::sync::Arc;

use genrelay_core::{
    CandidateToken, DispatchRequest, Provenance, RelayCache, ServiceType, UserProfile,
};

use crate::config::LookupPolicy;
use crate::directory::TokenDirectory;
use crate::error::DispatchError;
use crate::retry::retry_lookup;

/// Remediation shown when a pool-capable request has no token at all.
pub const NO_TOKEN_OR_POOL_MESSAGE: &str = "No personal token is set and the shared token pool is empty. \
Set a personal token in your profile settings to continue.";

/// Remediation shown when a personal-token-only request has no token.
pub const NO_PERSONAL_TOKEN_MESSAGE: &str = "No personal token is set. \
Set a personal token in your profile settings to continue.";

/// Resolves candidate tokens for requests.
#[derive(Clone)]
pub struct TokenResolver {
    cache: RelayCache,
    directory: Option<Arc<dyn TokenDirectory>>,
    lookup: LookupPolicy,
    pool_size: usize,
}

impl std::fmt::Debug for TokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResolver")
            .field("directory", &self.directory.is_some())
            .field("lookup", &self.lookup)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl TokenResolver {
    /// Create a resolver. Without a directory, only cached tokens are used.
    pub fn new(
        cache: RelayCache,
        directory: Option<Arc<dyn TokenDirectory>>,
        lookup: LookupPolicy,
        pool_size: usize,
    ) -> Self {
        Self {
            cache,
            directory,
            lookup,
            pool_size,
        }
    }

    /// Ordered candidate tokens for `request`.
    ///
    /// When no personal token is cached and a directory is configured, the
    /// remote lookup runs every round of the [`LookupPolicy`] before giving
    /// up, even if a cached pool could serve the request. With the default
    /// policy a user without a personal token waits 2–3s here on every
    /// secondary dispatch; callers that cannot afford this should cache the
    /// personal token or use [`LookupPolicy::immediate`].
    pub async fn resolve(
        &self,
        request: &DispatchRequest,
        current_user: Option<&UserProfile>,
    ) -> Result<Vec<CandidateToken>, DispatchError> {
        if let Some(token) = request.explicit_token() {
            return Ok(vec![CandidateToken::new(token, Provenance::Explicit)]);
        }

        let service = request.service_type;
        let mut tokens = Vec::new();
        if let Some(first) = self.personal_token(service, current_user).await {
            tokens.push(first);
        }

        if service.supports_pool() {
            for value in self.pool_tokens().await {
                if !tokens.iter().any(|t: &CandidateToken| t.value() == value) {
                    tokens.push(CandidateToken::new(value, Provenance::PoolRandom));
                }
            }
        }

        if tokens.is_empty() {
            let message = if service.supports_pool() {
                NO_TOKEN_OR_POOL_MESSAGE
            } else {
                NO_PERSONAL_TOKEN_MESSAGE
            };
            tracing::warn!(service = %service, "no usable token resolved");
            return Err(DispatchError::Authentication {
                service_type: service,
                message: message.to_string(),
            });
        }

        tracing::debug!(
            service = %service,
            count = tokens.len(),
            "resolved candidate tokens"
        );
        Ok(tokens)
    }

    /// Fetch the `limit` most recent shared tokens and replace the cached pool.
    pub async fn refresh_pool(&self, limit: usize) -> Result<Vec<String>, DispatchError> {
        let directory = self
            .directory
            .as_ref()
            .ok_or_else(|| DispatchError::NotConfigured("remote token directory".into()))?;
        let mut tokens: Vec<String> = Vec::new();
        for token in directory.latest_shared_tokens(limit).await? {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        self.cache.set_token_pool(&tokens)?;
        tracing::info!(count = tokens.len(), "refreshed shared token pool");
        Ok(tokens)
    }

    async fn personal_token(
        &self,
        service: ServiceType,
        current_user: Option<&UserProfile>,
    ) -> Option<CandidateToken> {
        if let Some(token) = current_user.and_then(UserProfile::personal_token) {
            return Some(CandidateToken::new(token, Provenance::Personal));
        }

        let directory = self.directory.as_ref()?;
        let user_id = current_user
            .map(|u| u.id.trim())
            .filter(|id| !id.is_empty());
        if user_id.is_none() && !service.supports_pool() {
            return None;
        }

        retry_lookup(&self.lookup, "personal token", |round| async move {
            if let Some(id) = user_id {
                match directory.profile_token(id).await {
                    Ok(Some(token)) => {
                        self.remember_personal_token(current_user, &token);
                        return Some(CandidateToken::new(token, Provenance::Personal));
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(round, "profile token lookup failed: {e}"),
                }
            }
            if service.supports_pool() {
                match directory.latest_shared_tokens(1).await {
                    Ok(latest) => {
                        if let Some(token) = latest.into_iter().next() {
                            return Some(CandidateToken::new(token, Provenance::PoolRandom));
                        }
                    }
                    Err(e) => tracing::warn!(round, "latest shared token lookup failed: {e}"),
                }
            }
            None
        })
        .await
    }

    /// Write a freshly fetched personal token back into the cached user.
    /// Concurrent dispatches may overwrite each other; last writer wins.
    fn remember_personal_token(&self, current_user: Option<&UserProfile>, token: &str) {
        let Some(user) = current_user else {
            return;
        };
        let mut updated = user.clone();
        updated.personal_token = Some(token.to_string());
        if let Err(e) = self.cache.set_current_user(&updated) {
            tracing::warn!("failed to cache personal token: {e}");
        }
    }

    async fn pool_tokens(&self) -> Vec<String> {
        let cached = match self.cache.token_pool() {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("ignoring unreadable token pool cache: {e}");
                Vec::new()
            }
        };
        if !cached.is_empty() || self.directory.is_none() || self.pool_size == 0 {
            return cached;
        }
        match self.refresh_pool(self.pool_size).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("shared token pool population failed: {e}");
                Vec::new()
            }
        }
    }
}

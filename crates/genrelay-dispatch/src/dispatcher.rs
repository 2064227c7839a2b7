//! # Dispatcher
//!
//! Delivers one request by walking the server×token cross-product.
//!
//! ## Flow
//!
//! 1. Resolve candidate tokens; an empty list fails before any network call.
//! 2. Resolve candidate servers, then shuffle both lists independently.
//! 3. Build the servers (outer) × tokens (inner) pairs, dropping repeats: a
//!    promoted server is listed twice but each pair is tried at most once.
//! 4. Compute the budget: generation requests try up to
//!    `min(distinct pairs, max_combinations)` combinations, everything else
//!    exactly one.
//! 5. Walk the pairs in order until the budget is spent. Generation requests
//!    reserve a slot on the first server before the first attempt; a failed
//!    reservation is only logged.
//! 6. Each response is classified ([`crate::classify`]): success returns,
//!    fatal rejections return immediately, everything else moves on.
//!
//! Exhaustion and fatal rejections of generation requests each produce one
//! [`FailureRecord`]. Combinations run strictly one after another.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use genrelay_core::{
    Attempt, AttemptStatus, CandidateServer, CandidateToken, DispatchRequest, RelayCache,
    UserProfile,
};
use reqwest::header::HeaderValue;
use serde_json::Value;

use crate::classify::{classify_response, classify_transport};
use crate::config::{RelayConfig, RetryPolicy, ShuffleMode};
use crate::directory::{RestTokenDirectory, TokenDirectory};
use crate::environment::{DeviceClassifier, RuntimeEnvironment, StaticDeviceClass};
use crate::error::{AttemptError, DispatchError};
use crate::failure_log::{FailureKind, FailureLog, FailureRecord, RestFailureLog, TracingFailureLog};
use crate::rest::RestStore;
use crate::servers::{ServerPlan, ServerRegistry, ServerResolver};
use crate::shuffle::{self, RandomShuffle, ShuffleSource};
use crate::slots::{RestSlotReservation, SlotReservation};
use crate::tokens::TokenResolver;

/// Header carrying the current user's name to the proxy.
pub const USERNAME_HEADER: &str = "x-user-username";

/// Username sent when no usable one is cached.
const UNKNOWN_USER: &str = "unknown";

/// Result of a successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Parsed response body.
    pub data: Value,
    /// Token of the winning combination.
    pub token: CandidateToken,
    /// Server of the winning combination.
    pub server: CandidateServer,
    /// Every attempt made, in order. The last one succeeded.
    pub attempts: Vec<Attempt>,
}

impl DispatchOutcome {
    /// Follow-up request pinned to the winning token and server.
    pub fn pin(
        &self,
        request: &DispatchRequest,
        relative_path: impl Into<String>,
        body: Value,
        log_context: impl Into<String>,
    ) -> DispatchRequest {
        request.pinned_to(relative_path, body, log_context, &self.token, &self.server)
    }
}

/// Sends requests through the proxy fleet.
pub struct Dispatcher {
    http: reqwest::Client,
    cache: RelayCache,
    tokens: TokenResolver,
    servers: ServerResolver,
    slots: Option<Arc<dyn SlotReservation>>,
    failures: Arc<dyn FailureLog>,
    shuffle: Arc<dyn ShuffleSource>,
    retry: RetryPolicy,
    shuffle_mode: ShuffleMode,
    slot_cooldown: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tokens", &self.tokens)
            .field("servers", &self.servers)
            .field("slots", &self.slots.is_some())
            .field("retry", &self.retry)
            .field("shuffle_mode", &self.shuffle_mode)
            .field("slot_cooldown", &self.slot_cooldown)
            .finish()
    }
}

impl Dispatcher {
    /// Start building a dispatcher from `config`.
    pub fn builder(config: RelayConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// The cache shared with the resolvers.
    pub fn cache(&self) -> &RelayCache {
        &self.cache
    }

    /// The token resolver.
    pub fn token_resolver(&self) -> &TokenResolver {
        &self.tokens
    }

    /// The server resolver.
    pub fn server_resolver(&self) -> &ServerResolver {
        &self.servers
    }

    /// The retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Deliver `request`, trying combinations until one succeeds.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Authentication`] when no token resolves.
    /// - [`DispatchError::FatalRequest`] when a response is classified fatal.
    /// - [`DispatchError::Exhausted`] when every combination in the budget
    ///   failed.
    pub async fn execute(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let user = self.current_user();
        let tokens = self.tokens.resolve(request, user.as_ref()).await?;
        let plan = self.servers.resolve(request, user.as_ref());
        if plan.servers.is_empty() {
            return Err(DispatchError::NoServers);
        }

        let servers = self.order_servers(&plan);
        let tokens = shuffle::apply(self.shuffle.as_ref(), &tokens);
        let combinations = distinct_combinations(&servers, &tokens);
        let generation = self.retry.is_generation(&request.log_context);
        let budget = self.retry.budget_for(combinations.len(), generation);
        let username = username_of(user.as_ref());

        tracing::debug!(
            service = %request.service_type,
            path = %request.relative_path,
            servers = servers.len(),
            tokens = tokens.len(),
            combinations = combinations.len(),
            budget,
            generation,
            "dispatching request"
        );

        let mut attempts: Vec<Attempt> = Vec::new();
        let mut last_error: Option<AttemptError> = None;

        for (server, token) in combinations.into_iter().take(budget as usize) {
            let number = attempts.len() as u32 + 1;
            if number == 1 && generation {
                self.reserve_slot(server).await;
            }

            let mut attempt = Attempt::start(number, server, token);
            tracing::debug!(
                attempt = number,
                budget,
                server = %server,
                provenance = %token.provenance(),
                token = %token.fingerprint(),
                "sending attempt"
            );

            match self.send(request, server, token, &username).await {
                Ok((status, data)) => {
                    attempt.finish(AttemptStatus::Success, Some(status))?;
                    attempts.push(attempt);
                    tracing::info!(
                        attempt = number,
                        server = %server,
                        provenance = %token.provenance(),
                        "dispatch succeeded"
                    );
                    return Ok(DispatchOutcome {
                        data,
                        token: token.clone(),
                        server: server.clone(),
                        attempts,
                    });
                }
                Err(AttemptError::Fatal {
                    server: failed_on,
                    status,
                    message,
                }) => {
                    attempt.finish(AttemptStatus::FatalFailure, Some(status))?;
                    attempts.push(attempt);
                    tracing::warn!(
                        attempt = number,
                        server = %failed_on,
                        provenance = %token.provenance(),
                        status,
                        "request rejected: {message}"
                    );
                    if generation {
                        let mut record = FailureRecord::new(
                            FailureKind::Fatal,
                            request.service_type,
                            &request.relative_path,
                            &request.log_context,
                            number,
                            &message,
                        );
                        record.provenance = Some(token.provenance());
                        record.server = Some(failed_on.clone());
                        record.http_status = Some(status);
                        record.username = username.clone();
                        self.record_failure(record).await;
                    }
                    return Err(DispatchError::FatalRequest {
                        status,
                        message,
                        server: failed_on,
                        provenance: token.provenance(),
                        attempts: number,
                    });
                }
                Err(err) => {
                    attempt.finish(AttemptStatus::RetriableFailure, err.http_status())?;
                    attempts.push(attempt);
                    tracing::warn!(
                        attempt = number,
                        budget,
                        server = %server,
                        provenance = %token.provenance(),
                        "attempt failed: {err}"
                    );
                    last_error = Some(err);
                }
            }
        }

        let made = attempts.len() as u32;
        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no combination was attempted".to_string());
        let mut record = FailureRecord::new(
            FailureKind::Exhausted,
            request.service_type,
            &request.relative_path,
            &request.log_context,
            made,
            &last_error,
        );
        record.username = username;
        self.record_failure(record).await;

        Err(DispatchError::Exhausted {
            attempts: made,
            last_error,
        })
    }

    /// One POST to `server` with `token`. Returns the HTTP status and body.
    async fn send(
        &self,
        request: &DispatchRequest,
        server: &CandidateServer,
        token: &CandidateToken,
        username: &str,
    ) -> Result<(u16, Value), AttemptError> {
        let url = server.endpoint(request.service_type, &request.relative_path);
        let username = HeaderValue::from_str(username)
            .unwrap_or_else(|_| HeaderValue::from_static(UNKNOWN_USER));

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token.value())
            .header(USERNAME_HEADER, username)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| classify_transport(server.base_url(), &e))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| classify_transport(server.base_url(), &e))?;
        let data = classify_response(server.base_url(), status, &text)?;
        Ok((status, data))
    }

    fn order_servers(&self, plan: &ServerPlan) -> Vec<CandidateServer> {
        match (self.shuffle_mode, plan.promoted) {
            (ShuffleMode::PreferSelected, true) => {
                let (first, rest) = plan.servers.split_at(1);
                let mut ordered = first.to_vec();
                ordered.extend(shuffle::apply(self.shuffle.as_ref(), rest));
                ordered
            }
            _ => shuffle::apply(self.shuffle.as_ref(), &plan.servers),
        }
    }

    async fn reserve_slot(&self, server: &CandidateServer) {
        let Some(slots) = &self.slots else {
            return;
        };
        match slots.reserve(server, self.slot_cooldown).await {
            Ok(()) => tracing::debug!(server = %server, "slot reserved"),
            Err(e) => tracing::warn!(server = %server, "slot reservation failed, proceeding: {e}"),
        }
    }

    async fn record_failure(&self, record: FailureRecord) {
        if let Err(e) = self.failures.record(record).await {
            tracing::warn!("failed to write failure record: {e}");
        }
    }

    fn current_user(&self) -> Option<UserProfile> {
        match self.cache.current_user() {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("ignoring unreadable cached user: {e}");
                None
            }
        }
    }
}

/// Servers (outer) × tokens (inner), keeping the first occurrence of each
/// pair. A promoted server appears twice in `servers`.
fn distinct_combinations<'a>(
    servers: &'a [CandidateServer],
    tokens: &'a [CandidateToken],
) -> Vec<(&'a CandidateServer, &'a CandidateToken)> {
    let mut seen: HashSet<(&CandidateServer, &str)> = HashSet::new();
    servers
        .iter()
        .flat_map(|s| tokens.iter().map(move |t| (s, t)))
        .filter(|&(s, t)| seen.insert((s, t.value())))
        .collect()
}

fn username_of(user: Option<&UserProfile>) -> String {
    user.map(|u| u.username.trim())
        .filter(|u| !u.is_empty())
        .unwrap_or(UNKNOWN_USER)
        .to_string()
}

/// Assembles a [`Dispatcher`].
///
/// Collaborators not injected are derived from the configuration: with store
/// credentials the remote directory, slot reservation, and failure table are
/// used; without them there is no directory, no slot reservation, and
/// failures go to the tracing log.
pub struct DispatcherBuilder {
    config: RelayConfig,
    cache: Option<RelayCache>,
    registry: Option<ServerRegistry>,
    directory: Option<Arc<dyn TokenDirectory>>,
    slots: Option<Arc<dyn SlotReservation>>,
    failures: Option<Arc<dyn FailureLog>>,
    device: Option<Arc<dyn DeviceClassifier>>,
    environment: Option<RuntimeEnvironment>,
    shuffle: Option<Arc<dyn ShuffleSource>>,
}

impl DispatcherBuilder {
    /// Builder with nothing injected.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            cache: None,
            registry: None,
            directory: None,
            slots: None,
            failures: None,
            device: None,
            environment: None,
            shuffle: None,
        }
    }

    /// Cache for the current user, selected server, and token pool.
    pub fn with_cache(mut self, cache: RelayCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Server registry, instead of the configured one.
    pub fn with_registry(mut self, registry: ServerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Remote token directory.
    pub fn with_directory(mut self, directory: Arc<dyn TokenDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Slot reservation client.
    pub fn with_slots(mut self, slots: Arc<dyn SlotReservation>) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Failure log sink.
    pub fn with_failure_log(mut self, failures: Arc<dyn FailureLog>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Device classifier.
    pub fn with_device(mut self, device: Arc<dyn DeviceClassifier>) -> Self {
        self.device = Some(device);
        self
    }

    /// Runtime environment, instead of detecting it.
    pub fn with_environment(mut self, environment: RuntimeEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Shuffle source.
    pub fn with_shuffle(mut self, shuffle: Arc<dyn ShuffleSource>) -> Self {
        self.shuffle = Some(shuffle);
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Client`] if an HTTP client cannot be built.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let config = self.config;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(DispatchError::Client)?;

        let store = match config.store_credentials() {
            Some((url, key)) => Some(RestStore::new(url, key, config.timeout())?),
            None => None,
        };

        let directory = self.directory.or_else(|| {
            store
                .clone()
                .map(|s| Arc::new(RestTokenDirectory::new(s)) as Arc<dyn TokenDirectory>)
        });
        let slots = self.slots.or_else(|| {
            store
                .clone()
                .map(|s| Arc::new(RestSlotReservation::new(s)) as Arc<dyn SlotReservation>)
        });
        let failures = self.failures.unwrap_or_else(|| match store {
            Some(s) => Arc::new(RestFailureLog::new(s)) as Arc<dyn FailureLog>,
            None => Arc::new(TracingFailureLog) as Arc<dyn FailureLog>,
        });

        let cache = self.cache.unwrap_or_else(RelayCache::in_memory);
        let registry = self
            .registry
            .unwrap_or_else(|| ServerRegistry::from_config(&config));
        let device = self.device.unwrap_or_else(|| {
            Arc::new(StaticDeviceClass(config.designated_device)) as Arc<dyn DeviceClassifier>
        });
        let environment = self.environment.unwrap_or_else(RuntimeEnvironment::detect);
        let shuffle = self
            .shuffle
            .unwrap_or_else(|| Arc::new(RandomShuffle::new()) as Arc<dyn ShuffleSource>);

        let tokens = TokenResolver::new(
            cache.clone(),
            directory,
            config.lookup.clone(),
            config.pool_size,
        );
        let servers = ServerResolver::new(&config, registry, device, cache.clone(), environment);

        Ok(Dispatcher {
            http,
            cache,
            tokens,
            servers,
            slots,
            failures,
            shuffle,
            retry: config.retry.clone(),
            shuffle_mode: config.shuffle,
            slot_cooldown: config.slot_cooldown(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shuffle::IdentityShuffle;
    use genrelay_core::ServiceType;

    struct Reverse;

    impl ShuffleSource for Reverse {
        fn permutation(&self, len: usize) -> Vec<usize> {
            (0..len).rev().collect()
        }
    }

    fn dispatcher(mode: ShuffleMode, shuffle: Arc<dyn ShuffleSource>) -> Dispatcher {
        let mut config = RelayConfig::default();
        config.shuffle = mode;
        Dispatcher::builder(config)
            .with_environment(RuntimeEnvironment::default())
            .with_shuffle(shuffle)
            .build()
            .unwrap()
    }

    fn plan(promoted: bool) -> ServerPlan {
        ServerPlan {
            servers: ["https://a.test", "https://b.test", "https://c.test"]
                .into_iter()
                .map(CandidateServer::new)
                .collect(),
            promoted,
            local_override: false,
        }
    }

    fn urls(servers: &[CandidateServer]) -> Vec<&str> {
        servers.iter().map(CandidateServer::base_url).collect()
    }

    #[test]
    fn uniform_mode_shuffles_promoted_server_too() {
        let d = dispatcher(ShuffleMode::Uniform, Arc::new(Reverse));
        assert_eq!(
            urls(&d.order_servers(&plan(true))),
            vec!["https://c.test", "https://b.test", "https://a.test"]
        );
    }

    #[test]
    fn prefer_selected_keeps_promoted_server_first() {
        let d = dispatcher(ShuffleMode::PreferSelected, Arc::new(Reverse));
        assert_eq!(
            urls(&d.order_servers(&plan(true))),
            vec!["https://a.test", "https://c.test", "https://b.test"]
        );
        assert_eq!(
            urls(&d.order_servers(&plan(false))),
            vec!["https://c.test", "https://b.test", "https://a.test"]
        );
    }

    #[test]
    fn username_falls_back_to_unknown() {
        assert_eq!(username_of(None), "unknown");
        let user = UserProfile::new("u-1", "  ");
        assert_eq!(username_of(Some(&user)), "unknown");
        let user = UserProfile::new("u-1", "ana");
        assert_eq!(username_of(Some(&user)), "ana");
    }

    #[test]
    fn outcome_pins_follow_up_request() {
        let outcome = DispatchOutcome {
            data: serde_json::json!({"id": "job-1"}),
            token: CandidateToken::new("tok-a", genrelay_core::Provenance::PoolRandom),
            server: CandidateServer::new("https://s2.test"),
            attempts: Vec::new(),
        };
        let original = DispatchRequest::new(
            ServiceType::Secondary,
            "/generate",
            serde_json::json!({"prompt": "x"}),
            "recipe generation",
        );
        let poll = outcome.pin(&original, "/status/job-1", serde_json::json!({}), "status poll");
        assert_eq!(poll.explicit_token(), Some("tok-a"));
        assert_eq!(poll.override_server(), Some("https://s2.test"));
        assert_eq!(poll.service_type, ServiceType::Secondary);
    }

    #[test]
    fn repeated_server_pairs_are_dropped() {
        let s1 = CandidateServer::new("https://s1.test");
        let s2 = CandidateServer::new("https://s2.test");
        let servers = vec![s2.clone(), s1.clone(), s2.clone()];
        let tokens = vec![
            CandidateToken::new("tok-a", genrelay_core::Provenance::Personal),
            CandidateToken::new("tok-b", genrelay_core::Provenance::PoolRandom),
        ];
        let pairs: Vec<(&str, &str)> = distinct_combinations(&servers, &tokens)
            .into_iter()
            .map(|(s, t)| (s.base_url(), t.value()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("https://s2.test", "tok-a"),
                ("https://s2.test", "tok-b"),
                ("https://s1.test", "tok-a"),
                ("https://s1.test", "tok-b"),
            ]
        );
    }

    #[test]
    fn builder_without_store_has_no_slots() {
        let d = dispatcher(ShuffleMode::Uniform, Arc::new(IdentityShuffle));
        assert!(d.slots.is_none());
    }
}

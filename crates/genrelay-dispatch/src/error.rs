//! Dispatcher error types.
//!
//! [`DispatchError`] is what callers see. Only `Authentication` and
//! `FatalRequest` escape mid-dispatch; per-attempt [`AttemptError`]s that are
//! retriable are absorbed by the combination loop and surface only as the
//! `last_error` of `Exhausted`.

use genrelay_core::{CoreError, Provenance, ServiceType, StateTransitionError};

use crate::config::ConfigError;

/// Errors from calls to the remote profile/token store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// HTTP transport error.
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },
    /// The store returned a non-2xx status.
    #[error("store {endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// Response deserialization failed.
    #[error("failed to deserialize response from {endpoint}: {source}")]
    Deserialization {
        endpoint: String,
        source: reqwest::Error,
    },
}

/// Errors from a slot reservation attempt. Never fatal to a dispatch.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The reservation service could not be reached or failed.
    #[error("slot reservation unavailable: {0}")]
    Unavailable(#[from] RemoteError),
    /// The server is still inside its cooldown window.
    #[error("server {server} is cooling down for another {remaining_ms}ms")]
    Cooldown { server: String, remaining_ms: u64 },
    /// The reservation service answered but declined.
    #[error("slot reservation declined for {server}")]
    Declined { server: String },
}

/// Classified failure of a single (server, token) attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// The network call itself failed.
    #[error("transport error reaching {server}: {message}")]
    Transport { server: String, message: String },
    /// Non-2xx without a fatal marker, or an unusable body.
    #[error("{server} returned HTTP {status}: {message}")]
    Upstream {
        server: String,
        status: u16,
        message: String,
    },
    /// Content rejected by the upstream service.
    #[error("{server} rejected the request with HTTP {status}: {message}")]
    Fatal {
        server: String,
        status: u16,
        message: String,
    },
}

impl AttemptError {
    /// Whether another combination should be tried.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }

    /// HTTP status, if a response arrived.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transport { .. } => None,
            Self::Upstream { status, .. } | Self::Fatal { status, .. } => Some(*status),
        }
    }

    /// The upstream or transport message without the server prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. }
            | Self::Upstream { message, .. }
            | Self::Fatal { message, .. } => message,
        }
    }
}

/// Terminal errors of a dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No usable token; the message names the remediation step.
    #[error("{message}")]
    Authentication {
        service_type: ServiceType,
        message: String,
    },

    /// Content rejected upstream. Never retried.
    #[error("request rejected (HTTP {status}) via {server} using {provenance} token: {message}")]
    FatalRequest {
        status: u16,
        message: String,
        server: String,
        provenance: Provenance,
        attempts: u32,
    },

    /// Every combination in the budget failed.
    #[error("all {attempts} server/token combinations failed; last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// No server could be resolved, not even from defaults.
    #[error("no proxy servers available")]
    NoServers,

    /// A collaborator needed for this operation is not configured.
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// Remote store failure outside the combination loop.
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Local cache failure.
    #[error("cache error: {0}")]
    Cache(#[from] CoreError),

    /// Attempt bookkeeping violated the state machine.
    #[error("attempt state error: {0}")]
    State(#[from] StateTransitionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client construction failed.
    #[error("HTTP client initialization failed: {0}")]
    Client(reqwest::Error),
}

impl DispatchError {
    /// Number of attempts made, for errors raised from inside the loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } | Self::FatalRequest { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

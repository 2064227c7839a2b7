//! # Dispatch Requests
//!
//! A [`DispatchRequest`] names the proxy route, the service family it targets,
//! and an opaque JSON body. Requests are built once and never mutated by the
//! dispatcher; follow-up status polls are derived with
//! [`DispatchRequest::pinned_to`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::server::CandidateServer;
use crate::token::CandidateToken;

/// The backend service family a request targets.
///
/// The service type is also the first path segment after `/api/` on every
/// proxy server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Personal-token-only service. No shared pool fallback.
    Primary,
    /// Service that accepts tokens drawn from the shared pool.
    Secondary,
}

impl ServiceType {
    /// Path segment used in `/api/{segment}{relative_path}`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Whether tokens from the shared pool may be used for this service.
    pub fn supports_pool(&self) -> bool {
        matches!(self, Self::Secondary)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for ServiceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(CoreError::InvalidRequest(format!(
                "unknown service type \"{other}\" (expected primary or secondary)"
            ))),
        }
    }
}

/// A single request to be delivered through one of the proxy servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Route below the service prefix, starting with `/` (e.g. `/generate`).
    pub relative_path: String,
    /// Target service family.
    pub service_type: ServiceType,
    /// Opaque JSON payload, forwarded verbatim.
    pub body: serde_json::Value,
    /// Free-form label describing the caller's intent. Generation work is
    /// recognized from markers in this label.
    pub log_context: String,
    /// Token that must be used, bypassing every other token source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_token: Option<String>,
    /// Server that must be used, bypassing registry filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_server: Option<String>,
}

impl DispatchRequest {
    /// Build a request with no explicit token and no server override.
    ///
    /// A missing leading `/` on `relative_path` is added.
    pub fn new(
        service_type: ServiceType,
        relative_path: impl Into<String>,
        body: serde_json::Value,
        log_context: impl Into<String>,
    ) -> Self {
        let mut relative_path = relative_path.into();
        if !relative_path.is_empty() && !relative_path.starts_with('/') {
            relative_path.insert(0, '/');
        }
        Self {
            relative_path,
            service_type,
            body,
            log_context: log_context.into(),
            explicit_token: None,
            override_server: None,
        }
    }

    /// Use this token and no other.
    pub fn with_explicit_token(mut self, token: impl Into<String>) -> Self {
        self.explicit_token = Some(token.into());
        self
    }

    /// Send to this server and no other.
    pub fn with_override_server(mut self, server: impl Into<String>) -> Self {
        self.override_server = Some(server.into());
        self
    }

    /// The explicit token, if set and non-blank.
    pub fn explicit_token(&self) -> Option<&str> {
        self.explicit_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// The override server, if set and non-blank.
    pub fn override_server(&self) -> Option<&str> {
        self.override_server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Derive a follow-up request pinned to a previous winning pairing.
    ///
    /// Used for status polls after a generation call, so the poll reaches the
    /// same server with the same token.
    pub fn pinned_to(
        &self,
        relative_path: impl Into<String>,
        body: serde_json::Value,
        log_context: impl Into<String>,
        token: &CandidateToken,
        server: &CandidateServer,
    ) -> Self {
        Self::new(self.service_type, relative_path, body, log_context)
            .with_explicit_token(token.value())
            .with_override_server(server.base_url())
    }
}

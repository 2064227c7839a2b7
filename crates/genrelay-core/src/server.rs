//! Candidate proxy servers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::ServiceType;

/// Base URL of one interchangeable proxy server.
///
/// Trailing slashes are stripped on construction so that two spellings of the
/// same server compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateServer {
    base_url: String,
}

impl CandidateServer {
    /// Normalize and wrap a base URL.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: base_url.as_ref().trim().trim_end_matches('/').to_string(),
        }
    }

    /// The normalized base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a route on this server:
    /// `{base_url}/api/{service_type}{relative_path}`.
    pub fn endpoint(&self, service_type: ServiceType, relative_path: &str) -> String {
        format!(
            "{}/api/{}{}",
            self.base_url,
            service_type.path_segment(),
            relative_path
        )
    }
}

impl fmt::Display for CandidateServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        assert_eq!(
            CandidateServer::new("https://a.example.com/"),
            CandidateServer::new("https://a.example.com")
        );
    }

    #[test]
    fn endpoint_composes_service_and_path() {
        let server = CandidateServer::new("https://proxy-1.example.com/");
        assert_eq!(
            server.endpoint(ServiceType::Secondary, "/generate"),
            "https://proxy-1.example.com/api/secondary/generate"
        );
    }

    #[test]
    fn serializes_as_plain_string() {
        let server = CandidateServer::new("http://127.0.0.1:3001");
        assert_eq!(serde_json::to_string(&server).unwrap(), "\"http://127.0.0.1:3001\"");
    }
}

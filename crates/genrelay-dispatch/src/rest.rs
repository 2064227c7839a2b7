//! Thin HTTP client for the remote profile/token store.
//!
//! The store speaks a PostgREST-style interface: tables under
//! `{base_url}/rest/v1/{table}` with filter query parameters, and remote
//! procedures under `{base_url}/rest/v1/rpc/{name}`. Every call sends the API
//! key both as `apikey` and as a bearer token.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;
use zeroize::Zeroizing;

use crate::error::{DispatchError, RemoteError};

/// REST path prefix for tables and procedures.
const API_PREFIX: &str = "rest/v1";

/// Shared client for the remote store.
#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Zeroizing<String>,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl RestStore {
    /// Create a client for the store at `base_url`.
    pub fn new(base_url: &Url, api_key: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DispatchError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key: Zeroizing::new(api_key.to_string()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", self.api_key.as_str())
            .bearer_auth(self.api_key.as_str())
    }

    /// `GET` rows from `table` with the given query parameters.
    pub(crate) async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RemoteError> {
        let endpoint = format!("GET /{table}");
        let resp = self
            .authorize(self.http.get(self.url(table)).query(query))
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        let resp = check_status(&endpoint, resp).await?;
        resp.json().await.map_err(|e| RemoteError::Deserialization {
            endpoint,
            source: e,
        })
    }

    /// `POST` a JSON row into `table`.
    pub(crate) async fn insert<B: Serialize + ?Sized>(
        &self,
        table: &str,
        row: &B,
    ) -> Result<(), RemoteError> {
        let endpoint = format!("POST /{table}");
        let resp = self
            .authorize(self.http.post(self.url(table)).json(row))
            .header("Prefer", "return=minimal")
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        check_status(&endpoint, resp).await?;
        Ok(())
    }

    /// Invoke the remote procedure `name` and return its JSON result.
    pub(crate) async fn rpc<B: Serialize + ?Sized>(
        &self,
        name: &str,
        args: &B,
    ) -> Result<serde_json::Value, RemoteError> {
        let endpoint = format!("RPC {name}");
        let resp = self
            .authorize(self.http.post(self.url(&format!("rpc/{name}"))).json(args))
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        let resp = check_status(&endpoint, resp).await?;
        let text = resp.text().await.map_err(|e| RemoteError::Http {
            endpoint,
            source: e,
        })?;
        // Void procedures answer with an empty body.
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
    }
}

async fn check_status(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        endpoint: endpoint.to_string(),
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_prefix_and_path() {
        let base = Url::parse("https://store.example.com/").unwrap();
        let store = RestStore::new(&base, "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.url("profiles"),
            "https://store.example.com/rest/v1/profiles"
        );
        assert_eq!(
            store.url("/rpc/reserve_server_slot"),
            "https://store.example.com/rest/v1/rpc/reserve_server_slot"
        );
    }

    #[test]
    fn debug_redacts_key() {
        let base = Url::parse("https://store.example.com").unwrap();
        let store = RestStore::new(&base, "anon-secret", Duration::from_secs(5)).unwrap();
        assert!(!format!("{store:?}").contains("anon-secret"));
    }
}

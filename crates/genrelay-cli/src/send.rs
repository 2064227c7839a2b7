//! # Send Subcommand
//!
//! Dispatches one request through the proxy fleet and prints the response
//! together with the winning server and token provenance. The token itself is
//! never printed; its fingerprint is.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use genrelay_core::{DispatchRequest, ServiceType};
use genrelay_dispatch::{DispatchError, DispatchOutcome};
use serde_json::{json, Value};

use crate::{Session, EXIT_AUTH, EXIT_EXHAUSTED, EXIT_REJECTED};

/// Arguments for the `genrelay send` subcommand.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Target service.
    #[arg(long, default_value = "secondary")]
    pub service: ServiceType,

    /// Path below the service prefix, e.g. `/generate`.
    #[arg(long)]
    pub path: String,

    /// Inline JSON body.
    #[arg(long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// File containing the JSON body.
    #[arg(long, value_name = "FILE")]
    pub body_file: Option<PathBuf>,

    /// Log context. Contexts mentioning generation get the full retry budget.
    #[arg(long, default_value = "generation")]
    pub context: String,

    /// Use this token and no other.
    #[arg(long)]
    pub token: Option<String>,

    /// Send to this server and no other.
    #[arg(long)]
    pub server: Option<String>,

    /// Print only the response body.
    #[arg(long)]
    pub data_only: bool,
}

/// Execute the send subcommand.
pub async fn run_send(args: &SendArgs, session: &Session) -> Result<u8> {
    let body = read_body(args)?;
    let mut request = DispatchRequest::new(args.service, &args.path, body, &args.context);
    if let Some(token) = &args.token {
        request = request.with_explicit_token(token);
    }
    if let Some(server) = &args.server {
        request = request.with_override_server(server);
    }

    let dispatcher = session.dispatcher()?;
    match dispatcher.execute(&request).await {
        Ok(outcome) => {
            let printed = if args.data_only {
                outcome.data.clone()
            } else {
                summary(&outcome)
            };
            println!("{}", serde_json::to_string_pretty(&printed)?);
            Ok(0)
        }
        Err(e) => report_failure(&e),
    }
}

/// Map dispatch failures that have a user-facing remedy to exit codes.
fn report_failure(err: &DispatchError) -> Result<u8> {
    match err {
        DispatchError::Authentication { .. } => {
            eprintln!("{err}");
            Ok(EXIT_AUTH)
        }
        DispatchError::FatalRequest { .. } => {
            eprintln!("{err}");
            Ok(EXIT_REJECTED)
        }
        DispatchError::Exhausted { .. } => {
            eprintln!("{err}");
            Ok(EXIT_EXHAUSTED)
        }
        other => Err(anyhow::anyhow!("dispatch failed: {other}")),
    }
}

fn summary(outcome: &DispatchOutcome) -> Value {
    json!({
        "data": outcome.data,
        "server": outcome.server.base_url(),
        "provenance": outcome.token.provenance(),
        "token_fingerprint": outcome.token.fingerprint(),
        "attempts": outcome.attempts,
    })
}

fn read_body(args: &SendArgs) -> Result<Value> {
    let raw = match (&args.body, &args.body_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read body file: {}", path.display()))?,
        (None, None) => return Ok(json!({})),
    };
    serde_json::from_str(&raw).context("request body is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::session;
    use genrelay_core::UserProfile;
    use genrelay_dispatch::RelayConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(path: &str) -> SendArgs {
        SendArgs {
            service: ServiceType::Secondary,
            path: path.into(),
            body: None,
            body_file: None,
            context: "generation".into(),
            token: None,
            server: None,
            data_only: false,
        }
    }

    #[test]
    fn body_defaults_to_empty_object() {
        assert_eq!(read_body(&args("/generate")).unwrap(), json!({}));
    }

    #[test]
    fn body_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("body.json");
        std::fs::write(&file, r#"{"prompt": "x"}"#).unwrap();
        let mut a = args("/generate");
        a.body_file = Some(file);
        assert_eq!(read_body(&a).unwrap(), json!({"prompt": "x"}));
    }

    #[test]
    fn invalid_body_is_an_error() {
        let mut a = args("/generate");
        a.body = Some("{not json".into());
        assert!(read_body(&a).is_err());
    }

    #[test]
    fn failures_map_to_exit_codes() {
        let auth = DispatchError::Authentication {
            service_type: ServiceType::Secondary,
            message: "set a personal token".into(),
        };
        assert_eq!(report_failure(&auth).unwrap(), EXIT_AUTH);
        let exhausted = DispatchError::Exhausted {
            attempts: 3,
            last_error: "boom".into(),
        };
        assert_eq!(report_failure(&exhausted).unwrap(), EXIT_EXHAUSTED);
        assert!(report_failure(&DispatchError::NoServers).is_err());
    }

    #[tokio::test]
    async fn missing_token_exits_with_auth_code() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_send(&args("/generate"), &session(dir.path())).await.unwrap();
        assert_eq!(code, EXIT_AUTH);
    }

    #[tokio::test]
    async fn sends_with_cached_personal_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/secondary/generate"))
            .and(header("authorization", "Bearer mine"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "job-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig {
            servers: vec![server.uri().parse().unwrap()],
            designated_servers: Vec::new(),
            dev_hostnames: Vec::new(),
            dev_ports: Vec::new(),
            ..RelayConfig::default()
        };
        let session = Session::with_config(config, dir.path().join("state.json"));
        let mut user = UserProfile::new("u-1", "ana");
        user.personal_token = Some("mine".into());
        session.cache.set_current_user(&user).unwrap();

        let code = run_send(&args("/generate"), &session).await.unwrap();
        assert_eq!(code, 0);
    }
}

//! # Attempt Classification
//!
//! Maps one proxy response (or transport failure) to success, a retriable
//! failure, or a fatal failure.
//!
//! | Observation                                      | Verdict    |
//! |--------------------------------------------------|------------|
//! | HTTP 400                                         | Fatal      |
//! | message has a transport marker                   | Retriable  |
//! | message has a content-rejection marker           | Fatal      |
//! | other non-2xx                                    | Retriable  |
//! | 2xx, body is not JSON                            | Retriable  |
//! | 2xx, JSON with an `error` envelope               | by message |
//! | 2xx, JSON without an `error` envelope            | Success    |
//! | request never got a response                     | Retriable  |
//!
//! Transport markers are checked before rejection markers, so a message like
//! "network error: request blocked by proxy" stays retriable.

use serde_json::Value;

use crate::error::AttemptError;

/// Characters of raw body kept in a synthesized error envelope.
pub const PREVIEW_CHARS: usize = 100;

/// Case-insensitive substrings marking content rejection.
const REJECTION_MARKERS: &[&str] = &[
    "safety",
    "blocked",
    "invalid prompt",
    "invalid_prompt",
    "invalid-prompt",
];

/// Case-insensitive substrings marking a failed network call.
const TRANSPORT_MARKERS: &[&str] = &[
    "fetch failed",
    "failed to fetch",
    "network error",
    "networkerror",
    "error sending request",
    "connection refused",
    "connection reset",
];

/// Parsed body of one proxy response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    /// JSON document, or a synthesized error envelope when parsing failed.
    pub json: Value,
    /// Whether `json` was synthesized.
    pub synthesized: bool,
}

/// Parse a response body, synthesizing an error envelope for non-JSON text.
///
/// The envelope is `{"error": {"message": ..., "status": ..., "preview": ...}}`
/// with a preview of at most [`PREVIEW_CHARS`] characters.
pub fn parse_body(status: u16, text: &str) -> ResponseBody {
    match serde_json::from_str::<Value>(text) {
        Ok(json) => ResponseBody {
            json,
            synthesized: false,
        },
        Err(_) => {
            let preview = preview(text);
            ResponseBody {
                json: serde_json::json!({
                    "error": {
                        "message": format!("HTTP {status}: non-JSON response: {preview}"),
                        "status": status,
                        "preview": preview,
                    }
                }),
                synthesized: true,
            }
        }
    }
}

/// First [`PREVIEW_CHARS`] characters of `text`.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Message carried by an error envelope, if the document has one.
///
/// Accepts `{"error": "text"}`, `{"error": {"message": "text"}}`, and any other
/// non-null, non-false `error` value (rendered as JSON).
pub fn envelope_message(json: &Value) -> Option<String> {
    let error = json.get("error")?;
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Whether a message describes a failed network call.
pub fn is_transport_message(message: &str) -> bool {
    if message.contains("ERR_") {
        return true;
    }
    let lower = message.to_lowercase();
    TRANSPORT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether a message describes content rejected by the upstream service.
pub fn is_rejection_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    REJECTION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classify a response that arrived with `status` and body `text`.
pub fn classify_response(server: &str, status: u16, text: &str) -> Result<Value, AttemptError> {
    let body = parse_body(status, text);
    let success = (200..300).contains(&status);

    let message = envelope_message(&body.json).or_else(|| {
        if success {
            None
        } else {
            Some(
                body.json
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {status}: {}", preview(text))),
            )
        }
    });

    let Some(message) = message else {
        return Ok(body.json);
    };

    if status == 400 {
        return Err(fatal(server, status, message));
    }

    // A body that is not JSON says nothing reliable about content rejection.
    if body.synthesized {
        return Err(upstream(server, status, message));
    }

    if is_transport_message(&message) {
        return Err(upstream(server, status, message));
    }
    if is_rejection_message(&message) {
        return Err(fatal(server, status, message));
    }
    Err(upstream(server, status, message))
}

/// Classify a request that failed before a response arrived.
pub fn classify_transport(server: &str, error: &reqwest::Error) -> AttemptError {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    AttemptError::Transport {
        server: server.to_string(),
        message,
    }
}

fn fatal(server: &str, status: u16, message: String) -> AttemptError {
    AttemptError::Fatal {
        server: server.to_string(),
        status,
        message,
    }
}

fn upstream(server: &str, status: u16, message: String) -> AttemptError {
    AttemptError::Upstream {
        server: server.to_string(),
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: &str = "https://s1.example.com";

    #[test]
    fn ok_json_is_success() {
        let value = classify_response(S, 200, r#"{"operation":"op-1"}"#).unwrap();
        assert_eq!(value["operation"], "op-1");
    }

    #[test]
    fn ok_json_with_null_error_is_success() {
        assert!(classify_response(S, 200, r#"{"error":null,"data":1}"#).is_ok());
        assert!(classify_response(S, 201, r#"{"error":false}"#).is_ok());
    }

    #[test]
    fn http_400_is_fatal_even_without_marker() {
        let err = classify_response(S, 400, r#"{"error":"missing field"}"#).unwrap_err();
        assert!(matches!(err, AttemptError::Fatal { status: 400, .. }));
    }

    #[test]
    fn http_400_non_json_is_fatal() {
        let err = classify_response(S, 400, "Bad Request").unwrap_err();
        assert!(!err.is_retriable());
    }

    #[test]
    fn rejection_marker_on_other_status_is_fatal() {
        let err = classify_response(
            S,
            403,
            r#"{"error":{"message":"Prompt BLOCKED by Safety filter"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AttemptError::Fatal { status: 403, .. }));
        assert_eq!(err.message(), "Prompt BLOCKED by Safety filter");
    }

    #[test]
    fn rejection_marker_inside_ok_envelope_is_fatal() {
        let err = classify_response(S, 200, r#"{"error":"invalid prompt"}"#).unwrap_err();
        assert!(!err.is_retriable());
    }

    #[test]
    fn transport_marker_wins_over_rejection_marker() {
        let err = classify_response(
            S,
            502,
            r#"{"error":"network error: upstream blocked connection"}"#,
        )
        .unwrap_err();
        assert!(err.is_retriable());
        let err = classify_response(S, 500, r#"{"error":"net::ERR_CONNECTION_CLOSED safety"}"#)
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    fn plain_server_error_is_retriable() {
        let err = classify_response(S, 500, r#"{"error":"internal"}"#).unwrap_err();
        assert!(matches!(err, AttemptError::Upstream { status: 500, .. }));
    }

    #[test]
    fn non_2xx_without_envelope_uses_message_field() {
        let err = classify_response(S, 503, r#"{"message":"try later"}"#).unwrap_err();
        assert_eq!(err.message(), "try later");
    }

    #[test]
    fn ok_non_json_is_retriable() {
        let err = classify_response(S, 200, "<html>gateway page</html>").unwrap_err();
        assert!(matches!(err, AttemptError::Upstream { status: 200, .. }));
        assert!(err.message().contains("non-JSON"));
    }

    #[test]
    fn non_json_with_rejection_word_stays_retriable() {
        let err = classify_response(S, 403, "<h1>Blocked by firewall</h1>").unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    fn synthesized_envelope_truncates_preview() {
        let raw = "x".repeat(500);
        let body = parse_body(502, &raw);
        assert!(body.synthesized);
        let preview = body.json["error"]["preview"].as_str().unwrap();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
        assert_eq!(body.json["error"]["status"], 502);
        assert!(body.json["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("HTTP 502: non-JSON response: "));
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let raw = "é".repeat(150);
        assert_eq!(preview(&raw).chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn envelope_message_shapes() {
        assert_eq!(
            envelope_message(&serde_json::json!({"error": "x"})).as_deref(),
            Some("x")
        );
        assert_eq!(
            envelope_message(&serde_json::json!({"error": {"message": "y", "code": 7}})).as_deref(),
            Some("y")
        );
        assert_eq!(
            envelope_message(&serde_json::json!({"error": {"code": 7}})).as_deref(),
            Some(r#"{"code":7}"#)
        );
        assert_eq!(envelope_message(&serde_json::json!({"data": 1})), None);
        assert_eq!(envelope_message(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn transport_markers() {
        assert!(is_transport_message("TypeError: Failed to fetch"));
        assert!(is_transport_message("fetch failed"));
        assert!(is_transport_message("NetworkError when attempting to fetch resource."));
        assert!(is_transport_message("ERR_NAME_NOT_RESOLVED"));
        assert!(!is_transport_message("err_lowercase is not a transport marker"));
        assert!(!is_transport_message("quota exceeded"));
    }

    #[test]
    fn rejection_markers() {
        assert!(is_rejection_message("blocked: unsafe content"));
        assert!(is_rejection_message("Request failed SAFETY checks"));
        assert!(is_rejection_message("INVALID_PROMPT"));
        assert!(!is_rejection_message("rate limited"));
    }
}

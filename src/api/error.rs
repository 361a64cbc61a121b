//! API error type and the human-readable reasons shown to the user

use serde::Deserialize;

/// Error body the API returns, optionally wrapped in `data`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: Option<String>,
    #[serde(default)]
    pub error_sources: Vec<ErrorSource>,
    pub err: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorSource {
    #[serde(default)]
    pub path: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub status_code: Option<u16>,
}

/// Top-level fields plus whatever sits under `data`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(flatten)]
    outer: ErrorBody,
}

impl ErrorBody {
    /// Decode an error response body. Anything unparseable becomes empty.
    ///
    /// Fields under `data` win; the top level fills whatever they lack.
    pub fn parse(text: &str) -> Self {
        let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(text) else {
            return Self::default();
        };
        match envelope
            .data
            .and_then(|v| serde_json::from_value::<ErrorBody>(v).ok())
        {
            Some(inner) => inner.or(envelope.outer),
            None => envelope.outer,
        }
    }

    fn or(self, other: ErrorBody) -> Self {
        Self {
            message: self
                .message
                .filter(|m| !m.trim().is_empty())
                .or(other.message),
            error_sources: if self.error_sources.is_empty() {
                other.error_sources
            } else {
                self.error_sources
            },
            err: self.err.or(other.err),
        }
    }

    /// Most specific message in the body, if any.
    fn best_message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                self.error_sources
                    .iter()
                    .find_map(|s| s.message.as_deref().filter(|m| !m.trim().is_empty()))
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: u16,
        body: ErrorBody,
    },

    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Auth(String),
}

/// Fallback reasons keyed by status code.
fn status_reason(status: u16) -> Option<&'static str> {
    match status {
        401 => Some("Your session has expired. Please log in again."),
        403 => Some("You don't have permission to do that."),
        404 => Some("The conversation could not be found."),
        500 => Some("Server error. Please try again later."),
        _ => None,
    }
}

const GENERIC_SEND_FAILURE: &str = "Failed to send message. Please try again.";

impl ApiError {
    /// HTTP status, from the response or the status embedded in the body.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, body, .. } => body
                .err
                .as_ref()
                .and_then(|e| e.status_code)
                .or(Some(*status)),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401) || matches!(self, ApiError::Auth(_))
    }

    /// Reason shown to the user when a send fails: the server's message,
    /// else the first error source, else the status table, else a generic line.
    pub fn reason(&self) -> String {
        match self {
            ApiError::Status { body, .. } => body
                .best_message()
                .map(String::from)
                .or_else(|| self.status().and_then(status_reason).map(String::from))
                .unwrap_or_else(|| GENERIC_SEND_FAILURE.to_string()),
            ApiError::Attachment { path, .. } => format!("Could not read attachment {}", path),
            ApiError::Auth(msg) => msg.clone(),
            ApiError::Transport { .. } | ApiError::Decode { .. } => {
                GENERIC_SEND_FAILURE.to_string()
            }
        }
    }

    /// Inline text for a failed load of `what` ("messages", "notifications").
    pub fn load_failure(&self, what: &str) -> String {
        if self.is_unauthorized() {
            format!(
                "Failed to load {}: you are not signed in or your subscription is inactive. \
                 Log in again to continue.",
                what
            )
        } else {
            format!("Failed to load {}.", what)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16, body: &str) -> ApiError {
        ApiError::Status {
            url: "http://x/y".into(),
            status,
            body: ErrorBody::parse(body),
        }
    }

    #[test]
    fn test_structured_message_wins() {
        let err = status_error(
            400,
            r#"{"data":{"message":"Chat is closed","errorSources":[{"message":"ignored"}]}}"#,
        );
        assert_eq!(err.reason(), "Chat is closed");
    }

    #[test]
    fn test_top_level_message_beside_empty_data() {
        let err = status_error(400, r#"{"message":"Chat is closed","data":{}}"#);
        assert_eq!(err.reason(), "Chat is closed");

        let err = status_error(400, r#"{"message":"outer","data":{"message":"inner"}}"#);
        assert_eq!(err.reason(), "inner");

        let err = status_error(400, r#"{"message":"Not allowed","data":null}"#);
        assert_eq!(err.reason(), "Not allowed");
    }

    #[test]
    fn test_first_error_source_used() {
        let err = status_error(
            400,
            r#"{"success":false,"errorSources":[{"path":"image","message":"File too large"}]}"#,
        );
        assert_eq!(err.reason(), "File too large");
    }

    #[test]
    fn test_status_table_fallback() {
        assert_eq!(
            status_error(401, "").reason(),
            "Your session has expired. Please log in again."
        );
        assert_eq!(
            status_error(404, "{}").reason(),
            "The conversation could not be found."
        );
        assert_eq!(
            status_error(500, "<html>").reason(),
            "Server error. Please try again later."
        );
        assert_eq!(status_error(418, "{}").reason(), GENERIC_SEND_FAILURE);
    }

    #[test]
    fn test_status_embedded_in_body() {
        let err = status_error(400, r#"{"data":{"err":{"statusCode":403}}}"#);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.reason(), "You don't have permission to do that.");
    }

    #[test]
    fn test_load_failure_hint_on_401() {
        assert!(status_error(401, "")
            .load_failure("messages")
            .contains("Log in again"));
        assert_eq!(
            status_error(500, "").load_failure("notifications"),
            "Failed to load notifications."
        );
        assert!(ApiError::Auth("no token".into())
            .load_failure("messages")
            .contains("not signed in"));
    }
}

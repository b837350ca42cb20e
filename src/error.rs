//! Error taxonomy for every fetch operation.
//!
//! Three kinds only: caller misuse caught before any request goes out,
//! transport/HTTP/GraphQL failures, and responses whose shape does not match
//! what the resource promises. None of them is recovered locally.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Bad caller input, detected before any network access
    #[error("invalid request: {0}")]
    Validation(String),

    /// Non-success status, GraphQL error payload, or network failure
    #[error("request to {endpoint} failed{}: {message}", status_suffix(.status))]
    Request {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// Response body does not have the expected shape
    #[error("unexpected response from {endpoint}: {message}")]
    Schema { endpoint: String, message: String },
}

/// Coarse error kind, handy for exit codes and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Request,
    Schema,
}

pub type Result<T> = std::result::Result<T, ExplorerError>;

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {}", code),
        None => String::new(),
    }
}

impl ExplorerError {
    pub fn validation(message: impl Into<String>) -> Self {
        ExplorerError::Validation(message.into())
    }

    pub fn request(endpoint: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        ExplorerError::Request {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }

    pub fn schema(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ExplorerError::Schema {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExplorerError::Validation(_) => ErrorKind::Validation,
            ExplorerError::Request { .. } => ErrorKind::Request,
            ExplorerError::Schema { .. } => ErrorKind::Schema,
        }
    }

    /// HTTP status attached to a request failure, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ExplorerError::Request { status, .. } => *status,
            _ => None,
        }
    }
}

/// Map a non-2xx HTTP status to a request error
///
/// The message prefers the server's own explanation when the body follows the
/// OpenSILEX envelope, and falls back to the raw body text.
pub fn classify_status(endpoint: &str, status: u16, body: &[u8]) -> Result<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }

    let text = String::from_utf8_lossy(body);
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|json| envelope_message(&json))
        .unwrap_or_else(|| truncate(text.trim(), 512));

    Err(ExplorerError::request(endpoint, Some(status), message))
}

/// Map a reqwest failure (connect, timeout, body read) to a request error
pub fn classify_transport(endpoint: &str, err: &reqwest::Error) -> ExplorerError {
    let status = err.status().map(|s| s.as_u16());
    let message = if err.is_timeout() {
        format!("timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    ExplorerError::request(endpoint, status, message)
}

/// A top-level GraphQL `errors` array fails the request even alongside HTTP 200
pub fn classify_graphql_errors(endpoint: &str, status: u16, payload: &Value) -> Result<()> {
    let Some(errors) = payload.get("errors") else {
        return Ok(());
    };

    let messages: Vec<String> = match errors {
        Value::Array(items) if items.is_empty() => return Ok(()),
        Value::Array(items) => items
            .iter()
            .map(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string())
            })
            .collect(),
        Value::Null => return Ok(()),
        other => vec![other.to_string()],
    };

    Err(ExplorerError::request(
        endpoint,
        Some(status),
        format!("GraphQL error: {}", messages.join("; ")),
    ))
}

fn envelope_message(json: &Value) -> Option<String> {
    if let Some(msg) = json.pointer("/result/message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    if let Some(msg) = json.pointer("/metadata/status/0/message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    json.get("message").and_then(Value::as_str).map(str::to_string)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

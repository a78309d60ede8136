//! Gateway error taxonomy and classification.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors produced by analysis gateway calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// Network unreachable, or a non-2xx response without a structured body.
    #[error("transport failure{}: {message}", status_suffix(.status))]
    Transport {
        /// HTTP status when a response was received.
        status: Option<u16>,
        /// Transport-level description.
        message: String,
    },
    /// Structured error body returned by the backend.
    #[error("{message}")]
    Server {
        /// HTTP status of the error response.
        status: u16,
        /// Backend-provided message, surfaced verbatim.
        message: String,
        /// Optional backend-provided detail map.
        detail: Option<BTreeMap<String, Value>>,
    },
    /// Request exceeded the configured deadline.
    #[error("request timed out")]
    Timeout,
    /// Successful response whose body did not match the contract.
    #[error("response decode failure: {0}")]
    Decode(String),
    /// Gateway configuration is unusable.
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    /// Message suitable for end users.
    ///
    /// Structured backend messages are passed through unchanged; timeouts get a
    /// message distinct from generic transport failures.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server { message, .. } => message.clone(),
            Self::Timeout => "The analysis service took too long to respond.".to_string(),
            Self::Transport { .. } => "Could not reach the analysis service.".to_string(),
            Self::Decode(_) => "The analysis service returned an unexpected response.".to_string(),
            Self::InvalidConfig(detail) => format!("Client misconfigured: {detail}"),
        }
    }
}

/// Failure class used to decide whether the next poll may recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Condition may clear on its own (network, timeout, 5xx).
    Transient,
    /// Condition will not clear without a different request.
    Permanent,
}

/// Classifies a gateway error.
pub fn classify_gateway_error(error: &GatewayError) -> FailureClass {
    match error {
        GatewayError::Timeout => FailureClass::Transient,
        GatewayError::Transport { status, .. } => match status {
            Some(code) if (400..500).contains(code) && *code != 408 && *code != 429 => {
                FailureClass::Permanent
            }
            _ => FailureClass::Transient,
        },
        GatewayError::Server { status, .. } if *status >= 500 || *status == 429 => {
            FailureClass::Transient
        }
        GatewayError::Server { .. } | GatewayError::Decode(_) | GatewayError::InvalidConfig(_) => {
            FailureClass::Permanent
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    detail: Option<Value>,
}

/// Builds a [`GatewayError`] from a non-2xx response body.
///
/// Recognized shapes are `{"error": "..."}`, `{"message": "..."}` and
/// `{"detail": "..."}`; an object-valued `detail` becomes the detail map and
/// an array-valued one is kept under the `errors` key. Bodies without a
/// usable message yield [`GatewayError::Transport`].
pub fn error_from_body(status: u16, body: &str) -> GatewayError {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return unstructured(status, body);
    };

    let detail_message = parsed.detail.as_ref().and_then(Value::as_str).map(str::to_string);
    let message = string_field(parsed.error.as_ref())
        .or_else(|| string_field(parsed.message.as_ref()))
        .or(detail_message);

    let detail = match parsed.detail {
        Some(Value::Object(map)) => Some(map.into_iter().collect::<BTreeMap<_, _>>()),
        Some(Value::Array(items)) => Some(BTreeMap::from([("errors".to_string(), Value::Array(items))])),
        _ => None,
    };

    match message {
        Some(message) => GatewayError::Server {
            status,
            message,
            detail,
        },
        None if detail.is_some() => GatewayError::Server {
            status,
            message: format!("request rejected with status {status}"),
            detail,
        },
        None => unstructured(status, body),
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (status {code})")).unwrap_or_default()
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn unstructured(status: u16, body: &str) -> GatewayError {
    let snippet: String = body.trim().chars().take(200).collect();
    GatewayError::Transport {
        status: Some(status),
        message: if snippet.is_empty() {
            "empty error body".to_string()
        } else {
            snippet
        },
    }
}

pub(crate) fn from_reqwest(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        return GatewayError::Timeout;
    }
    if error.is_decode() {
        return GatewayError::Decode(error.to_string());
    }
    GatewayError::Transport {
        status: error.status().map(|status| status.as_u16()),
        message: error.to_string(),
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Coarse category of an [`ApiError`], for callers that only branch on the
/// kind of failure (render inline, render per field, go to login).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Detail,
    Validation,
    Auth,
    Unknown,
    Timeout,
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Detail(String),

    #[error("Validation failed: {}", summarize_fields(.0))]
    Validation(BTreeMap<String, String>),

    #[error("Session expired: {0}")]
    Auth(String),

    #[error("{0}")]
    Unknown(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,
}

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Detail(_) => ErrorKind::Detail,
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::Auth(_) => ErrorKind::Auth,
            ApiError::Unknown(_) => ErrorKind::Unknown,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Human-readable message as a page would show it.
    pub fn message(&self) -> String {
        match self {
            ApiError::Detail(message) | ApiError::Unknown(message) => message.clone(),
            ApiError::Validation(_) => "Validation failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Per-field messages, present only for validation failures.
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ApiError::Validation(fields) => Some(fields),
            _ => None,
        }
    }

    /// Whether the server rejected the bearer token as expired or invalid.
    ///
    /// The API does not reliably answer with 401 alone, so this sniffs the
    /// message text. It is the only place that knows the wording.
    pub fn is_token_expired(&self) -> bool {
        let message = match self {
            ApiError::Detail(message) | ApiError::Unknown(message) => message.to_lowercase(),
            _ => return false,
        };
        (message.contains("token") && message.contains("expired"))
            || message.contains("token not valid")
    }

    /// Build an error from a non-success response.
    ///
    /// Bodies are read in this order: a `detail` string, a `message` string,
    /// an `errors` object, any other non-empty object (treated as the field
    /// map itself). Anything else only reports the status code.
    pub fn classify(status: StatusCode, body: &str) -> Self {
        let fallback = || ApiError::Unknown(format!("request failed with status {}", status.as_u16()));

        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
            return fallback();
        };

        if let Some(Value::String(detail)) = object.get("detail") {
            return ApiError::Detail(detail.clone());
        }
        if let Some(Value::String(message)) = object.get("message") {
            return ApiError::Detail(message.clone());
        }
        if let Some(Value::Object(errors)) = object.get("errors") {
            return ApiError::Validation(field_messages(errors));
        }
        if !object.is_empty() {
            return ApiError::Validation(field_messages(&object));
        }
        fallback()
    }

    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }
}

fn field_messages(object: &serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    object
        .iter()
        .map(|(field, value)| (field.clone(), flatten_message(value)))
        .collect()
}

/// DRF reports most field errors as lists of strings.
fn flatten_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_message)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

fn summarize_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{}: {}", field, message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_detail() {
        let err = ApiError::classify(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": "Given token not valid for any token type", "code": "token_not_valid"}"#,
        );
        assert_eq!(err, ApiError::Detail("Given token not valid for any token type".to_string()));
        assert_eq!(err.kind(), ErrorKind::Detail);
    }

    #[test]
    fn test_classify_message_field() {
        let err = ApiError::classify(StatusCode::BAD_REQUEST, r#"{"message": "Invalid or expired refresh token", "error": "x"}"#);
        assert_eq!(err, ApiError::Detail("Invalid or expired refresh token".to_string()));
    }

    #[test]
    fn test_classify_errors_map() {
        let err = ApiError::classify(StatusCode::BAD_REQUEST, r#"{"errors": {"title": "required"}}"#);
        let fields = err.fields().expect("validation fields");
        assert_eq!(fields.get("title").map(String::as_str), Some("required"));
        assert_eq!(err.message(), "Validation failed");
    }

    #[test]
    fn test_classify_bare_field_object() {
        // Login failures and DRF serializer errors come back as plain objects
        let err = ApiError::classify(
            StatusCode::BAD_REQUEST,
            r#"{"email": ["This field is required.", "Enter a valid email."], "error": "Invalid credentials"}"#,
        );
        let fields = err.fields().expect("validation fields");
        assert_eq!(fields["email"], "This field is required. Enter a valid email.");
        assert_eq!(fields["error"], "Invalid credentials");
    }

    #[test]
    fn test_classify_unknown() {
        let err = ApiError::classify(StatusCode::BAD_GATEWAY, "<html>Bad Gateway</html>");
        assert_eq!(err, ApiError::Unknown("request failed with status 502".to_string()));

        let err = ApiError::classify(StatusCode::INTERNAL_SERVER_ERROR, "{}");
        assert_eq!(err.kind(), ErrorKind::Unknown);

        let err = ApiError::classify(StatusCode::NOT_FOUND, "[1, 2]");
        assert_eq!(err.message(), "request failed with status 404");
    }

    #[test]
    fn test_is_token_expired() {
        assert!(ApiError::Detail("Given token not valid for any token type".into()).is_token_expired());
        assert!(ApiError::Detail("Token is invalid or expired".into()).is_token_expired());
        assert!(ApiError::Detail("TOKEN HAS EXPIRED".into()).is_token_expired());

        assert!(!ApiError::Detail("Authentication credentials were not provided.".into()).is_token_expired());
        assert!(!ApiError::Detail("Your subscription has expired".into()).is_token_expired());
        assert!(!ApiError::Network("token expired".into()).is_token_expired());

        let mut fields = BTreeMap::new();
        fields.insert("token".to_string(), "expired".to_string());
        assert!(!ApiError::Validation(fields).is_token_expired());
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(ApiError::truncate_body(short), short);

        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }
}

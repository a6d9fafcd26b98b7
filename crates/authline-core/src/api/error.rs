use thiserror::Error;

use super::Reply;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        reply: Reply,
    },

    #[error("Invalid response: {message}")]
    Parse { status: u16, message: String },

    #[error("Client not configured: {0}")]
    Configuration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
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

    /// Classify a non-2xx reply.
    ///
    /// The server's `{"error": "..."}` field is used verbatim when present,
    /// otherwise the message is built from the status line.
    pub fn from_reply(reply: Reply) -> Self {
        let status = reply.status();
        let message = match reply.error_field() {
            Some(message) => message,
            None => match status.canonical_reason() {
                Some(reason) => format!("HTTP {}: {}", status.as_u16(), reason),
                None => format!("HTTP {}", status.as_u16()),
            },
        };
        ApiError::Http {
            status: status.as_u16(),
            message,
            reply,
        }
    }

    pub(crate) fn parse(status: u16, message: impl Into<String>) -> Self {
        ApiError::Parse {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of the failed exchange, 0 when no response was obtained
    pub fn http_status(&self) -> u16 {
        match self {
            ApiError::Http { status, .. } | ApiError::Parse { status, .. } => *status,
            _ => 0,
        }
    }

    /// Raw response for inspection, if one was received
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            ApiError::Http { reply, .. } => Some(reply),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ApiError::InvalidUrl(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_reply_uses_error_field() {
        let reply = Reply::from_parts(
            StatusCode::UNAUTHORIZED,
            Default::default(),
            br#"{"error": "Invalid username or password"}"#.to_vec(),
        );
        let err = ApiError::from_reply(reply);
        assert_eq!(err.to_string(), "Invalid username or password");
        assert_eq!(err.http_status(), 401);
        assert!(err.reply().is_some());
    }

    #[test]
    fn test_from_reply_falls_back_to_status_line() {
        let reply = Reply::from_parts(StatusCode::SERVICE_UNAVAILABLE, Default::default(), b"oops".to_vec());
        assert_eq!(ApiError::from_reply(reply).to_string(), "HTTP 503: Service Unavailable");

        // JSON without an error string is not a message source
        let reply = Reply::from_parts(StatusCode::BAD_REQUEST, Default::default(), br#"{"error": 42}"#.to_vec());
        assert_eq!(ApiError::from_reply(reply).to_string(), "HTTP 400: Bad Request");
    }

    #[test]
    fn test_status_is_zero_without_response() {
        assert_eq!(ApiError::Transport("connection refused".into()).http_status(), 0);
        assert_eq!(ApiError::InvalidUrl("::".into()).http_status(), 0);
        assert!(ApiError::Transport("timeout".into()).is_transport());
        assert!(ApiError::Cancelled.reply().is_none());
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(ApiError::truncate_body("short"), "short");
        let long = "x".repeat(600);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }
}

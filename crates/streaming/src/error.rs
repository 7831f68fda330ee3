use std::time::Duration;

use thiserror::Error;

/// User-facing classification of a failed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient server-side failure (the local source's injected errors).
    Api,
    /// Transport failure: timeout, refused connection, DNS, gateway errors.
    Network,
    /// The payload had an unexpected shape.
    Validation,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Api | ErrorKind::Network)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Api => "Server is temporarily unavailable, retrying...",
            ErrorKind::Network => "Network problem, please check your connection.",
            ErrorKind::Validation => "Received invalid data, please reload the page.",
            ErrorKind::Unknown => "An unexpected error occurred.",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("simulated server failure ({region})")]
    Simulated { region: String },
    #[error("request timed out after {} ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Simulated { .. } => ErrorKind::Api,
            LoadError::Timeout { .. } | LoadError::Network(_) => ErrorKind::Network,
            LoadError::Http { status, .. } => match status {
                408 | 429 | 500..=599 => ErrorKind::Network,
                _ => ErrorKind::Unknown,
            },
            LoadError::InvalidPayload(_) => ErrorKind::Validation,
            LoadError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    /// Maps a transport error, using `timeout` for the message when the
    /// request was aborted by its deadline.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            LoadError::Timeout { after: timeout }
        } else if err.is_decode() {
            LoadError::InvalidPayload(err.to_string())
        } else if let Some(status) = err.status() {
            LoadError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            }
        } else {
            LoadError::Network(with_causes(&err))
        }
    }
}

/// Joins an error with its source chain, skipping causes already quoted by
/// the message above them.
fn with_causes(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, LoadError, with_causes};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("error sending request")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn classifies_into_four_kinds() {
        let simulated = LoadError::Simulated {
            region: "Praha a okolí".into(),
        };
        assert_eq!(simulated.kind(), ErrorKind::Api);
        assert!(simulated.is_retryable());

        let timeout = LoadError::Timeout {
            after: Duration::from_secs(12),
        };
        assert_eq!(timeout.kind(), ErrorKind::Network);
        assert_eq!(timeout.to_string(), "request timed out after 12000 ms");

        assert_eq!(LoadError::Network("refused".into()).kind(), ErrorKind::Network);
        assert_eq!(
            LoadError::InvalidPayload("not an array".into()).kind(),
            ErrorKind::Validation
        );
        assert!(!LoadError::Unknown("?".into()).is_retryable());
    }

    #[test]
    fn http_status_decides_retryability() {
        let http = |status| LoadError::Http {
            status,
            reason: String::new(),
        };
        assert!(http(502).is_retryable());
        assert!(http(408).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(404).is_retryable());
        assert_eq!(http(403).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn user_messages_never_expose_details() {
        let err = LoadError::Network("dns lookup failed for internal-host".into());
        assert!(!err.user_message().contains("internal-host"));
    }

    #[test]
    fn network_messages_keep_the_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused");
        assert_eq!(
            with_causes(&Outer(io)),
            "error sending request: Connection refused"
        );
    }
}

use thiserror::Error;

/// Upstream API failure, classified for the retry loop.
///
/// `Transient` covers 429, 5xx and transport-level failures and is retried up
/// to the configured attempt limit. `Fatal` covers the remaining 4xx range and
/// is surfaced immediately, carrying the response body for diagnostics.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transient upstream error (HTTP {status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    #[error("fatal upstream error (HTTP {status}): {body}")]
    Fatal { status: u16, body: String },
}

impl UpstreamError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn fatal(status: u16, body: impl Into<String>) -> Self {
        Self::Fatal {
            status,
            body: body.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the error body carries the given platform error code.
    ///
    /// Used to spot the "unsupported field/breakdown combination" rejection
    /// (code 11001) that triggers the reduced-field stats fallback.
    pub fn has_code(&self, code: &str) -> bool {
        match self {
            Self::Fatal { body, .. } => body.contains(code),
            Self::Transient { message, .. } => message.contains(code),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(UpstreamError::transient(Some(429), "rate limited").is_transient());
        assert!(UpstreamError::transient(None, "connection reset").is_transient());
        assert!(!UpstreamError::fatal(400, "bad request").is_transient());
    }

    #[test]
    fn code_hint_in_fatal_body() {
        let err = UpstreamError::fatal(400, r#"{"code":11001,"title":"not supported"}"#);
        assert!(err.has_code("11001"));
        assert!(!err.has_code("11002"));
    }
}

use crate::errors::AdapterError;
use thiserror::Error;

/// Failure reported by a provider, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider did not answer in time.
    #[error("provider timed out after {timeout_ms}ms")]
    Timeout {
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// The connection failed or the worker died.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider answered with an HTTP error status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or summary.
        body: String,
    },

    /// The provider refused the request (safety filter, policy).
    #[error("refused: {0}")]
    Refused(String),

    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Maps the failure onto the adapter error taxonomy.
    ///
    /// 429 and 5xx statuses are transient; other 4xx statuses are
    /// rejections.
    #[must_use]
    pub fn classify(self) -> AdapterError {
        match self {
            Self::Timeout { timeout_ms } => AdapterError::Timeout { timeout_ms },
            Self::Transport(msg) => AdapterError::transient(msg),
            Self::Http { status, body } if status == 429 || status >= 500 => {
                AdapterError::transient(format!("HTTP {status}: {body}"))
            }
            Self::Http { status, body } => AdapterError::rejected(format!("HTTP {status}: {body}")),
            Self::Refused(reason) => AdapterError::rejected(reason),
            Self::Malformed(msg) => AdapterError::transient(format!("malformed response: {msg}")),
        }
    }
}

impl From<ProviderError> for AdapterError {
    fn from(err: ProviderError) -> Self {
        err.classify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn http(status: u16) -> ProviderError {
        ProviderError::Http {
            status,
            body: "x".to_string(),
        }
    }

    #[test]
    fn test_classification() {
        let cases = [
            (ProviderError::Timeout { timeout_ms: 5 }, ErrorKind::AdapterTimeout),
            (ProviderError::Transport("reset".into()), ErrorKind::TransientService),
            (http(429), ErrorKind::TransientService),
            (http(503), ErrorKind::TransientService),
            (http(400), ErrorKind::AdapterRejected),
            (http(404), ErrorKind::AdapterRejected),
            (ProviderError::Refused("nsfw".into()), ErrorKind::AdapterRejected),
            (ProviderError::Malformed("eof".into()), ErrorKind::TransientService),
        ];
        for (err, kind) in cases {
            assert_eq!(err.classify().kind(), kind);
        }
    }
}

use thiserror::Error;

/// Problems with the form input itself. Shown inline under the picker and
/// never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Image is required")]
    MissingImage,
    #[error("Unsupported file format ({mime}); use JPEG, PNG or WebP")]
    UnsupportedType { mime: String },
    #[error("No API key configured")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not read {file_name}: {reason}")]
pub struct ReadError {
    pub file_name: String,
    pub reason: String,
}

/// Failure of a single HTTP exchange with the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether repeating the same request can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            TransportError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task creation failed: {0}")]
pub struct SubmissionError(pub TransportError);

impl SubmissionError {
    pub fn is_retryable(&self) -> bool {
        self.0.is_retryable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("status request failed: {0}")]
pub struct PollError(pub TransportError);

impl PollError {
    pub fn is_retryable(&self) -> bool {
        self.0.is_retryable()
    }
}

/// The service finished the task without producing a model. This is a
/// business outcome, not a transport error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generation {status}: {message}")]
pub struct RemoteFailure {
    pub status: String,
    pub message: String,
}

/// Why a generation session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Remote(#[from] RemoteFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let http = |status| TransportError::Http { status, body: String::new() };
        assert!(http(429).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(408).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn submission_error_keeps_status_and_body() {
        let err = SubmissionError(TransportError::Http { status: 402, body: "no credits".into() });
        assert_eq!(err.0.status(), Some(402));
        assert_eq!(err.to_string(), "task creation failed: HTTP 402: no credits");
    }
}

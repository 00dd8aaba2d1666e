//! LLM error types

use thiserror::Error;

/// A single failed attempt against the completion backend, with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Quota, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Cause used for logging and user-facing notices.
    ///
    /// Unclassified errors are still checked for "rate limit" / "quota" in the
    /// message, since proxies and SDK layers often bury the real status there.
    pub fn cause(&self) -> ErrorCause {
        match self.kind {
            LlmErrorKind::RateLimit => ErrorCause::RateLimit,
            LlmErrorKind::Quota => ErrorCause::Quota,
            _ => {
                let lower = self.message.to_lowercase();
                if lower.contains("rate limit") {
                    ErrorCause::RateLimit
                } else if lower.contains("quota") {
                    ErrorCause::Quota
                } else {
                    ErrorCause::Generic
                }
            }
        }
    }
}

/// Error classification from the transport and HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connection failures, dropped bodies
    Network,
    /// Call setup exceeded its deadline
    Timeout,
    /// Rate limited (429)
    RateLimit,
    /// Billing quota exhausted (429 `insufficient_quota`)
    Quota,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// Unknown error
    Unknown,
}

/// Coarse cause of a failure as surfaced to the user.
///
/// Only changes the wording of notices; every setup failure is retried the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    RateLimit,
    Quota,
    Generic,
}

impl ErrorCause {
    pub fn is_rate_limited(self) -> bool {
        matches!(self, Self::RateLimit | Self::Quota)
    }
}

/// Terminal failure of a completion call, as seen by the caller of `complete`
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Every attempt at opening the stream failed
    #[error("failed after {attempts} attempts: {source}. Please try again later")]
    Exhausted {
        attempts: u32,
        #[source]
        source: LlmError,
    },
    /// The stream broke after fragments had started arriving
    #[error("response stream interrupted: {0}")]
    StreamInterrupted(#[source] LlmError),
}

impl CompletionError {
    /// The backend error behind this failure
    pub fn llm_error(&self) -> &LlmError {
        match self {
            Self::Exhausted { source, .. } | Self::StreamInterrupted(source) => source,
        }
    }
}

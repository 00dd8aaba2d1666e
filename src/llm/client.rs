//! Retrying completion client
//!
//! Retries cover only opening the stream. Once fragments flow, failures pass
//! straight through to the consumer.

use super::retry::{RetryDecision, RetryPolicy};
use super::{CompletionBackend, CompletionError, CompletionRequest, ErrorCause, LlmError};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Fragments of one response; a mid-stream failure surfaces as
/// [`CompletionError::StreamInterrupted`] and ends the sequence.
pub type Fragments = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Structured notifications emitted while establishing a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// An attempt failed and another will follow after `delay`
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        cause: ErrorCause,
        message: String,
    },
    /// The last attempt failed; the turn is over
    Exhausted { attempts: u32, message: String },
}

impl ClientEvent {
    /// Text to show the user
    pub fn notice(&self) -> String {
        match self {
            ClientEvent::Retrying {
                delay,
                cause,
                message,
                ..
            } => {
                let reason = if cause.is_rate_limited() {
                    "You've reached the API rate limit. The app will automatically retry.".to_string()
                } else {
                    format!("Error: {message}")
                };
                format!("{reason}\nAPI error. Retrying in {} seconds...", delay.as_secs())
            }
            ClientEvent::Exhausted { message, .. } => format!(
                "Failed after multiple retries: {message}\nPlease try again later or contact support."
            ),
        }
    }
}

/// Wraps a backend with bounded retry and event emission
pub struct CompletionClient<B> {
    backend: B,
    policy: RetryPolicy,
    events: broadcast::Sender<ClientEvent>,
}

impl<B: CompletionBackend> CompletionClient<B> {
    pub fn new(backend: B) -> Self {
        Self::with_policy(backend, RetryPolicy::default())
    }

    pub fn with_policy(backend: B, policy: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            policy,
            events,
        }
    }

    /// Receive retry and exhaustion events for every subsequent call
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Open a fragment stream for `request`, retrying setup failures per policy
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Fragments, CompletionError> {
        let mut attempt = 1;
        loop {
            match self.attempt(attempt, request).await {
                Ok(fragments) => return Ok(fragments),
                Err(error) => {
                    log_failure(attempt, request, &error);

                    match self.policy.decide(attempt, &error) {
                        RetryDecision::Retry { next_attempt, delay } => {
                            // No subscribers is fine
                            let _ = self.events.send(ClientEvent::Retrying {
                                attempt,
                                max_attempts: self.policy.max_attempts,
                                delay,
                                cause: error.cause(),
                                message: error.message.clone(),
                            });
                            tokio::time::sleep(delay).await;
                            attempt = next_attempt;
                        }
                        RetryDecision::GiveUp => {
                            tracing::error!(
                                model = %request.model,
                                attempts = attempt,
                                error = %error,
                                "Completion failed after retries"
                            );
                            let _ = self.events.send(ClientEvent::Exhausted {
                                attempts: attempt,
                                message: error.message.clone(),
                            });
                            return Err(CompletionError::Exhausted {
                                attempts: attempt,
                                source: error,
                            });
                        }
                    }
                }
            }
        }
    }

    /// One attempt at opening the stream
    async fn attempt(&self, attempt: u32, request: &CompletionRequest) -> Result<Fragments, LlmError> {
        tracing::debug!(model = %request.model, attempt, "Opening completion stream");
        let stream = self.backend.open_stream(request).await?;
        Ok(Box::pin(stream.map(|item| item.map_err(CompletionError::StreamInterrupted))))
    }

    /// Binary connectivity check against the backend
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.backend.health_check().await
    }
}

fn log_failure(attempt: u32, request: &CompletionRequest, error: &LlmError) {
    if error.cause().is_rate_limited() {
        tracing::error!(
            model = %request.model,
            attempt,
            kind = ?error.kind,
            error = %error,
            "Rate limit error"
        );
    } else {
        tracing::error!(
            model = %request.model,
            attempt,
            kind = ?error.kind,
            error = %error,
            "API error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockBackend;
    use crate::llm::{LlmErrorKind, Message};
    use std::sync::Arc;

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user("Hi")],
            model: model.to_string(),
        }
    }

    async fn drain(mut fragments: Fragments) -> Result<String, CompletionError> {
        let mut text = String::new();
        while let Some(fragment) = fragments.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_first_failure() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_error(LlmError::network("connection reset"));
        backend.queue_fragments(&["Hi", " there"]);

        let client = CompletionClient::new(backend.clone());
        let mut events = client.subscribe();

        let fragments = client.complete(&request("gpt-4o-mini")).await.unwrap();
        assert_eq!(drain(fragments).await.unwrap(), "Hi there");

        let calls = backend.call_times();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(2));

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            ClientEvent::Retrying {
                attempt: 1,
                max_attempts: 2,
                delay: Duration::from_secs(2),
                cause: ErrorCause::Generic,
                message: "connection reset".to_string(),
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_two_attempts() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_error(LlmError::rate_limit("Rate limit exceeded"));
        backend.queue_error(LlmError::server_error("Server error: overloaded"));

        let client = CompletionClient::new(backend.clone());
        let mut events = client.subscribe();

        let err = client.complete(&request("gpt-4o-mini")).await.err().unwrap();
        match &err {
            CompletionError::Exhausted { attempts, source } => {
                assert_eq!(*attempts, 2);
                assert_eq!(source.kind, LlmErrorKind::ServerError);
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
        assert_eq!(backend.recorded_requests().len(), 2);

        let first = events.try_recv().unwrap();
        assert!(matches!(
            first,
            ClientEvent::Retrying {
                cause: ErrorCause::RateLimit,
                ..
            }
        ));
        assert!(first.notice().contains("rate limit"));

        let second = events.try_recv().unwrap();
        assert_eq!(
            second,
            ClientEvent::Exhausted {
                attempts: 2,
                message: "Server error: overloaded".to_string(),
            }
        );
        assert!(second.notice().starts_with("Failed after multiple retries"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_stream_failure_is_not_retried() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_interrupted(&["Hel"], LlmError::network("Stream error: reset"));
        backend.queue_fragments(&["never used"]);

        let client = CompletionClient::new(backend.clone());
        let fragments = client.complete(&request("gpt-4o-mini")).await.unwrap();

        let err = drain(fragments).await.unwrap_err();
        assert!(matches!(err, CompletionError::StreamInterrupted(_)));
        assert_eq!(backend.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_request_is_forwarded_unchanged() {
        let backend = Arc::new(MockBackend::new());
        backend.queue_fragments(&["ok"]);

        let client = CompletionClient::new(backend.clone());
        let sent = CompletionRequest {
            messages: vec![Message::user("a"), Message::assistant("b"), Message::user("c")],
            model: "gpt-4-turbo".to_string(),
        };
        let _ = client.complete(&sent).await.unwrap();

        assert_eq!(backend.recorded_requests(), vec![sent]);
    }

    #[tokio::test]
    async fn test_health_check_passes_through() {
        let backend = Arc::new(MockBackend::new());
        let client = CompletionClient::new(backend.clone());
        assert!(client.health_check().await.is_ok());

        backend.fail_health_check(LlmError::auth("Authentication failed: bad key"));
        let err = client.health_check().await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Auth);
    }

    #[test]
    fn test_retry_notice_wording() {
        let event = ClientEvent::Retrying {
            attempt: 1,
            max_attempts: 2,
            delay: Duration::from_secs(2),
            cause: ErrorCause::Generic,
            message: "boom".to_string(),
        };
        assert_eq!(
            event.notice(),
            "Error: boom\nAPI error. Retrying in 2 seconds..."
        );

        let rate_limited = ClientEvent::Retrying {
            attempt: 1,
            max_attempts: 2,
            delay: Duration::from_secs(2),
            cause: ErrorCause::RateLimit,
            message: "Rate limit exceeded: slow down".to_string(),
        };
        assert_eq!(
            rate_limited.notice(),
            "You've reached the API rate limit. The app will automatically retry.\nAPI error. Retrying in 2 seconds..."
        );
    }
}

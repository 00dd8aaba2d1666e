//! `OpenAI`-compatible streaming chat completions

use super::types::{CompletionRequest, FragmentStream, Message};
use super::{CompletionBackend, LlmError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DONE_SENTINEL: &str = "[DONE]";

/// Backend speaking the `/chat/completions` protocol with `stream: true`
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    base_url: String,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl OpenAIBackend {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        // No overall timeout on the client: it would cut off long streams.
        // Setup is bounded by `request_timeout`, the stream by the idle timeout.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        })
    }

    /// Longest silence allowed between two events once the stream is open
    #[must_use]
    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle_timeout = idle;
        self
    }

    fn translate_request(request: &CompletionRequest) -> ChatCompletionRequest<'_> {
        ChatCompletionRequest {
            model: &request.model,
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            stream: true,
        }
    }

    /// Run `setup` under the request deadline, error bodies included
    async fn within_deadline<T>(
        &self,
        setup: impl Future<Output = Result<T, LlmError>>,
    ) -> Result<T, LlmError> {
        tokio::time::timeout(self.request_timeout, setup)
            .await
            .map_err(|_| LlmError::timeout(format!("No response within {:?}", self.request_timeout)))?
    }
}

#[async_trait]
impl CompletionBackend for OpenAIBackend {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::translate_request(request));

        let mut events = EventSource::new(builder)
            .map_err(|e| LlmError::unknown(format!("Failed to build request: {e}")))?;
        // Retrying is the client's job, and only before the stream opens
        events.set_retry_policy(Box::new(Never));

        self.within_deadline(async {
            match events.next().await {
                Some(Ok(Event::Open)) => Ok(()),
                Some(Ok(Event::Message(_))) => {
                    Err(LlmError::unknown("Stream produced data before opening"))
                }
                Some(Err(e)) => Err(setup_error(e).await),
                None => Err(LlmError::network("Connection closed before the response started")),
            }
        })
        .await?;

        let items = events.filter_map(|item| futures::future::ready(sse_item(item)));
        Ok(fragment_stream(Box::pin(items), self.stream_idle_timeout))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/models", self.base_url);
        self.within_deadline(async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(map_transport_error)?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(error_from_response(response).await)
            }
        })
        .await
    }
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::timeout(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        LlmError::network(format!("Connection failed: {e}"))
    } else {
        LlmError::unknown(format!("Request failed: {e}"))
    }
}

/// Classify a failure that happened before the first event
async fn setup_error(error: reqwest_eventsource::Error) -> LlmError {
    use reqwest_eventsource::Error;

    match error {
        Error::InvalidStatusCode(_, response) => error_from_response(response).await,
        Error::Transport(e) => map_transport_error(e),
        Error::InvalidContentType(content_type, _) => LlmError::unknown(format!(
            "Unexpected content type: {}",
            content_type.to_str().unwrap_or("<binary>")
        )),
        other => LlmError::network(format!("Stream error: {other}")),
    }
}

async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    match response.text().await {
        Ok(body) => classify_status(status, &body),
        Err(e) => LlmError::network(format!("Failed to read response: {e}")),
    }
}

/// Map a non-success HTTP status plus its body to a classified error
fn classify_status(status: u16, body: &str) -> LlmError {
    let parsed = serde_json::from_str::<OpenAIErrorResponse>(body).ok();
    let is_quota = parsed.as_ref().is_some_and(|r| r.error.is_quota());
    let message = parsed.map_or_else(|| body.trim().to_string(), |r| r.error.message);

    match status {
        401 | 403 => LlmError::auth(format!("Authentication failed: {message}")),
        429 if is_quota || message.to_lowercase().contains("quota") => {
            LlmError::quota(format!("Quota exceeded: {message}"))
        }
        429 => LlmError::rate_limit(format!("Rate limit exceeded: {message}")),
        400 => LlmError::invalid_request(format!("Invalid request: {message}")),
        500..=599 => LlmError::server_error(format!("Server error: {message}")),
        _ => LlmError::unknown(format!("HTTP {status}: {message}")),
    }
}

/// One item of an open event stream, with `Open` already consumed
#[derive(Debug)]
enum SseItem {
    Data(String),
    /// Body ended; whether that was a clean finish depends on what came before
    Ended,
    Failed(String),
}

fn sse_item(item: Result<Event, reqwest_eventsource::Error>) -> Option<SseItem> {
    match item {
        Ok(Event::Open) => None,
        Ok(Event::Message(message)) => Some(SseItem::Data(message.data)),
        Err(reqwest_eventsource::Error::StreamEnded) => Some(SseItem::Ended),
        Err(e) => Some(SseItem::Failed(e.to_string())),
    }
}

/// Turn SSE events into text fragments.
///
/// The stream ends cleanly only on `[DONE]` or a chunk carrying a
/// `finish_reason`; a body that stops before either, or stays silent for
/// longer than `idle_timeout`, is an interruption.
fn fragment_stream<S>(events: S, idle_timeout: Duration) -> FragmentStream
where
    S: Stream<Item = SseItem> + Send + Unpin + 'static,
{
    let state = StreamState {
        events,
        idle_timeout,
        ready: VecDeque::new(),
        finished: false,
        closed: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((item, st));
            }
            if st.closed {
                return None;
            }

            let next = tokio::time::timeout(st.idle_timeout, st.events.next()).await;
            if st.finished && !matches!(next, Ok(Some(SseItem::Data(_)))) {
                // Response already complete; whatever happens to the body now is moot
                st.closed = true;
                continue;
            }

            match next {
                Ok(Some(SseItem::Data(data))) => st.handle_event(&data),
                Ok(Some(SseItem::Failed(message))) => {
                    st.fail(LlmError::network(format!("Stream error: {message}")));
                }
                Ok(Some(SseItem::Ended) | None) => {
                    st.fail(LlmError::network("Stream ended before completion"));
                }
                Err(_) => st.fail(LlmError::timeout(format!(
                    "No data for {:?}; stream abandoned",
                    st.idle_timeout
                ))),
            }
        }
    }))
}

struct StreamState<S> {
    events: S,
    idle_timeout: Duration,
    ready: VecDeque<Result<String, LlmError>>,
    /// Backend signalled the end of the response
    finished: bool,
    /// No further items will be produced beyond `ready`
    closed: bool,
}

impl<S> StreamState<S> {
    fn handle_event(&mut self, data: &str) {
        if self.closed {
            return;
        }
        if data.trim() == DONE_SENTINEL {
            self.finished = true;
            self.closed = true;
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.fail(LlmError::unknown(format!("Failed to parse chunk: {e} - data: {data}")));
                return;
            }
        };

        if let Some(error) = chunk.error {
            self.fail(LlmError::server_error(format!("Backend error mid-stream: {}", error.message)));
            return;
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.ready.push_back(Ok(text));
            }
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
        }
    }

    fn fail(&mut self, error: LlmError) {
        self.ready.push_back(Err(error));
        self.closed = true;
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for OpenAIMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[serde(default)]
    r#type: Option<String>,
    /// String for `OpenAI`, sometimes a number for compatible servers
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl OpenAIError {
    fn is_quota(&self) -> bool {
        let code_is_quota = self
            .code
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .is_some_and(|c| c == "insufficient_quota");
        code_is_quota || self.r#type.as_deref() == Some("insufficient_quota")
    }
}

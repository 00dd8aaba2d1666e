//! Mock implementations for testing
//!
//! These mocks enable testing the client and session without real I/O.

use super::{CompletionBackend, CompletionRequest, FragmentStream, LlmError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Instant;

// ============================================================================
// Mock Backend
// ============================================================================

/// Outcome of one `open_stream` call
enum MockOutcome {
    /// Setup fails before any fragment
    Fail(LlmError),
    /// Stream yields these items in order
    Stream(Vec<Result<String, LlmError>>),
}

/// Mock backend that replays queued outcomes
pub struct MockBackend {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    /// Record of all requests made, with the (virtual) time of each call
    requests: Mutex<Vec<(CompletionRequest, Instant)>>,
    health: Mutex<Option<LlmError>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            health: Mutex::new(None),
        }
    }

    /// Queue a successful stream of fragments
    pub fn queue_fragments(&self, fragments: &[&str]) {
        let items = fragments.iter().map(|f| Ok((*f).to_string())).collect();
        self.outcomes.lock().unwrap().push_back(MockOutcome::Stream(items));
    }

    /// Queue a setup failure
    pub fn queue_error(&self, error: LlmError) {
        self.outcomes.lock().unwrap().push_back(MockOutcome::Fail(error));
    }

    /// Queue a stream that breaks after some fragments
    pub fn queue_interrupted(&self, fragments: &[&str], error: LlmError) {
        let mut items: Vec<_> = fragments.iter().map(|f| Ok((*f).to_string())).collect();
        items.push(Err(error));
        self.outcomes.lock().unwrap().push_back(MockOutcome::Stream(items));
    }

    /// Make every subsequent health check fail
    pub fn fail_health_check(&self, error: LlmError) {
        *self.health.lock().unwrap() = Some(error);
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// Times at which `open_stream` was invoked
    pub fn call_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockOutcome::Fail(LlmError::network("No mock response queued")));

        match outcome {
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Stream(items) => Ok(Box::pin(futures::stream::iter(items))),
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        match self.health.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// One-shot HTTP server
// ============================================================================

/// Serve a single canned HTTP response on a local port.
///
/// Returns the base URL (ending in `/v1`) and a receiver for the raw request
/// text, headers and body included.
pub async fn serve_once(response: String) -> (String, oneshot::Receiver<String>) {
    serve(response, false).await
}

/// Like [`serve_once`], but the connection stays open and silent after
/// `response` is written, until the client hangs up.
pub async fn serve_and_stall(response: String) -> (String, oneshot::Receiver<String>) {
    serve(response, true).await
}

async fn serve(response: String, stall: bool) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let raw = read_request(&mut socket).await;
        let _ = tx.send(raw);
        socket.write_all(response.as_bytes()).await.unwrap();

        if stall {
            socket.flush().await.unwrap();
            // Returns once the client drops the connection
            let mut sink = [0u8; 1024];
            while matches!(socket.read(&mut sink).await, Ok(n) if n > 0) {}
        } else {
            socket.shutdown().await.unwrap();
        }
    });

    (format!("http://{addr}/v1"), rx)
}

/// Read headers, then as many body bytes as `Content-Length` announces
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(end) = find_header_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }

        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

//! Completion backend abstraction
//!
//! A backend makes a single attempt at opening a fragment stream; retrying
//! lives in [`CompletionClient`].

mod client;
mod config;
mod error;
mod models;
mod openai;
mod retry;
mod types;

#[cfg(test)]
pub mod testing;

pub use client::{ClientEvent, CompletionClient, Fragments};
pub use config::{ConfigError, LlmConfig, DEFAULT_BASE_URL};
pub use error::{CompletionError, ErrorCause, LlmError, LlmErrorKind};
pub use models::{all_models, find_model, ModelDef, DEFAULT_MODEL};
pub use openai::OpenAIBackend;
pub use retry::{RetryDecision, RetryPolicy};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for completion backends
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Open a response stream for `request`.
    ///
    /// Errors returned here happen before any fragment was produced and are
    /// eligible for retry; errors inside the stream are not.
    async fn open_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError>;

    /// Cheap connectivity probe (model listing); no data is consumed
    async fn health_check(&self) -> Result<(), LlmError>;
}

#[async_trait]
impl<T: CompletionBackend + ?Sized> CompletionBackend for Arc<T> {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        (**self).open_stream(request).await
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        (**self).health_check().await
    }
}

/// Logging wrapper for completion backends
pub struct LoggingBackend<B> {
    inner: B,
}

impl<B: CompletionBackend> LoggingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: CompletionBackend> CompletionBackend for LoggingBackend<B> {
    async fn open_stream(&self, request: &CompletionRequest) -> Result<FragmentStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.open_stream(request).await;

        // Failures are logged once, with their cause, by `CompletionClient`
        if result.is_ok() {
            tracing::info!(
                model = %request.model,
                messages = request.messages.len(),
                duration_ms = %start.elapsed().as_millis(),
                "Completion stream opened"
            );
        }

        result
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let result = self.inner.health_check().await;
        match &result {
            Ok(()) => tracing::info!("Health check succeeded"),
            Err(e) => tracing::warn!(kind = ?e.kind, error = %e.message, "Health check failed"),
        }
        result
    }
}

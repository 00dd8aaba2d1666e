//! In-memory conversation state for one session
//!
//! The transcript only ever grows, and only with confirmed messages: a user
//! submission, or an assistant response whose stream completed.

use crate::llm::{CompletionRequest, Message, Role, DEFAULT_MODEL};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ordered transcript plus the model used for the next call.
///
/// Safe to share between tasks; every read is a point-in-time copy.
#[derive(Debug)]
pub struct ConversationStore {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    transcript: Vec<Message>,
    selected_model: String,
}

impl ConversationStore {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                transcript: Vec::new(),
                selected_model: model.into(),
            }),
        }
    }

    /// Add one message at the end. Empty content is allowed.
    pub fn append(&self, role: Role, content: impl Into<String>) {
        self.write().transcript.push(Message {
            role,
            content: content.into(),
        });
    }

    /// Ordered copy of every message; later appends never show up in it
    pub fn snapshot(&self) -> Vec<Message> {
        self.read().transcript.clone()
    }

    /// Switch the model for future calls; calls already built keep theirs
    pub fn set_model(&self, model: impl Into<String>) {
        self.write().selected_model = model.into();
    }

    pub fn selected_model(&self) -> String {
        self.read().selected_model.clone()
    }

    /// Snapshot and model taken together, under one lock
    pub fn request(&self) -> CompletionRequest {
        let inner = self.read();
        CompletionRequest {
            messages: inner.transcript.clone(),
            model: inner.selected_model.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().transcript.is_empty()
    }

    // A panic while holding the lock cannot leave a half-pushed message,
    // so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

//! One interactive chat session
//!
//! Owns the transcript and the client, and runs a turn from submission to a
//! committed (or discarded) assistant response.

use crate::conversation::ConversationStore;
use crate::llm::{
    ClientEvent, CompletionBackend, CompletionClient, CompletionError, LlmError, Message, Role,
};
use futures::StreamExt;
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct ChatSession<B> {
    id: Uuid,
    store: ConversationStore,
    client: CompletionClient<B>,
}

impl<B: CompletionBackend> ChatSession<B> {
    pub fn new(client: CompletionClient<B>, model: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        let store = ConversationStore::new(model);
        tracing::info!(session = %id, model = %store.selected_model(), "Session started");
        Self { id, store, client }
    }

    /// Run one turn.
    ///
    /// The user message is committed as soon as it is submitted. The assistant
    /// message is committed only once the whole stream has been received;
    /// `on_fragment` sees each fragment as it arrives. On failure nothing of
    /// the response is kept and the session stays usable.
    pub async fn send<F>(&mut self, input: impl Into<String>, mut on_fragment: F) -> Result<String, CompletionError>
    where
        F: FnMut(&str),
    {
        self.store.append(Role::User, input);
        let request = self.store.request();

        tracing::info!(
            session = %self.id,
            model = %request.model,
            messages = request.messages.len(),
            "Submitting turn"
        );

        let mut fragments = self.client.complete(&request).await?;

        let mut response = String::new();
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    on_fragment(&text);
                    response.push_str(&text);
                }
                Err(e) => {
                    tracing::warn!(
                        session = %self.id,
                        discarded_bytes = response.len(),
                        error = %e,
                        "Discarding partial response"
                    );
                    return Err(e);
                }
            }
        }

        self.store.append(Role::Assistant, response.clone());
        tracing::info!(session = %self.id, bytes = response.len(), "Turn completed");
        Ok(response)
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        tracing::info!(session = %self.id, model = %model, "Model selected");
        self.store.set_model(model);
    }

    pub fn selected_model(&self) -> String {
        self.store.selected_model()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.health_check().await
    }

    /// Retry and exhaustion notices for this session's calls
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.client.subscribe()
    }
}

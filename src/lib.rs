//! Hult chat - terminal chat front-end for OpenAI-compatible endpoints
//!
//! A session keeps an in-memory transcript, sends it with the selected model
//! to a streaming completion backend, and commits the assistant response only
//! once the stream has completed.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod conversation;
pub mod llm;
pub mod session;

pub use conversation::ConversationStore;
pub use session::ChatSession;

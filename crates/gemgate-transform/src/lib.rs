//! Bidirectional translation between the OpenAI-compatible wire format and
//! the native Gemini format, plus the streaming transformer that re-shapes a
//! sequence of native chunks into OpenAI chat-completion SSE chunks.

pub mod chat;
pub mod embed;
pub mod ids;
pub mod image;
pub mod models;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("{0}")]
    InvalidRequest(String),
}

impl TransformError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

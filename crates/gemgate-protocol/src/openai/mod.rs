pub mod chat;
pub mod embeddings;
pub mod error;
pub mod images;
pub mod models;

pub use chat::{
    ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionRequestBody,
    ChatCompletionResponse, ChatDelta, ChatFinishReason, ChatMessage, CompletionUsage,
    MessageContent, OutputTokensDetails, ReasoningConfig, ReasoningInfo, ResponseFormat,
    ResponseMessage, StopConfiguration, StreamOptions, ToolCall, ToolCallChunk,
    ToolCallChunkFunction, ToolCallFunction, ToolChoice, ToolChoiceMode, ToolDefinition,
    UserContentPart,
};
pub use embeddings::{EmbeddingInput, EmbeddingObject, EmbeddingsRequestBody, EmbeddingsResponse};
pub use error::{ErrorBody, ErrorDetail};
pub use images::{ImageData, ImageGenerationRequestBody, ImageGenerationResponse};
pub use models::{ModelList, ModelObject};

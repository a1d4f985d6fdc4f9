pub mod embed;
pub mod generate;
pub mod imagen;
pub mod models;
pub mod types;

pub use embed::{
    BatchEmbedContentsRequestBody, BatchEmbedContentsResponse, ContentEmbedding,
    CountTokensResponse, EmbedContentRequestBody, EmbedContentResponse,
};
pub use generate::{
    FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration, GenerateContentRequestBody,
    GenerateContentResponse, GenerationConfig, ThinkingConfig, Tool, ToolConfig,
};
pub use imagen::{
    ImagenInstance, ImagenParameters, ImagenPredictRequestBody, ImagenPredictResponse,
    ImagenPrediction,
};
pub use models::{ListModelsResponse, Model};
pub use types::{
    Blob, BlockReason, Candidate, Content, ContentRole, FinishReason, FunctionCall,
    FunctionResponse, HarmBlockThreshold, HarmCategory, Modality, Part, PromptFeedback,
    SafetySetting, UsageMetadata,
};

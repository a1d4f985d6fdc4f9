use gemgate_protocol::gemini::embed::EmbedContentRequestBody;
use gemgate_protocol::gemini::types::{Content, Part};
use gemgate_protocol::openai::chat::CompletionUsage;
use gemgate_protocol::openai::embeddings::{
    EmbeddingObject, EmbeddingObjectType, EmbeddingsResponse, ListObjectType,
};

/// One native embed call per input string.
pub fn to_native_request(
    model: &str,
    input: &str,
    dimensions: Option<u32>,
) -> EmbedContentRequestBody {
    EmbedContentRequestBody {
        model: Some(format!("models/{model}")),
        content: Content {
            parts: vec![Part::text(input)],
            role: None,
        },
        output_dimensionality: dimensions,
    }
}

/// Assemble the list response. A failed item keeps its slot with an empty
/// vector and the error message instead of failing the whole request.
pub fn to_alt_response(
    model: String,
    items: Vec<Result<Vec<f64>, String>>,
) -> EmbeddingsResponse {
    let data = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Ok(embedding) => EmbeddingObject {
                object: EmbeddingObjectType::Embedding,
                index: index as u32,
                embedding,
                error: None,
            },
            Err(message) => EmbeddingObject {
                object: EmbeddingObjectType::Embedding,
                index: index as u32,
                embedding: Vec::new(),
                error: Some(message),
            },
        })
        .collect();

    EmbeddingsResponse {
        object: ListObjectType::List,
        data,
        model,
        usage: CompletionUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            output_tokens_details: None,
        },
    }
}

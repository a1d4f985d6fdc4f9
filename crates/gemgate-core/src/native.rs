use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::unfold;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use gemgate_protocol::gemini::generate::{
    GenerateContentRequestBody, GenerationConfig, ThinkingConfig, Tool, ToolConfig,
};
use gemgate_protocol::gemini::imagen::{
    ImagenInstance, ImagenParameters, ImagenPredictRequestBody,
};
use gemgate_protocol::gemini::types::{Content, Modality, SafetySetting};
use gemgate_protocol::sse::SseParser;

use crate::error::ProxyError;
use crate::response::{ByteStream, sse_frame};

/// The single effective generation config assembled from every place a
/// native caller may put settings. Merge order: `config` first, then
/// `generationConfig`, then the top-level alias fields — later wins.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub candidate_count: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub response_mime_type: Option<String>,
    pub response_schema: Option<JsonValue>,
    pub response_modalities: Option<Vec<Modality>>,
    pub system_instruction: Option<Content>,
    pub thinking_config: Option<ThinkingConfig>,
}

impl EffectiveConfig {
    fn overlay(&mut self, other: EffectiveConfig) {
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.top_p.is_some() {
            self.top_p = other.top_p;
        }
        if other.top_k.is_some() {
            self.top_k = other.top_k;
        }
        if other.candidate_count.is_some() {
            self.candidate_count = other.candidate_count;
        }
        if other.max_output_tokens.is_some() {
            self.max_output_tokens = other.max_output_tokens;
        }
        if other.stop_sequences.is_some() {
            self.stop_sequences = other.stop_sequences;
        }
        if other.response_mime_type.is_some() {
            self.response_mime_type = other.response_mime_type;
        }
        if other.response_schema.is_some() {
            self.response_schema = other.response_schema;
        }
        if other.response_modalities.is_some() {
            self.response_modalities = other.response_modalities;
        }
        if other.system_instruction.is_some() {
            self.system_instruction = other.system_instruction;
        }
        if other.thinking_config.is_some() {
            self.thinking_config = other.thinking_config;
        }
    }

    fn into_parts(mut self) -> (Option<GenerationConfig>, Option<Content>) {
        let system_instruction = self.system_instruction.take();
        // thinkingConfig is forwarded only when a budget was explicitly set.
        let thinking_config = self
            .thinking_config
            .take()
            .filter(|thinking| thinking.thinking_budget.is_some());

        let config = GenerationConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            candidate_count: self.candidate_count,
            max_output_tokens: self.max_output_tokens,
            stop_sequences: self.stop_sequences,
            response_mime_type: self.response_mime_type,
            response_schema: self.response_schema,
            response_modalities: self.response_modalities,
            thinking_config,
        };

        let config = if config == GenerationConfig::default() {
            None
        } else {
            Some(config)
        };

        (config, system_instruction)
    }
}

/// A native generate-content body as callers actually send it: settings may
/// live under `config`, `generationConfig`, or as top-level aliases.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeGenerateBody {
    #[serde(default)]
    pub contents: Vec<Content>,
    pub config: Option<EffectiveConfig>,
    pub generation_config: Option<EffectiveConfig>,
    pub tools: Option<Vec<Tool>>,
    pub tool_config: Option<ToolConfig>,
    #[serde(flatten)]
    pub aliases: EffectiveConfig,
}

/// Build the request actually forwarded upstream: one merged config and the
/// fixed all-categories-OFF safety policy.
pub fn normalize_generate_body(body: NativeGenerateBody) -> GenerateContentRequestBody {
    let mut effective = EffectiveConfig::default();
    if let Some(config) = body.config {
        effective.overlay(config);
    }
    if let Some(config) = body.generation_config {
        effective.overlay(config);
    }
    effective.overlay(body.aliases);

    let (generation_config, system_instruction) = effective.into_parts();

    GenerateContentRequestBody {
        contents: body.contents,
        tools: body.tools,
        tool_config: body.tool_config,
        safety_settings: Some(SafetySetting::all_off()),
        system_instruction,
        generation_config,
    }
}

/// generateImageWithGemini must explicitly opt into IMAGE output.
pub fn require_image_modality(body: &GenerateContentRequestBody) -> Result<(), ProxyError> {
    let has_image = body
        .generation_config
        .as_ref()
        .and_then(|config| config.response_modalities.as_ref())
        .is_some_and(|modalities| modalities.contains(&Modality::Image));
    if has_image {
        Ok(())
    } else {
        Err(ProxyError::bad_request(
            "generateImageWithGemini requires responseModalities to include IMAGE",
        ))
    }
}

/// The gateway-facing Imagen body: `{prompt, config:{numberOfImages?,
/// aspectRatio?, personGeneration?}}`. Unknown config fields are dropped by
/// deserialization.
#[derive(Debug, Deserialize)]
pub struct ImagenGenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub config: Option<ImagenGenerateConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenGenerateConfig {
    pub number_of_images: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub person_generation: Option<String>,
}

pub fn imagen_predict_body(body: ImagenGenerateBody) -> ImagenPredictRequestBody {
    let config = body.config.unwrap_or_default();
    ImagenPredictRequestBody {
        instances: vec![ImagenInstance {
            prompt: body.prompt,
        }],
        parameters: Some(ImagenParameters {
            sample_count: config.number_of_images,
            aspect_ratio: config.aspect_ratio,
            person_generation: config.person_generation,
        }),
    }
}

/// Re-emit a native upstream SSE stream one `data: <json>` event per chunk.
/// Native streams close without a terminator.
pub fn native_sse_stream(upstream: ByteStream) -> ByteStream {
    let stream = unfold(
        (upstream, SseParser::new(), VecDeque::<Bytes>::new(), false),
        |(mut upstream, mut parser, mut pending, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (upstream, parser, pending, done)));
                }
                if done {
                    return None;
                }
                match upstream.next().await {
                    Some(Ok(bytes)) => {
                        for data in parser.push_bytes(&bytes) {
                            if !data.is_empty() {
                                pending.push_back(sse_frame(&data));
                            }
                        }
                    }
                    Some(Err(err)) => {
                        return Some((Err(err), (upstream, parser, pending, done)));
                    }
                    None => {
                        for data in parser.finish() {
                            if !data.is_empty() {
                                pending.push_back(sse_frame(&data));
                            }
                        }
                        done = true;
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

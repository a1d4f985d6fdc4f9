use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Value as JsonValue, json};
use tracing::warn;

use gemgate_protocol::gemini::generate::{
    FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration, GenerateContentRequestBody,
    GenerationConfig, GoogleSearch, ThinkingConfig, Tool as GeminiTool, ToolConfig,
};
use gemgate_protocol::gemini::types::{Content, ContentRole, Part, SafetySetting};
use gemgate_protocol::openai::chat::{
    ChatCompletionRequestBody, ChatMessage, MessageContent, ResponseFormat, StopConfiguration,
    ToolCall, ToolChoice, ToolChoiceMode, ToolDefinition, UserContentPart,
};

use crate::TransformError;

/// Resolves a remote image URL to its content type and raw bytes.
///
/// The translator itself never talks HTTP; the gateway supplies the fetcher so
/// image downloads share the upstream client (proxy settings included).
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<(String, Bytes), String>;
}

/// Translate an OpenAI chat-completions request into a Gemini
/// generate-content body.
pub async fn to_native_request(
    body: &ChatCompletionRequestBody,
    fetcher: &dyn ImageFetcher,
) -> Result<GenerateContentRequestBody, TransformError> {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();

    for message in &body.messages {
        match message {
            ChatMessage::System { content } | ChatMessage::Developer { content } => {
                if let Some(text) = content_to_text(content) {
                    system_texts.push(text);
                }
            }
            ChatMessage::User { content, .. } => {
                let parts = map_user_content(content, fetcher).await;
                if !parts.is_empty() {
                    contents.push(Content {
                        parts,
                        role: Some(ContentRole::User),
                    });
                }
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                contents.push(map_assistant_message(content.as_ref(), tool_calls.as_deref()));
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
                name,
            } => {
                contents.push(map_tool_message(
                    content.as_ref(),
                    name.as_deref().unwrap_or(tool_call_id),
                ));
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content {
            parts: vec![Part::text(system_texts.join("\n"))],
            role: None,
        })
    };

    Ok(GenerateContentRequestBody {
        contents,
        tools: map_tools(body.tools.as_deref()),
        tool_config: map_tool_choice(body.tool_choice.as_ref()),
        safety_settings: Some(SafetySetting::all_off()),
        system_instruction,
        generation_config: map_generation_config(body),
    })
}

fn map_assistant_message(
    content: Option<&MessageContent>,
    tool_calls: Option<&[ToolCall]>,
) -> Content {
    let mut parts = Vec::new();

    if let Some(content) = content
        && let Some(text) = content_to_text(content)
    {
        parts.push(Part::text(text));
    }

    if let Some(calls) = tool_calls {
        for call in calls {
            let args = serde_json::from_str(&call.function.arguments)
                .unwrap_or(JsonValue::String(call.function.arguments.clone()));
            parts.push(Part::function_call(call.function.name.clone(), Some(args)));
        }
    }

    // The upstream rejects empty contents; a bare assistant turn still
    // occupies a slot in the conversation.
    if parts.is_empty() {
        parts.push(Part::text(""));
    }

    Content {
        parts,
        role: Some(ContentRole::Model),
    }
}

fn map_tool_message(content: Option<&MessageContent>, name: &str) -> Content {
    let text = content.and_then(content_to_text).unwrap_or_default();
    Content {
        parts: vec![Part::function_response(name, json!({ "content": text }))],
        role: Some(ContentRole::Function),
    }
}

async fn map_user_content(content: &MessageContent, fetcher: &dyn ImageFetcher) -> Vec<Part> {
    match content {
        MessageContent::Text(text) => vec![Part::text(text.clone())],
        MessageContent::Parts(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    UserContentPart::Text { text } => parts.push(Part::text(text.clone())),
                    UserContentPart::ImageUrl { image_url } => {
                        parts.push(map_image_url(&image_url.url, fetcher).await);
                    }
                }
            }
            parts
        }
    }
}

async fn map_image_url(url: &str, fetcher: &dyn ImageFetcher) -> Part {
    if let Some((mime, data)) = parse_data_url(url) {
        return Part::inline_data(mime, data);
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        match fetcher.fetch(url).await {
            Ok((mime, bytes)) => return Part::inline_data(mime, BASE64.encode(&bytes)),
            Err(message) => {
                warn!(event = "image_fetch_failed", url = %url, error = %message);
                return Part::text(format!("[Image URL could not be processed: {url}]"));
            }
        }
    }

    warn!(event = "image_url_unsupported", url = %url);
    Part::text(format!("[Image URL could not be processed: {url}]"))
}

/// `data:<mime>[;base64],<payload>` — the payload is used as the inline data
/// whether or not the `;base64` marker is present.
fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta);
    Some((mime.to_string(), payload.to_string()))
}

fn content_to_text(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Text(text) => {
            if text.is_empty() {
                None
            } else {
                Some(text.clone())
            }
        }
        MessageContent::Parts(items) => {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(|item| match item {
                    UserContentPart::Text { text } if !text.is_empty() => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
    }
}

fn map_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<GeminiTool>> {
    let tools = tools?;

    let mut declarations = Vec::new();
    for ToolDefinition::Function { function } in tools {
        // The provider accepts a single tool type per request; a declared
        // googleSearch tool takes precedence over everything else.
        if function.name == "googleSearch" {
            return Some(vec![GeminiTool {
                function_declarations: None,
                google_search: Some(GoogleSearch {}),
            }]);
        }
        declarations.push(FunctionDeclaration {
            name: function.name.clone(),
            description: function.description.clone(),
            parameters: function.parameters.clone(),
        });
    }

    if declarations.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: Some(declarations),
            google_search: None,
        }])
    }
}

fn map_tool_choice(choice: Option<&ToolChoice>) -> Option<ToolConfig> {
    let config = match choice? {
        ToolChoice::Mode(mode) => FunctionCallingConfig {
            mode: Some(match mode {
                ToolChoiceMode::Auto => FunctionCallingMode::Auto,
                ToolChoiceMode::Any | ToolChoiceMode::Required => FunctionCallingMode::Any,
                ToolChoiceMode::None => FunctionCallingMode::None,
            }),
            allowed_function_names: None,
        },
        ToolChoice::Named(named) => FunctionCallingConfig {
            mode: Some(FunctionCallingMode::Any),
            allowed_function_names: Some(vec![named.function.name.clone()]),
        },
    };

    Some(ToolConfig {
        function_calling_config: Some(config),
    })
}

fn map_generation_config(body: &ChatCompletionRequestBody) -> Option<GenerationConfig> {
    let stop_sequences = match &body.stop {
        Some(StopConfiguration::Single(value)) => Some(vec![value.clone()]),
        Some(StopConfiguration::Many(values)) => Some(values.clone()),
        None => None,
    };

    let response_mime_type = match body.response_format {
        Some(ResponseFormat::JsonObject) => Some("application/json".to_string()),
        _ => None,
    };

    let thinking_config = body
        .reasoning
        .as_ref()
        .and_then(|reasoning| reasoning.effort.as_deref())
        .and_then(map_reasoning_effort);

    let config = GenerationConfig {
        temperature: body.temperature,
        top_p: body.top_p,
        top_k: body.top_k,
        candidate_count: body.n,
        max_output_tokens: body.max_tokens,
        stop_sequences,
        response_mime_type,
        response_schema: None,
        response_modalities: None,
        thinking_config,
    };

    if config == GenerationConfig::default() {
        None
    } else {
        Some(config)
    }
}

/// Only the three literal efforts map to budgets; anything else drops the
/// thinking config entirely.
fn map_reasoning_effort(effort: &str) -> Option<ThinkingConfig> {
    let budget = match effort {
        "low" => 1024,
        "medium" => 4096,
        "high" => 16384,
        _ => return None,
    };
    Some(ThinkingConfig {
        thinking_budget: Some(budget),
        include_thoughts: None,
    })
}

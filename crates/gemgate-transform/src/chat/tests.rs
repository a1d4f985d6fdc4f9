use serde_json::json;

use gemgate_protocol::gemini::generate::GenerateContentResponse;
use gemgate_protocol::gemini::types::{
    BlockReason, Candidate, Content, ContentRole, FinishReason, HarmBlockThreshold, Part,
    PromptFeedback, UsageMetadata,
};
use gemgate_protocol::openai::chat::{
    ChatCompletionRequestBody, ChatFinishReason, ChatMessage, MessageContent, ReasoningConfig,
    StopConfiguration, ToolCall, ToolCallFunction, ToolCallKind,
};

use super::request::{ImageFetcher, to_native_request};
use super::response::{map_finish_reason, map_usage, to_alt_response};
use super::stream::ChatStreamState;

struct NoFetch;

#[async_trait::async_trait]
impl ImageFetcher for NoFetch {
    async fn fetch(&self, _url: &str) -> Result<(String, bytes::Bytes), String> {
        Err("fetch disabled in tests".to_string())
    }
}

fn base_request(messages: Vec<ChatMessage>) -> ChatCompletionRequestBody {
    ChatCompletionRequestBody {
        model: "gemini-x".to_string(),
        messages,
        temperature: None,
        top_p: None,
        top_k: None,
        n: None,
        max_tokens: None,
        stop: None,
        stream: None,
        stream_options: None,
        response_format: None,
        reasoning: None,
        tools: None,
        tool_choice: None,
    }
}

fn user(text: &str) -> ChatMessage {
    ChatMessage::User {
        content: MessageContent::Text(text.to_string()),
        name: None,
    }
}

fn text_candidate(text: &str, finish: Option<FinishReason>) -> Candidate {
    Candidate {
        content: Content {
            parts: vec![Part::text(text)],
            role: Some(ContentRole::Model),
        },
        finish_reason: finish,
        index: Some(0),
    }
}

#[tokio::test]
async fn simple_chat_request_maps_contents_and_config() {
    let mut body = base_request(vec![user("hi")]);
    body.temperature = Some(0.5);

    let native = to_native_request(&body, &NoFetch).await.unwrap();

    assert_eq!(native.contents.len(), 1);
    assert_eq!(native.contents[0].role, Some(ContentRole::User));
    assert_eq!(native.contents[0].parts[0].text.as_deref(), Some("hi"));

    let config = native.generation_config.unwrap();
    assert_eq!(config.temperature, Some(0.5));

    let safety = native.safety_settings.unwrap();
    assert_eq!(safety.len(), 5);
    assert!(
        safety
            .iter()
            .all(|setting| setting.threshold == HarmBlockThreshold::Off)
    );
}

#[tokio::test]
async fn safety_settings_forced_off_even_without_config() {
    let body = base_request(vec![user("hi")]);
    let native = to_native_request(&body, &NoFetch).await.unwrap();
    assert!(native.generation_config.is_none());
    assert_eq!(native.safety_settings.unwrap().len(), 5);
}

#[tokio::test]
async fn generation_config_fields_round_trip() {
    let mut body = base_request(vec![user("hi")]);
    body.temperature = Some(0.9);
    body.top_p = Some(0.8);
    body.top_k = Some(40);
    body.n = Some(2);
    body.max_tokens = Some(256);
    body.stop = Some(StopConfiguration::Single("END".to_string()));

    let config = to_native_request(&body, &NoFetch)
        .await
        .unwrap()
        .generation_config
        .unwrap();

    assert_eq!(config.temperature, Some(0.9));
    assert_eq!(config.top_p, Some(0.8));
    assert_eq!(config.top_k, Some(40));
    assert_eq!(config.candidate_count, Some(2));
    assert_eq!(config.max_output_tokens, Some(256));
    assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));
}

#[tokio::test]
async fn tool_call_turns_map_to_function_parts() {
    let messages = vec![
        user("calc"),
        ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: Some("c".to_string()),
                kind: ToolCallKind::Function,
                function: ToolCallFunction {
                    name: "f".to_string(),
                    arguments: "{\"x\":1}".to_string(),
                },
            }]),
        },
        ChatMessage::Tool {
            content: Some(MessageContent::Text("42".to_string())),
            tool_call_id: "c".to_string(),
            name: Some("f".to_string()),
        },
    ];

    let native = to_native_request(&base_request(messages), &NoFetch)
        .await
        .unwrap();

    assert_eq!(native.contents.len(), 3);

    let model_turn = &native.contents[1];
    assert_eq!(model_turn.role, Some(ContentRole::Model));
    let call = model_turn.parts[0].function_call.as_ref().unwrap();
    assert_eq!(call.name, "f");
    assert_eq!(call.args, Some(json!({"x": 1})));

    let function_turn = &native.contents[2];
    assert_eq!(function_turn.role, Some(ContentRole::Function));
    let response = function_turn.parts[0].function_response.as_ref().unwrap();
    assert_eq!(response.name, "f");
    assert_eq!(response.response, json!({"content": "42"}));
}

#[tokio::test]
async fn bare_assistant_turn_gets_empty_text_part() {
    let messages = vec![
        user("hi"),
        ChatMessage::Assistant {
            content: None,
            tool_calls: None,
        },
    ];
    let native = to_native_request(&base_request(messages), &NoFetch)
        .await
        .unwrap();
    assert_eq!(native.contents[1].parts[0].text.as_deref(), Some(""));
}

#[tokio::test]
async fn system_messages_collapse_into_system_instruction() {
    let messages = vec![
        ChatMessage::System {
            content: MessageContent::Text("be brief".to_string()),
        },
        user("hi"),
        ChatMessage::System {
            content: MessageContent::Text("be kind".to_string()),
        },
    ];
    let native = to_native_request(&base_request(messages), &NoFetch)
        .await
        .unwrap();

    assert_eq!(native.contents.len(), 1);
    let instruction = native.system_instruction.unwrap();
    assert_eq!(instruction.parts[0].text.as_deref(), Some("be brief\nbe kind"));
}

#[tokio::test]
async fn reasoning_effort_maps_to_fixed_budgets() {
    for (effort, budget) in [("low", 1024), ("medium", 4096), ("high", 16384)] {
        let mut body = base_request(vec![user("hi")]);
        body.reasoning = Some(ReasoningConfig {
            effort: Some(effort.to_string()),
        });
        let config = to_native_request(&body, &NoFetch)
            .await
            .unwrap()
            .generation_config
            .unwrap();
        assert_eq!(
            config.thinking_config.unwrap().thinking_budget,
            Some(budget)
        );
    }
}

#[tokio::test]
async fn unknown_reasoning_effort_drops_thinking_config() {
    let mut body = base_request(vec![user("hi")]);
    body.reasoning = Some(ReasoningConfig {
        effort: Some("maximal".to_string()),
    });
    let native = to_native_request(&body, &NoFetch).await.unwrap();
    assert!(native.generation_config.is_none());
}

#[tokio::test]
async fn failed_image_fetch_degrades_to_text_part() {
    let messages = vec![ChatMessage::User {
        content: MessageContent::Parts(vec![
            gemgate_protocol::openai::chat::UserContentPart::ImageUrl {
                image_url: gemgate_protocol::openai::chat::ImageUrl {
                    url: "https://example.com/cat.png".to_string(),
                },
            },
        ]),
        name: None,
    }];
    let native = to_native_request(&base_request(messages), &NoFetch)
        .await
        .unwrap();
    let text = native.contents[0].parts[0].text.as_deref().unwrap();
    assert!(text.starts_with("[Image URL could not be processed:"));
}

#[tokio::test]
async fn data_url_becomes_inline_data() {
    let messages = vec![ChatMessage::User {
        content: MessageContent::Parts(vec![
            gemgate_protocol::openai::chat::UserContentPart::ImageUrl {
                image_url: gemgate_protocol::openai::chat::ImageUrl {
                    url: "data:image/png;base64,aGk=".to_string(),
                },
            },
        ]),
        name: None,
    }];
    let native = to_native_request(&base_request(messages), &NoFetch)
        .await
        .unwrap();
    let blob = native.contents[0].parts[0].inline_data.as_ref().unwrap();
    assert_eq!(blob.mime_type, "image/png");
    assert_eq!(blob.data, "aGk=");
}

#[test]
fn finish_reason_table() {
    assert_eq!(
        map_finish_reason(Some(FinishReason::Stop), false),
        ChatFinishReason::Stop
    );
    assert_eq!(
        map_finish_reason(Some(FinishReason::Other), false),
        ChatFinishReason::Stop
    );
    assert_eq!(
        map_finish_reason(Some(FinishReason::FinishReasonUnspecified), false),
        ChatFinishReason::Stop
    );
    assert_eq!(
        map_finish_reason(Some(FinishReason::MaxTokens), false),
        ChatFinishReason::Length
    );
    assert_eq!(
        map_finish_reason(Some(FinishReason::Safety), false),
        ChatFinishReason::ContentFilter
    );
    assert_eq!(
        map_finish_reason(Some(FinishReason::Recitation), false),
        ChatFinishReason::ContentFilter
    );
    assert_eq!(
        map_finish_reason(Some(FinishReason::FunctionCall), false),
        ChatFinishReason::ToolCalls
    );
    // A functionCall part forces tool_calls whatever the raw reason.
    assert_eq!(
        map_finish_reason(Some(FinishReason::Stop), true),
        ChatFinishReason::ToolCalls
    );
}

#[test]
fn usage_remap_subtracts_thoughts() {
    let usage = map_usage(&UsageMetadata {
        prompt_token_count: Some(10),
        candidates_token_count: Some(7),
        thoughts_token_count: Some(3),
        cached_content_token_count: None,
        total_token_count: Some(17),
    });
    assert_eq!(usage.prompt_tokens, 10);
    assert_eq!(usage.completion_tokens, 4);
    assert_eq!(usage.total_tokens, 17);
    assert_eq!(usage.output_tokens_details.unwrap().reasoning_tokens, 3);
}

#[test]
fn usage_remap_without_thoughts_has_no_details() {
    let usage = map_usage(&UsageMetadata {
        prompt_token_count: Some(3),
        candidates_token_count: Some(2),
        thoughts_token_count: None,
        cached_content_token_count: None,
        total_token_count: Some(5),
    });
    assert_eq!(usage.completion_tokens, 2);
    assert!(usage.output_tokens_details.is_none());
}

#[test]
fn non_streaming_response_shape() {
    let native = GenerateContentResponse {
        candidates: vec![text_candidate("hello", Some(FinishReason::Stop))],
        prompt_feedback: None,
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: Some(3),
            candidates_token_count: Some(2),
            thoughts_token_count: None,
            cached_content_token_count: None,
            total_token_count: Some(5),
        }),
        model_version: None,
        response_id: None,
    };

    let alt = to_alt_response(&native, "gemini-x", None);
    assert!(alt.id.starts_with("chatcmpl-"));
    assert_eq!(alt.model, "gemini-x");
    assert_eq!(alt.choices.len(), 1);
    let choice = &alt.choices[0];
    assert_eq!(choice.index, 0);
    assert_eq!(choice.message.content.as_deref(), Some("hello"));
    assert_eq!(choice.finish_reason, ChatFinishReason::Stop);
    assert!(choice.logprobs.is_none());
    assert_eq!(alt.usage.unwrap().total_tokens, 5);
}

#[test]
fn response_tool_calls_get_fresh_call_ids() {
    let native = GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part::function_call("f", Some(json!({"x": 1})))],
                role: Some(ContentRole::Model),
            },
            finish_reason: Some(FinishReason::Stop),
            index: Some(0),
        }],
        ..GenerateContentResponse::default()
    };

    let alt = to_alt_response(&native, "gemini-x", None);
    let choice = &alt.choices[0];
    assert_eq!(choice.finish_reason, ChatFinishReason::ToolCalls);
    let calls = choice.message.tool_calls.as_ref().unwrap();
    let id = calls[0].id.as_deref().unwrap();
    assert!(id.starts_with("call_"));
    assert_eq!(id.len(), "call_".len() + 29);
    assert_eq!(calls[0].function.arguments, "{\"x\":1}");
}

#[test]
fn stream_emits_prelude_delta_finish_and_usage() {
    let mut state = ChatStreamState::new("gemini-x", true);

    let first = state.transform_chunk(&GenerateContentResponse {
        candidates: vec![text_candidate("he", None)],
        ..GenerateContentResponse::default()
    });
    assert_eq!(first.len(), 2);
    assert_eq!(
        first[0].choices[0].delta.role,
        Some(gemgate_protocol::openai::chat::ResponseRole::Assistant)
    );
    assert!(first[0].choices[0].finish_reason.is_none());
    assert_eq!(first[1].choices[0].delta.content.as_deref(), Some("he"));

    let second = state.transform_chunk(&GenerateContentResponse {
        candidates: vec![text_candidate("llo", Some(FinishReason::Stop))],
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: Some(3),
            candidates_token_count: Some(2),
            thoughts_token_count: None,
            cached_content_token_count: None,
            total_token_count: Some(5),
        }),
        ..GenerateContentResponse::default()
    });
    // No second prelude; the finish chunk carries the usage it arrived with.
    assert_eq!(second.len(), 1);
    let finish = &second[0];
    assert_eq!(finish.choices[0].delta.content.as_deref(), Some("llo"));
    assert_eq!(
        finish.choices[0].finish_reason,
        Some(ChatFinishReason::Stop)
    );
    assert_eq!(finish.usage.as_ref().unwrap().total_tokens, 5);

    assert!(state.finish().is_empty());
}

#[test]
fn stream_usage_without_finish_is_held_for_flush() {
    let mut state = ChatStreamState::new("gemini-x", true);

    state.transform_chunk(&GenerateContentResponse {
        candidates: vec![text_candidate("hi", Some(FinishReason::Stop))],
        ..GenerateContentResponse::default()
    });
    let chunks = state.transform_chunk(&GenerateContentResponse {
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: Some(1),
            candidates_token_count: Some(1),
            thoughts_token_count: None,
            cached_content_token_count: None,
            total_token_count: Some(2),
        }),
        ..GenerateContentResponse::default()
    });
    assert!(chunks.is_empty());

    let flushed = state.finish();
    assert_eq!(flushed.len(), 1);
    assert!(flushed[0].choices.is_empty());
    assert_eq!(flushed[0].usage.as_ref().unwrap().total_tokens, 2);
}

#[test]
fn stream_finish_only_choice_gets_synthetic_chunk_at_flush() {
    let mut state = ChatStreamState::new("gemini-x", true);

    let immediate = state.transform_chunk(&GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: Vec::new(),
                role: Some(ContentRole::Model),
            },
            finish_reason: Some(FinishReason::MaxTokens),
            index: Some(0),
        }],
        ..GenerateContentResponse::default()
    });
    assert!(immediate.is_empty());

    let flushed = state.finish();
    assert_eq!(flushed.len(), 1);
    let choice = &flushed[0].choices[0];
    assert_eq!(
        choice.delta.role,
        Some(gemgate_protocol::openai::chat::ResponseRole::Assistant)
    );
    assert_eq!(choice.finish_reason, Some(ChatFinishReason::Length));
}

#[test]
fn stream_blocked_prompt_closes_choice_zero() {
    let mut state = ChatStreamState::new("gemini-x", true);

    let chunks = state.transform_chunk(&GenerateContentResponse {
        candidates: Vec::new(),
        prompt_feedback: Some(PromptFeedback {
            block_reason: Some(BlockReason::Safety),
        }),
        ..GenerateContentResponse::default()
    });
    assert_eq!(chunks.len(), 1);
    let choice = &chunks[0].choices[0];
    assert!(choice.delta.role.is_none());
    assert!(choice.delta.content.is_none());
    assert_eq!(choice.finish_reason, Some(ChatFinishReason::ContentFilter));

    // Flush must not synthesize anything further for the blocked choice.
    assert!(state.finish().is_empty());
}

#[test]
fn stream_prelude_emitted_once_across_many_chunks() {
    let mut state = ChatStreamState::new("gemini-x", true);
    let mut role_chunks = 0;
    for text in ["a", "b", "c"] {
        for chunk in state.transform_chunk(&GenerateContentResponse {
            candidates: vec![text_candidate(text, None)],
            ..GenerateContentResponse::default()
        }) {
            if chunk.choices[0].delta.role.is_some() {
                role_chunks += 1;
            }
        }
    }
    assert_eq!(role_chunks, 1);
}

#[test]
fn stream_tool_call_delta_carries_fresh_ids() {
    let mut state = ChatStreamState::new("gemini-x", true);
    let chunks = state.transform_chunk(&GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part::function_call("f", Some(json!({"x": 1})))],
                role: Some(ContentRole::Model),
            },
            finish_reason: Some(FinishReason::Stop),
            index: Some(0),
        }],
        ..GenerateContentResponse::default()
    });

    // Prelude plus the tool delta.
    assert_eq!(chunks.len(), 2);
    let delta = &chunks[1].choices[0].delta;
    let calls = delta.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].index, 0);
    assert!(calls[0].id.as_deref().unwrap().starts_with("call_"));
    assert_eq!(
        chunks[1].choices[0].finish_reason,
        Some(ChatFinishReason::ToolCalls)
    );
}

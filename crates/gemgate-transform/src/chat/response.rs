use gemgate_protocol::gemini::generate::GenerateContentResponse;
use gemgate_protocol::gemini::types::{Candidate, FinishReason, UsageMetadata};
use gemgate_protocol::openai::chat::{
    ChatChoice, ChatCompletionResponse, ChatFinishReason, ChatObjectType, CompletionUsage,
    OutputTokensDetails, ReasoningInfo, ResponseMessage, ResponseRole, ToolCall, ToolCallFunction,
    ToolCallKind,
};

use crate::ids;

/// Translate a non-streaming Gemini response into an OpenAI chat completion.
pub fn to_alt_response(
    native: &GenerateContentResponse,
    model: &str,
    effort: Option<String>,
) -> ChatCompletionResponse {
    let mut choices: Vec<ChatChoice> = native
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| map_candidate(candidate, position as u32))
        .collect();

    // A fully blocked prompt yields no candidates; surface the block as a
    // content-filtered empty choice instead of an empty list.
    if choices.is_empty()
        && let Some(feedback) = &native.prompt_feedback
        && feedback.block_reason.is_some()
    {
        choices.push(ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: ResponseRole::Assistant,
                content: None,
                tool_calls: None,
            },
            finish_reason: ChatFinishReason::ContentFilter,
            logprobs: None,
        });
    }

    ChatCompletionResponse {
        id: ids::completion_id(),
        object: ChatObjectType::ChatCompletion,
        created: ids::unix_now(),
        model: model.to_string(),
        choices,
        usage: native.usage_metadata.as_ref().map(map_usage),
        reasoning: Some(ReasoningInfo {
            effort,
            summary: None,
        }),
    }
}

fn map_candidate(candidate: &Candidate, position: u32) -> ChatChoice {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in &candidate.content.parts {
        if part.is_thought() {
            continue;
        }
        if let Some(part_text) = &part.text {
            text.push_str(part_text);
        }
        if let Some(call) = &part.function_call {
            let arguments = call
                .args
                .as_ref()
                .and_then(|args| serde_json::to_string(args).ok())
                .unwrap_or_else(|| "{}".to_string());
            tool_calls.push(ToolCall {
                id: Some(ids::tool_call_id()),
                kind: ToolCallKind::Function,
                function: ToolCallFunction {
                    name: call.name.clone(),
                    arguments,
                },
            });
        }
    }

    let finish_reason = map_finish_reason(candidate.finish_reason, !tool_calls.is_empty());

    ChatChoice {
        index: candidate.index.unwrap_or(position),
        message: ResponseMessage {
            role: ResponseRole::Assistant,
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        },
        finish_reason,
        logprobs: None,
    }
}

/// A candidate carrying any functionCall part always finishes as
/// `tool_calls`, whatever the raw reason says.
pub fn map_finish_reason(reason: Option<FinishReason>, has_tool_calls: bool) -> ChatFinishReason {
    if has_tool_calls {
        return ChatFinishReason::ToolCalls;
    }
    match reason {
        Some(FinishReason::MaxTokens) => ChatFinishReason::Length,
        Some(
            FinishReason::Safety
            | FinishReason::Recitation
            | FinishReason::Blocklist
            | FinishReason::ProhibitedContent
            | FinishReason::Spii
            | FinishReason::ImageSafety,
        ) => ChatFinishReason::ContentFilter,
        Some(FinishReason::FunctionCall | FinishReason::MalformedFunctionCall) => {
            ChatFinishReason::ToolCalls
        }
        _ => ChatFinishReason::Stop,
    }
}

pub fn map_usage(usage: &UsageMetadata) -> CompletionUsage {
    let prompt_tokens = usage.prompt_token_count.unwrap_or(0);
    let response_tokens = usage.candidates_token_count.unwrap_or(0);
    let thoughts_tokens = usage.thoughts_token_count.unwrap_or(0);
    let completion_tokens = response_tokens.saturating_sub(thoughts_tokens);

    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: usage
            .total_token_count
            .unwrap_or(prompt_tokens + response_tokens),
        output_tokens_details: (thoughts_tokens > 0).then_some(OutputTokensDetails {
            reasoning_tokens: thoughts_tokens,
        }),
    }
}

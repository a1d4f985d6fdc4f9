use std::collections::BTreeMap;

use gemgate_protocol::gemini::generate::GenerateContentResponse;
use gemgate_protocol::openai::chat::{
    ChatChunkChoice, ChatChunkObjectType, ChatCompletionChunk, ChatDelta, ChatFinishReason,
    CompletionUsage, ResponseRole, ToolCallChunk, ToolCallChunkFunction, ToolCallKind,
};

use crate::chat::response::{map_finish_reason, map_usage};
use crate::ids;

/// Per-choice progress through the stream.
///
/// `opened` records that something was emitted for the choice (the prelude
/// role chunk counts); `closed` records an observed finish reason. A choice
/// that closes while never opened gets its synthetic prelude+finish chunk at
/// flush time.
#[derive(Debug, Clone, Copy, Default)]
struct ChoiceTrack {
    opened: bool,
    closed: bool,
    finish: Option<ChatFinishReason>,
}

/// Re-shapes a sequence of native streaming chunks into OpenAI
/// chat-completion chunks: role prelude once per choice, per-chunk deltas,
/// terminal finish reasons, and a trailing usage chunk.
///
/// State is owned by a single response stream and never shared.
#[derive(Debug)]
pub struct ChatStreamState {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    choices: BTreeMap<u32, ChoiceTrack>,
    tool_counters: BTreeMap<u32, u32>,
    pending_usage: Option<CompletionUsage>,
}

impl ChatStreamState {
    pub fn new(model: impl Into<String>, include_usage: bool) -> Self {
        Self {
            id: ids::completion_id(),
            model: model.into(),
            created: ids::unix_now(),
            include_usage,
            choices: BTreeMap::new(),
            tool_counters: BTreeMap::new(),
            pending_usage: None,
        }
    }

    pub fn transform_chunk(&mut self, native: &GenerateContentResponse) -> Vec<ChatCompletionChunk> {
        let usage_in_chunk = native.usage_metadata.is_some();
        if let Some(usage) = &native.usage_metadata {
            self.pending_usage = Some(map_usage(usage));
        }

        let mut out = Vec::new();

        if native.candidates.is_empty() {
            if let Some(feedback) = &native.prompt_feedback
                && feedback.block_reason.is_some()
            {
                self.close_blocked_prompt(usage_in_chunk, &mut out);
            }
            return out;
        }

        for (position, candidate) in native.candidates.iter().enumerate() {
            let index = candidate.index.unwrap_or(position as u32);
            let mut track = self.choices.get(&index).copied().unwrap_or_default();
            if track.closed {
                continue;
            }

            let mut text = String::new();
            let mut tool_chunks = Vec::new();
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
                    tool_chunks.push(ToolCallChunk {
                        index: self.next_tool_index(index),
                        id: Some(ids::tool_call_id()),
                        kind: Some(ToolCallKind::Function),
                        function: Some(ToolCallChunkFunction {
                            name: Some(call.name.clone()),
                            arguments: Some(arguments),
                        }),
                    });
                }
            }

            let has_tool_calls = !tool_chunks.is_empty();
            let has_payload = !text.is_empty() || has_tool_calls;
            let finish = candidate
                .finish_reason
                .map(|reason| map_finish_reason(Some(reason), has_tool_calls));

            if has_payload {
                if !track.opened {
                    out.push(self.make_chunk(index, role_delta(), None, None));
                    track.opened = true;
                }
                let delta = ChatDelta {
                    role: None,
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if has_tool_calls {
                        Some(tool_chunks)
                    } else {
                        None
                    },
                };
                let usage = if finish.is_some() && usage_in_chunk {
                    self.pending_usage.take()
                } else {
                    None
                };
                out.push(self.make_chunk(index, delta, finish, usage));
                if let Some(reason) = finish {
                    track.closed = true;
                    track.finish = Some(reason);
                }
            } else if let Some(reason) = finish {
                track.closed = true;
                track.finish = Some(reason);
                if track.opened {
                    let usage = if usage_in_chunk {
                        self.pending_usage.take()
                    } else {
                        None
                    };
                    out.push(self.make_chunk(index, ChatDelta::default(), Some(reason), usage));
                }
                // Not yet opened: the synthetic prelude+finish chunk is
                // emitted at flush time.
            }

            self.choices.insert(index, track);
        }

        out
    }

    /// Flush at end of stream: synthesize chunks for choices that closed
    /// without ever opening, then the trailing usage chunk.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();

        let deferred: Vec<(u32, Option<ChatFinishReason>)> = self
            .choices
            .iter()
            .filter(|(_, track)| track.closed && !track.opened)
            .map(|(index, track)| (*index, track.finish))
            .collect();
        for (index, finish) in deferred {
            out.push(self.make_chunk(index, role_delta(), finish, None));
            if let Some(track) = self.choices.get_mut(&index) {
                track.opened = true;
            }
        }

        if self.include_usage
            && let Some(usage) = self.pending_usage.take()
        {
            out.push(ChatCompletionChunk {
                id: self.id.clone(),
                object: ChatChunkObjectType::ChatCompletionChunk,
                created: self.created,
                model: self.model.clone(),
                choices: Vec::new(),
                usage: Some(usage),
            });
        }

        out
    }

    fn close_blocked_prompt(&mut self, usage_in_chunk: bool, out: &mut Vec<ChatCompletionChunk>) {
        let mut track = self.choices.get(&0).copied().unwrap_or_default();
        if track.closed {
            return;
        }
        track.closed = true;
        track.opened = true;
        track.finish = Some(ChatFinishReason::ContentFilter);
        self.choices.insert(0, track);

        let usage = if usage_in_chunk {
            self.pending_usage.take()
        } else {
            None
        };
        out.push(self.make_chunk(
            0,
            ChatDelta::default(),
            Some(ChatFinishReason::ContentFilter),
            usage,
        ));
    }

    fn make_chunk(
        &self,
        index: u32,
        delta: ChatDelta,
        finish_reason: Option<ChatFinishReason>,
        usage: Option<CompletionUsage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index,
                delta,
                finish_reason,
            }],
            usage,
        }
    }

    fn next_tool_index(&mut self, choice_index: u32) -> u32 {
        let counter = self.tool_counters.entry(choice_index).or_insert(0);
        let index = *counter;
        *counter += 1;
        index
    }
}

fn role_delta() -> ChatDelta {
    ChatDelta {
        role: Some(ResponseRole::Assistant),
        content: None,
        tool_calls: None,
    }
}

use std::collections::HashMap;

use tingly_protocol::claude::messages::ContentBlock;
use tingly_protocol::claude::stream::{ContentBlockDelta, StreamEvent, StreamUsage};
use tingly_protocol::openai::chat::{FinishReason, Usage};
use tingly_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ToolCallChunk, ToolCallChunkFunction,
};

use crate::proto::finish_claude_to_openai;

/// Translates an Anthropic message event stream into OpenAI chat-completion
/// chunks. The terminal `data: [DONE]` sentinel is the transport's job.
#[derive(Debug)]
pub struct ClaudeToOpenAiStream {
    response_model: String,
    created: i64,
    message_id: String,
    started: bool,
    finished: bool,
    next_tool_index: i64,
    tool_index_by_block: HashMap<u32, i64>,
    usage: StreamUsage,
}

impl ClaudeToOpenAiStream {
    pub fn new(response_model: impl Into<String>, created: i64) -> Self {
        Self {
            response_model: response_model.into(),
            created,
            message_id: "chatcmpl".to_string(),
            started: false,
            finished: false,
            next_tool_index: 0,
            tool_index_by_block: HashMap::new(),
            usage: StreamUsage::default(),
        }
    }

    pub fn transform_event(&mut self, event: &StreamEvent) -> Vec<ChatCompletionChunk> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.started = true;
                if !message.id.is_empty() {
                    self.message_id = message.id.clone();
                }
                if message.usage.input_tokens.is_some() {
                    self.usage.input_tokens = message.usage.input_tokens;
                }
                vec![self.chunk_with(ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: Some(String::new()),
                    ..ChunkDelta::default()
                })]
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name, .. },
            } => {
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_index_by_block.insert(*index, tool_index);
                vec![self.chunk_with(ChunkDelta {
                    tool_calls: Some(vec![ToolCallChunk {
                        index: tool_index,
                        id: Some(id.clone()),
                        r#type: Some("function".to_string()),
                        function: Some(ToolCallChunkFunction {
                            name: Some(name.clone()),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..ChunkDelta::default()
                })]
            }
            StreamEvent::ContentBlockStart { .. } => Vec::new(),
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => vec![self.chunk_with(ChunkDelta {
                    content: Some(text.clone()),
                    ..ChunkDelta::default()
                })],
                ContentBlockDelta::ThinkingDelta { thinking } => {
                    vec![self.chunk_with(ChunkDelta {
                        reasoning_content: Some(thinking.clone()),
                        ..ChunkDelta::default()
                    })]
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_index_by_block.get(index).copied() else {
                        return Vec::new();
                    };
                    vec![self.chunk_with(ChunkDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index: tool_index,
                            id: None,
                            r#type: None,
                            function: Some(ToolCallChunkFunction {
                                name: None,
                                arguments: Some(partial_json.clone()),
                            }),
                        }]),
                        ..ChunkDelta::default()
                    })]
                }
                ContentBlockDelta::SignatureDelta { .. } => Vec::new(),
            },
            StreamEvent::ContentBlockStop { .. } => Vec::new(),
            StreamEvent::MessageDelta { delta, usage } => {
                if usage.input_tokens.is_some() {
                    self.usage.input_tokens = usage.input_tokens;
                }
                if usage.output_tokens.is_some() {
                    self.usage.output_tokens = usage.output_tokens;
                }
                let Some(stop_reason) = delta.stop_reason else {
                    return Vec::new();
                };
                self.finished = true;
                let mut out = vec![self.finish_chunk(finish_claude_to_openai(stop_reason))];
                out.push(self.usage_chunk());
                out
            }
            StreamEvent::MessageStop | StreamEvent::Ping | StreamEvent::Error { .. } => Vec::new(),
        }
    }

    /// Flush at upstream end-of-stream; emits a plain `stop` finish if the
    /// upstream never sent one.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if !self.started || self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![self.finish_chunk(FinishReason::Stop), self.usage_chunk()]
    }

    pub fn usage(&self) -> StreamUsage {
        self.usage
    }

    fn chunk_with(&self, delta: ChunkDelta) -> ChatCompletionChunk {
        let mut chunk =
            ChatCompletionChunk::new(self.message_id.clone(), self.created, &self.response_model);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta,
            finish_reason: None,
        });
        chunk
    }

    fn finish_chunk(&self, reason: FinishReason) -> ChatCompletionChunk {
        let mut chunk =
            ChatCompletionChunk::new(self.message_id.clone(), self.created, &self.response_model);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some(reason),
        });
        chunk
    }

    fn usage_chunk(&self) -> ChatCompletionChunk {
        let mut chunk =
            ChatCompletionChunk::new(self.message_id.clone(), self.created, &self.response_model);
        let input = self.usage.input_tokens.unwrap_or(0);
        let output = self.usage.output_tokens.unwrap_or(0);
        chunk.usage = Some(Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input + output,
        });
        chunk
    }
}

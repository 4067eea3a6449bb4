//! Buffer a chat stream back into its non-streaming response shape. Used by
//! tests to check stream/buffered equivalence and by callers that need a
//! whole-message view of a finished stream.

use tingly_protocol::claude::messages::{ContentBlock, Message, StopReason, Usage as ClaudeUsage};
use tingly_protocol::claude::stream::{ContentBlockDelta, StreamEvent, StreamUsage};
use tingly_protocol::openai::chat::{
    AssistantMessage, ChatChoice, ChatCompletion, FinishReason, ToolCall, ToolCallFunction, Usage,
};
use tingly_protocol::openai::stream::ChatCompletionChunk;

use crate::proto::parse_tool_arguments;

/// Accumulates OpenAI chunks into a `chat.completion`.
#[derive(Debug, Default)]
pub struct OpenAiChunkAccumulator {
    id: String,
    created: i64,
    model: String,
    content: String,
    reasoning: String,
    tool_calls: Vec<(String, String, String)>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl OpenAiChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &ChatCompletionChunk) {
        if self.id.is_empty() {
            self.id = chunk.id.clone();
            self.created = chunk.created;
            self.model = chunk.model.clone();
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        let Some(choice) = chunk.choices.first() else {
            return;
        };
        if let Some(text) = &choice.delta.content {
            self.content.push_str(text);
        }
        if let Some(text) = &choice.delta.reasoning_content {
            self.reasoning.push_str(text);
        }
        if let Some(tool_calls) = &choice.delta.tool_calls {
            for call in tool_calls {
                let index = call.index as usize;
                while self.tool_calls.len() <= index {
                    self.tool_calls
                        .push((String::new(), String::new(), String::new()));
                }
                let slot = &mut self.tool_calls[index];
                if let Some(id) = &call.id {
                    slot.0 = id.clone();
                }
                if let Some(function) = &call.function {
                    if let Some(name) = &function.name {
                        slot.1 = name.clone();
                    }
                    if let Some(arguments) = &function.arguments {
                        slot.2.push_str(arguments);
                    }
                }
            }
        }
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }
    }

    pub fn finalize(self) -> ChatCompletion {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(|(id, name, arguments)| ToolCall {
                id,
                r#type: "function".to_string(),
                function: ToolCallFunction { name, arguments },
            })
            .collect();

        ChatCompletion {
            id: self.id,
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model,
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content: if self.content.is_empty() {
                        None
                    } else {
                        Some(self.content)
                    },
                    reasoning_content: if self.reasoning.is_empty() {
                        None
                    } else {
                        Some(self.reasoning)
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason: self.finish_reason,
            }],
            usage: self.usage,
        }
    }
}

#[derive(Debug, Default)]
struct BlockAccumulator {
    kind: BlockKind,
    text: String,
    tool_id: String,
    tool_name: String,
    json: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    #[default]
    Text,
    Thinking,
    ToolUse,
}

/// Accumulates Anthropic stream events into a `Message`.
#[derive(Debug, Default)]
pub struct ClaudeEventAccumulator {
    id: String,
    model: String,
    blocks: Vec<BlockAccumulator>,
    stop_reason: Option<StopReason>,
    usage: StreamUsage,
}

impl ClaudeEventAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = message.id.clone();
                self.model = message.model.clone();
                self.usage = message.usage;
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let index = *index as usize;
                while self.blocks.len() <= index {
                    self.blocks.push(BlockAccumulator::default());
                }
                let slot = &mut self.blocks[index];
                match content_block {
                    ContentBlock::Text { text } => {
                        slot.kind = BlockKind::Text;
                        slot.text = text.clone();
                    }
                    ContentBlock::Thinking { thinking, .. } => {
                        slot.kind = BlockKind::Thinking;
                        slot.text = thinking.clone();
                    }
                    ContentBlock::ToolUse { id, name, .. } => {
                        slot.kind = BlockKind::ToolUse;
                        slot.tool_id = id.clone();
                        slot.tool_name = name.clone();
                    }
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let index = *index as usize;
                while self.blocks.len() <= index {
                    self.blocks.push(BlockAccumulator::default());
                }
                let slot = &mut self.blocks[index];
                match delta {
                    ContentBlockDelta::TextDelta { text } => slot.text.push_str(text),
                    ContentBlockDelta::ThinkingDelta { thinking } => slot.text.push_str(thinking),
                    ContentBlockDelta::InputJsonDelta { partial_json } => {
                        slot.json.push_str(partial_json)
                    }
                    ContentBlockDelta::SignatureDelta { .. } => {}
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if usage.input_tokens.is_some() {
                    self.usage.input_tokens = usage.input_tokens;
                }
                if usage.output_tokens.is_some() {
                    self.usage.output_tokens = usage.output_tokens;
                }
            }
            _ => {}
        }
    }

    pub fn finalize(self) -> Message {
        let content = self
            .blocks
            .into_iter()
            .map(|block| match block.kind {
                BlockKind::Text => ContentBlock::Text { text: block.text },
                BlockKind::Thinking => ContentBlock::Thinking {
                    thinking: block.text,
                    signature: None,
                },
                BlockKind::ToolUse => ContentBlock::ToolUse {
                    id: block.tool_id,
                    name: block.tool_name,
                    input: parse_tool_arguments(&block.json),
                },
            })
            .collect();

        Message {
            id: self.id,
            r#type: "message".to_string(),
            role: "assistant".to_string(),
            model: self.model,
            content,
            stop_reason: self.stop_reason,
            stop_sequence: None,
            usage: ClaudeUsage {
                input_tokens: self.usage.input_tokens.unwrap_or(0),
                output_tokens: self.usage.output_tokens.unwrap_or(0),
            },
        }
    }
}

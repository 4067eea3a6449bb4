use tingly_protocol::claude::messages::{ContentBlock, StopReason};
use tingly_protocol::claude::stream::{
    ContentBlockDelta, MessageDelta, StreamEvent, StreamMessage, StreamUsage,
};
use tingly_protocol::openai::stream::{ChatCompletionChunk, ToolCallChunk};

use crate::proto::finish_openai_to_claude;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    Tool { upstream_index: i64 },
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u32,
    kind: BlockKind,
}

/// Translates an OpenAI chat-completion chunk stream into Anthropic message
/// events. One instance per request; events out are a pure function of
/// (state, chunk) and downstream order follows upstream order.
#[derive(Debug)]
pub struct OpenAiToClaudeStream {
    response_model: String,
    message_id: String,
    started: bool,
    finished: bool,
    next_index: u32,
    open_block: Option<OpenBlock>,
    pending_stop: Option<StopReason>,
    usage: StreamUsage,
}

impl OpenAiToClaudeStream {
    pub fn new(response_model: impl Into<String>) -> Self {
        Self {
            response_model: response_model.into(),
            message_id: "msg".to_string(),
            started: false,
            finished: false,
            next_index: 0,
            open_block: None,
            pending_stop: None,
            usage: StreamUsage::default(),
        }
    }

    pub fn transform_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        if !self.started {
            self.started = true;
            if !chunk.id.is_empty() {
                self.message_id = chunk.id.clone();
            }
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.message_id.clone(),
                    r#type: "message".to_string(),
                    role: "assistant".to_string(),
                    model: self.response_model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: StreamUsage::default(),
                },
            });
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(thinking) = choice.delta.reasoning_content.as_deref() {
                if !thinking.is_empty() {
                    self.delta_into_block(&mut events, BlockKind::Thinking, |_| {
                        ContentBlockDelta::ThinkingDelta {
                            thinking: thinking.to_string(),
                        }
                    });
                }
            }

            if let Some(text) = choice.delta.content.as_deref() {
                if !text.is_empty() {
                    self.delta_into_block(&mut events, BlockKind::Text, |_| {
                        ContentBlockDelta::TextDelta {
                            text: text.to_string(),
                        }
                    });
                }
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    self.push_tool_call(&mut events, call);
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.close_open_block(&mut events);
                self.pending_stop = Some(finish_openai_to_claude(reason));
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage.input_tokens = Some(usage.prompt_tokens);
            self.usage.output_tokens = Some(usage.completion_tokens);
            if let Some(stop_reason) = self.pending_stop.take() {
                self.close_open_block(&mut events);
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDelta {
                        stop_reason: Some(stop_reason),
                        stop_sequence: None,
                    },
                    usage: self.usage,
                });
                events.push(StreamEvent::MessageStop);
                self.finished = true;
            }
        }

        events
    }

    /// Flush the machine at upstream end-of-stream. Closes any open block and
    /// emits the terminal `message_delta` + `message_stop` pair if the usage
    /// chunk never arrived.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        if !self.started {
            return events;
        }
        self.close_open_block(&mut events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(self.pending_stop.take().unwrap_or(StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: self.usage,
        });
        events.push(StreamEvent::MessageStop);
        self.finished = true;
        events
    }

    /// Accumulated usage seen so far, for recording partial streams.
    pub fn usage(&self) -> StreamUsage {
        self.usage
    }

    fn delta_into_block<F>(&mut self, events: &mut Vec<StreamEvent>, kind: BlockKind, delta: F)
    where
        F: FnOnce(u32) -> ContentBlockDelta,
    {
        let index = match self.open_block {
            Some(open) if open.kind == kind => open.index,
            _ => {
                self.close_open_block(events);
                let index = self.next_index;
                self.next_index += 1;
                self.open_block = Some(OpenBlock { index, kind });
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: match kind {
                        BlockKind::Text => ContentBlock::Text {
                            text: String::new(),
                        },
                        BlockKind::Thinking => ContentBlock::Thinking {
                            thinking: String::new(),
                            signature: None,
                        },
                        // Tool blocks open through push_tool_call.
                        BlockKind::Tool { .. } => unreachable!("tool blocks open elsewhere"),
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: delta(index),
        });
    }

    fn push_tool_call(&mut self, events: &mut Vec<StreamEvent>, call: &ToolCallChunk) {
        let kind = BlockKind::Tool {
            upstream_index: call.index,
        };
        let index = match self.open_block {
            Some(open) if open.kind == kind => open.index,
            _ => {
                self.close_open_block(events);
                let index = self.next_index;
                self.next_index += 1;
                self.open_block = Some(OpenBlock { index, kind });
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("toolcall-{}", call.index));
                let name = call
                    .function
                    .as_ref()
                    .and_then(|function| function.name.clone())
                    .unwrap_or_else(|| "tool".to_string());
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                    },
                });
                index
            }
        };

        if let Some(arguments) = call
            .function
            .as_ref()
            .and_then(|function| function.arguments.as_deref())
        {
            if !arguments.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: arguments.to_string(),
                    },
                });
            }
        }
    }

    fn close_open_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open_block.take() {
            events.push(StreamEvent::ContentBlockStop { index: open.index });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::openai::chat::{FinishReason, Usage};
    use tingly_protocol::openai::stream::{ChunkChoice, ChunkDelta, ToolCallChunkFunction};

    fn chunk(delta: ChunkDelta, finish: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1,
            model: "gpt-4o-2024".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    fn text_delta(text: &str) -> ChunkDelta {
        ChunkDelta {
            content: Some(text.to_string()),
            ..ChunkDelta::default()
        }
    }

    fn tool_delta(
        index: i64,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ChunkDelta {
        ChunkDelta {
            tool_calls: Some(vec![ToolCallChunk {
                index,
                id: id.map(str::to_string),
                r#type: Some("function".to_string()),
                function: Some(ToolCallChunkFunction {
                    name: name.map(str::to_string),
                    arguments: arguments.map(str::to_string),
                }),
            }]),
            ..ChunkDelta::default()
        }
    }

    fn event_names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn text_then_tool_call_emits_block_events_in_order() {
        let mut machine = OpenAiToClaudeStream::new("claude-proxy");
        let mut events = Vec::new();

        events.extend(machine.transform_chunk(&chunk(text_delta("Let me look"), None)));
        events.extend(machine.transform_chunk(&chunk(
            tool_delta(0, Some("t1"), Some("get_weather"), None),
            None,
        )));
        events.extend(machine.transform_chunk(&chunk(
            tool_delta(0, None, None, Some("{\"loc\":")),
            None,
        )));
        events.extend(machine.transform_chunk(&chunk(
            tool_delta(0, None, None, Some("\"NYC\"}")),
            None,
        )));
        events.extend(
            machine.transform_chunk(&chunk(ChunkDelta::default(), Some(FinishReason::ToolCalls))),
        );
        events.extend(machine.finish());

        assert_eq!(
            event_names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // First block is text at index 0, second is the tool_use at index 1.
        match &events[1] {
            StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::Text { .. },
            } => assert_eq!(*index, 0),
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[4] {
            StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse { id, name, .. },
            } => {
                assert_eq!(*index, 1);
                assert_eq!(id, "t1");
                assert_eq!(name, "get_weather");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Argument fragments concatenate to the full JSON payload.
        let arguments: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: ContentBlockDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(arguments, "{\"loc\":\"NYC\"}");

        match &events[8] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(StopReason::ToolUse))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn usage_chunk_closes_the_message() {
        let mut machine = OpenAiToClaudeStream::new("claude-proxy");
        machine.transform_chunk(&chunk(text_delta("hi"), None));
        machine.transform_chunk(&chunk(ChunkDelta::default(), Some(FinishReason::Stop)));

        let mut usage_chunk = chunk(ChunkDelta::default(), None);
        usage_chunk.choices.clear();
        usage_chunk.usage = Some(Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            total_tokens: 10,
        });
        let events = machine.transform_chunk(&usage_chunk);
        match &events[..] {
            [StreamEvent::MessageDelta { delta, usage }, StreamEvent::MessageStop] => {
                assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
                assert_eq!(usage.input_tokens, Some(7));
                assert_eq!(usage.output_tokens, Some(3));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        // The machine is closed; a late flush adds nothing.
        assert!(machine.finish().is_empty());
    }

    #[test]
    fn reasoning_content_opens_a_thinking_block() {
        let mut machine = OpenAiToClaudeStream::new("claude-proxy");
        machine.transform_chunk(&chunk(text_delta(""), None));
        let events = machine.transform_chunk(&chunk(
            ChunkDelta {
                reasoning_content: Some("pondering".to_string()),
                ..ChunkDelta::default()
            },
            None,
        ));
        match &events[0] {
            StreamEvent::ContentBlockStart {
                content_block: ContentBlock::Thinking { .. },
                ..
            } => {}
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[1] {
            StreamEvent::ContentBlockDelta {
                delta: ContentBlockDelta::ThinkingDelta { thinking },
                ..
            } => assert_eq!(thinking, "pondering"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_start_carries_the_response_model() {
        let mut machine = OpenAiToClaudeStream::new("public-name");
        let events = machine.transform_chunk(&chunk(text_delta("x"), None));
        match &events[0] {
            StreamEvent::MessageStart { message } => {
                assert_eq!(message.model, "public-name");
                assert!(message.content.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

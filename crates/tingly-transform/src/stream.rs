use tingly_protocol::claude::stream::{AnyStreamEvent, StreamEvent};
use tingly_protocol::openai::stream::ChatCompletionChunk;

use crate::generate::claude2openai::ClaudeToOpenAiStream;
use crate::generate::openai2claude::OpenAiToClaudeStream;
use crate::proto::{
    rewrite_chunk_model, rewrite_claude_event_model, Proto, TransformError,
};

/// One decoded event of either chat stream dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    OpenAi(ChatCompletionChunk),
    Claude(AnyStreamEvent),
}

/// Running token tally fed from upstream events, so usage survives even when
/// the stream dies before completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTally {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

impl UsageTally {
    pub fn observe(&mut self, event: &ChatStreamEvent) {
        match event {
            ChatStreamEvent::OpenAi(chunk) => {
                if let Some(usage) = chunk.usage {
                    self.input_tokens = Some(usage.prompt_tokens);
                    self.output_tokens = Some(usage.completion_tokens);
                }
            }
            ChatStreamEvent::Claude(AnyStreamEvent::Event(event)) => match event {
                StreamEvent::MessageStart { message } => {
                    if message.usage.input_tokens.is_some() {
                        self.input_tokens = message.usage.input_tokens;
                    }
                    if message.usage.output_tokens.is_some() {
                        self.output_tokens = message.usage.output_tokens;
                    }
                }
                StreamEvent::MessageDelta { usage, .. } => {
                    if usage.input_tokens.is_some() {
                        self.input_tokens = usage.input_tokens;
                    }
                    if usage.output_tokens.is_some() {
                        self.output_tokens = usage.output_tokens;
                    }
                }
                _ => {}
            },
            ChatStreamEvent::Claude(AnyStreamEvent::Unknown(_)) => {}
        }
    }

    pub fn tokens(&self) -> (u32, u32) {
        (
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(0),
        )
    }
}

/// Per-request stream translator. Passthrough directions still rewrite the
/// `model` field on every event that carries one.
pub enum StreamAdapter {
    PassthroughOpenAi { model: String },
    PassthroughClaude { model: String },
    OpenAiToClaude(OpenAiToClaudeStream),
    ClaudeToOpenAi(ClaudeToOpenAiStream),
}

impl StreamAdapter {
    pub fn new(
        src: Proto,
        dst: Proto,
        response_model: &str,
        created: i64,
    ) -> Result<Self, TransformError> {
        match (src, dst) {
            (Proto::OpenAIChat, Proto::OpenAIChat) => Ok(StreamAdapter::PassthroughOpenAi {
                model: response_model.to_string(),
            }),
            (Proto::Claude, Proto::Claude) => Ok(StreamAdapter::PassthroughClaude {
                model: response_model.to_string(),
            }),
            (Proto::OpenAIChat, Proto::Claude) => Ok(StreamAdapter::OpenAiToClaude(
                OpenAiToClaudeStream::new(response_model),
            )),
            (Proto::Claude, Proto::OpenAIChat) => Ok(StreamAdapter::ClaudeToOpenAi(
                ClaudeToOpenAiStream::new(response_model, created),
            )),
            (src, dst) => Err(TransformError::UnsupportedPair { src, dst }),
        }
    }

    pub fn push(&mut self, event: ChatStreamEvent) -> Result<Vec<ChatStreamEvent>, TransformError> {
        match (self, event) {
            (StreamAdapter::PassthroughOpenAi { model }, ChatStreamEvent::OpenAi(mut chunk)) => {
                rewrite_chunk_model(&mut chunk, model);
                Ok(vec![ChatStreamEvent::OpenAi(chunk)])
            }
            (StreamAdapter::PassthroughClaude { model }, ChatStreamEvent::Claude(mut event)) => {
                rewrite_claude_event_model(&mut event, model);
                Ok(vec![ChatStreamEvent::Claude(event)])
            }
            (StreamAdapter::OpenAiToClaude(state), ChatStreamEvent::OpenAi(chunk)) => {
                Ok(state
                    .transform_chunk(&chunk)
                    .into_iter()
                    .map(|event| ChatStreamEvent::Claude(AnyStreamEvent::Event(event)))
                    .collect())
            }
            (StreamAdapter::ClaudeToOpenAi(state), ChatStreamEvent::Claude(event)) => {
                let AnyStreamEvent::Event(event) = event else {
                    return Ok(Vec::new());
                };
                Ok(state
                    .transform_event(&event)
                    .into_iter()
                    .map(ChatStreamEvent::OpenAi)
                    .collect())
            }
            (StreamAdapter::PassthroughOpenAi { .. }, _)
            | (StreamAdapter::OpenAiToClaude(_), _) => Err(TransformError::ProtoMismatch {
                expected: Proto::OpenAIChat,
            }),
            (StreamAdapter::PassthroughClaude { .. }, _)
            | (StreamAdapter::ClaudeToOpenAi(_), _) => Err(TransformError::ProtoMismatch {
                expected: Proto::Claude,
            }),
        }
    }

    /// Drain terminal events at upstream end-of-stream.
    pub fn finish(&mut self) -> Vec<ChatStreamEvent> {
        match self {
            StreamAdapter::PassthroughOpenAi { .. } | StreamAdapter::PassthroughClaude { .. } => {
                Vec::new()
            }
            StreamAdapter::OpenAiToClaude(state) => state
                .finish()
                .into_iter()
                .map(|event| ChatStreamEvent::Claude(AnyStreamEvent::Event(event)))
                .collect(),
            StreamAdapter::ClaudeToOpenAi(state) => state
                .finish()
                .into_iter()
                .map(ChatStreamEvent::OpenAi)
                .collect(),
        }
    }

    /// Whether downstream expects the OpenAI `data: [DONE]` sentinel.
    pub fn emits_openai_done(&self) -> bool {
        matches!(
            self,
            StreamAdapter::PassthroughOpenAi { .. } | StreamAdapter::ClaudeToOpenAi(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::claude::stream::StreamMessage;
    use tingly_protocol::claude::stream::StreamUsage;

    #[test]
    fn passthrough_rewrites_chunk_model() {
        let mut adapter = StreamAdapter::new(Proto::OpenAIChat, Proto::OpenAIChat, "public", 0)
            .unwrap();
        let chunk = ChatCompletionChunk::new("c1", 0, "upstream-secret");
        let out = adapter.push(ChatStreamEvent::OpenAi(chunk)).unwrap();
        match &out[0] {
            ChatStreamEvent::OpenAi(chunk) => assert_eq!(chunk.model, "public"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn passthrough_rewrites_message_start_model() {
        let mut adapter =
            StreamAdapter::new(Proto::Claude, Proto::Claude, "public", 0).unwrap();
        let event = AnyStreamEvent::Event(StreamEvent::MessageStart {
            message: StreamMessage {
                id: "m1".to_string(),
                r#type: "message".to_string(),
                role: "assistant".to_string(),
                model: "upstream-secret".to_string(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: StreamUsage::default(),
            },
        });
        let out = adapter.push(ChatStreamEvent::Claude(event)).unwrap();
        match &out[0] {
            ChatStreamEvent::Claude(AnyStreamEvent::Event(StreamEvent::MessageStart {
                message,
            })) => assert_eq!(message.model, "public"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn mismatched_event_is_rejected() {
        let mut adapter =
            StreamAdapter::new(Proto::Claude, Proto::OpenAIChat, "public", 0).unwrap();
        let chunk = ChatCompletionChunk::new("c1", 0, "x");
        assert!(adapter.push(ChatStreamEvent::OpenAi(chunk)).is_err());
    }

    #[test]
    fn gemini_streaming_is_unsupported() {
        assert!(StreamAdapter::new(Proto::Gemini, Proto::OpenAIChat, "m", 0).is_err());
    }
}

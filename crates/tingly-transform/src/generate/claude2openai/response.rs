use tingly_protocol::claude::messages::{ContentBlock, Message};
use tingly_protocol::openai::chat::{
    AssistantMessage, ChatChoice, ChatCompletion, ToolCall, ToolCallFunction, Usage,
};

use crate::proto::finish_claude_to_openai;

/// Convert a buffered Anthropic `Message` into an OpenAI chat completion.
/// `created` is supplied by the caller so the conversion stays clock-free.
pub fn transform_response(message: &Message, created: i64) -> ChatCompletion {
    let mut texts = Vec::new();
    let mut reasoning = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text } => texts.push(text.clone()),
            ContentBlock::Thinking { thinking, .. } => reasoning.push(thinking.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    r#type: "function".to_string(),
                    function: ToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
        }
    }

    let choice = ChatChoice {
        index: 0,
        message: AssistantMessage {
            role: "assistant".to_string(),
            content: if texts.is_empty() {
                None
            } else {
                Some(texts.join(""))
            },
            reasoning_content: if reasoning.is_empty() {
                None
            } else {
                Some(reasoning.join(""))
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        },
        finish_reason: message.stop_reason.map(finish_claude_to_openai),
    };

    ChatCompletion {
        id: message.id.clone(),
        object: "chat.completion".to_string(),
        created,
        model: message.model.clone(),
        choices: vec![choice],
        usage: Some(Usage {
            prompt_tokens: message.usage.input_tokens,
            completion_tokens: message.usage.output_tokens,
            total_tokens: message.usage.input_tokens + message.usage.output_tokens,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::claude::messages::{StopReason, Usage as ClaudeUsage};
    use tingly_protocol::openai::chat::FinishReason;

    #[test]
    fn blocks_flatten_into_one_choice() {
        let message = Message {
            id: "msg_1".to_string(),
            r#type: "message".to_string(),
            role: "assistant".to_string(),
            model: "claude-proxy".to_string(),
            content: vec![
                ContentBlock::Thinking {
                    thinking: "hmm".to_string(),
                    signature: None,
                },
                ContentBlock::Text {
                    text: "hello".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"loc": "NYC"}),
                },
            ],
            stop_reason: Some(StopReason::ToolUse),
            stop_sequence: None,
            usage: ClaudeUsage {
                input_tokens: 4,
                output_tokens: 6,
            },
        };

        let completion = transform_response(&message, 99);
        assert_eq!(completion.created, 99);
        let choice = &completion.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(choice.message.content.as_deref(), Some("hello"));
        assert_eq!(choice.message.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(
            choice.message.tool_calls.as_ref().unwrap()[0]
                .function
                .arguments,
            "{\"loc\":\"NYC\"}"
        );
        let usage = completion.usage.unwrap();
        assert_eq!(usage.total_tokens, 10);
    }
}

use tingly_protocol::claude::messages::{ContentBlock, Message, Usage as ClaudeUsage};
use tingly_protocol::openai::chat::ChatCompletion;

use crate::proto::{finish_openai_to_claude, parse_tool_arguments};

/// Convert a buffered OpenAI chat completion into an Anthropic `Message`.
/// Only the first choice is considered; the messages surface has no notion
/// of alternatives.
pub fn transform_response(response: &ChatCompletion) -> Message {
    let mut content = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = response.choices.first() {
        if let Some(reasoning) = &choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ContentBlock::Thinking {
                    thinking: reasoning.clone(),
                    signature: None,
                });
            }
        }
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text: text.clone() });
            }
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input: parse_tool_arguments(&call.function.arguments),
                });
            }
        }
        stop_reason = choice.finish_reason.map(finish_openai_to_claude);
    }

    let usage = response
        .usage
        .map(|usage| ClaudeUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
        .unwrap_or_default();

    Message {
        id: response.id.clone(),
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model.clone(),
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::claude::messages::StopReason;
    use tingly_protocol::openai::chat::{
        AssistantMessage, ChatChoice, FinishReason, ToolCall, ToolCallFunction, Usage,
    };

    fn completion(message: AssistantMessage, finish: FinishReason) -> ChatCompletion {
        ChatCompletion {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 1,
            model: "gpt-4o-2024".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some(finish),
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        }
    }

    #[test]
    fn text_and_usage_map_across() {
        let response = completion(
            AssistantMessage {
                role: "assistant".to_string(),
                content: Some("hello".to_string()),
                reasoning_content: None,
                tool_calls: None,
            },
            FinishReason::Stop,
        );
        let message = transform_response(&response);
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(message.usage.input_tokens, 10);
        assert_eq!(message.usage.output_tokens, 5);
        match &message.content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "hello"),
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn tool_calls_round_trip_into_tool_use() {
        let response = completion(
            AssistantMessage {
                role: "assistant".to_string(),
                content: None,
                reasoning_content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "t1".to_string(),
                    r#type: "function".to_string(),
                    function: ToolCallFunction {
                        name: "get_weather".to_string(),
                        arguments: "{\"loc\":\"NYC\"}".to_string(),
                    },
                }]),
            },
            FinishReason::ToolCalls,
        );
        let message = transform_response(&response);
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        match &message.content[0] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input["loc"], "NYC"),
            other => panic!("unexpected block: {other:?}"),
        }
    }
}

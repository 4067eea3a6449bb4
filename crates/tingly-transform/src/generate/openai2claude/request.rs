use tingly_protocol::claude::messages::{
    ContentBlockParam, ImageSource, MessageContent as ClaudeContent, MessageParam, MessageRole,
    MessagesRequest, SystemParam, ToolChoice as ClaudeToolChoice, ToolParam, ToolResultContent,
};
use tingly_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, ContentPart, MessageContent, StopSequences, ToolChoice,
    ToolChoiceMode, ToolDefinition,
};

use crate::proto::parse_tool_arguments;

/// Convert an OpenAI chat-completions request into an Anthropic messages
/// request. System and developer messages concatenate, in order, into the
/// `system` text; everything else maps block-for-block.
pub fn transform_request(request: &ChatCompletionRequest) -> MessagesRequest {
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();

    for message in &request.messages {
        match message {
            ChatMessage::System { content } | ChatMessage::Developer { content } => {
                system_texts.push(content.flat_text());
            }
            ChatMessage::User { content } => {
                messages.push(MessageParam {
                    role: MessageRole::User,
                    content: map_user_content(content),
                });
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if let Some(content) = content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        blocks.push(ContentBlockParam::Text { text });
                    }
                }
                if let Some(tool_calls) = tool_calls {
                    for call in tool_calls {
                        blocks.push(ContentBlockParam::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input: parse_tool_arguments(&call.function.arguments),
                        });
                    }
                }
                messages.push(MessageParam {
                    role: MessageRole::Assistant,
                    content: collapse_blocks(blocks),
                });
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                messages.push(MessageParam {
                    role: MessageRole::User,
                    content: ClaudeContent::Blocks(vec![ContentBlockParam::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: Some(ToolResultContent::Text(content.flat_text())),
                        is_error: None,
                    }]),
                });
            }
        }
    }

    let system = if system_texts.is_empty() {
        None
    } else {
        Some(SystemParam::Text(system_texts.join("\n")))
    };

    MessagesRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_completion_tokens.or(request.max_tokens),
        system,
        temperature: request.temperature.map(|value| value.clamp(0.0, 1.0)),
        top_p: request.top_p,
        top_k: None,
        stop_sequences: map_stop(request.stop.as_ref()),
        stream: request.stream,
        tools: map_tools(request.tools.as_deref()),
        tool_choice: map_tool_choice(request.tool_choice.as_ref()),
        thinking: None,
        metadata: None,
    }
}

fn map_user_content(content: &MessageContent) -> ClaudeContent {
    match content {
        MessageContent::Text(text) => ClaudeContent::Text(text.clone()),
        MessageContent::Parts(parts) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        if !text.is_empty() {
                            blocks.push(ContentBlockParam::Text { text: text.clone() });
                        }
                    }
                    ContentPart::ImageUrl { image_url } => {
                        blocks.push(ContentBlockParam::Image {
                            source: map_image_source(&image_url.url),
                        });
                    }
                }
            }
            collapse_blocks(blocks)
        }
    }
}

fn map_image_source(url: &str) -> ImageSource {
    if let Some((media_type, data)) = parse_data_url(url) {
        ImageSource::Base64 { media_type, data }
    } else {
        ImageSource::Url {
            url: url.to_string(),
        }
    }
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let (mime, encoding) = meta.split_once(';')?;
    if encoding != "base64" {
        return None;
    }
    Some((mime.to_string(), data.to_string()))
}

fn collapse_blocks(blocks: Vec<ContentBlockParam>) -> ClaudeContent {
    if blocks.len() == 1 {
        if let ContentBlockParam::Text { text } = &blocks[0] {
            return ClaudeContent::Text(text.clone());
        }
    }
    ClaudeContent::Blocks(blocks)
}

fn map_stop(stop: Option<&StopSequences>) -> Option<Vec<String>> {
    let sequences = match stop {
        Some(StopSequences::Single(value)) => vec![value.clone()],
        Some(StopSequences::Many(values)) => values.clone(),
        None => return None,
    };
    let sequences: Vec<String> = sequences
        .into_iter()
        .filter(|value| !value.trim().is_empty())
        .collect();
    if sequences.is_empty() {
        None
    } else {
        Some(sequences)
    }
}

fn map_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<ToolParam>> {
    let tools = tools?;
    let mapped: Vec<ToolParam> = tools
        .iter()
        .map(|tool| {
            let ToolDefinition::Function { function } = tool;
            ToolParam {
                name: function.name.clone(),
                description: function.description.clone(),
                input_schema: function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            }
        })
        .collect();
    if mapped.is_empty() {
        None
    } else {
        Some(mapped)
    }
}

fn map_tool_choice(choice: Option<&ToolChoice>) -> Option<ClaudeToolChoice> {
    match choice? {
        ToolChoice::Mode(ToolChoiceMode::None) => Some(ClaudeToolChoice::None),
        ToolChoice::Mode(ToolChoiceMode::Auto) => Some(ClaudeToolChoice::Auto),
        ToolChoice::Mode(ToolChoiceMode::Required) => Some(ClaudeToolChoice::Any),
        ToolChoice::Named { function, .. } => Some(ClaudeToolChoice::Tool {
            name: function.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            stream: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
            user: None,
        }
    }

    #[test]
    fn system_messages_concatenate_in_order() {
        let request = base_request(vec![
            ChatMessage::System {
                content: MessageContent::Text("first".to_string()),
            },
            ChatMessage::User {
                content: MessageContent::Text("hi".to_string()),
            },
            ChatMessage::System {
                content: MessageContent::Text("second".to_string()),
            },
        ]);
        let out = transform_request(&request);
        assert_eq!(out.system.unwrap().flat_text(), "first\nsecond");
        assert_eq!(out.messages.len(), 1);
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        use tingly_protocol::openai::chat::{ToolCall, ToolCallFunction};

        let request = base_request(vec![ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "t1".to_string(),
                r#type: "function".to_string(),
                function: ToolCallFunction {
                    name: "get_weather".to_string(),
                    arguments: "{\"loc\":\"NYC\"}".to_string(),
                },
            }]),
        }]);
        let out = transform_request(&request);
        match &out.messages[0].content {
            ClaudeContent::Blocks(blocks) => match &blocks[0] {
                ContentBlockParam::ToolUse { id, name, input } => {
                    assert_eq!(id, "t1");
                    assert_eq!(name, "get_weather");
                    assert_eq!(input["loc"], "NYC");
                }
                other => panic!("unexpected block: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn tool_role_maps_to_tool_result() {
        let request = base_request(vec![ChatMessage::Tool {
            content: MessageContent::Text("sunny".to_string()),
            tool_call_id: "t1".to_string(),
        }]);
        let out = transform_request(&request);
        assert_eq!(out.messages[0].role, MessageRole::User);
        match &out.messages[0].content {
            ClaudeContent::Blocks(blocks) => match &blocks[0] {
                ContentBlockParam::ToolResult { tool_use_id, .. } => {
                    assert_eq!(tool_use_id, "t1")
                }
                other => panic!("unexpected block: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn schema_parameters_pass_through_verbatim() {
        use tingly_protocol::openai::chat::FunctionDef;

        let schema = serde_json::json!({
            "type": "object",
            "properties": {"loc": {"type": "string"}},
            "required": ["loc"]
        });
        let mut request = base_request(Vec::new());
        request.tools = Some(vec![ToolDefinition::Function {
            function: FunctionDef {
                name: "get_weather".to_string(),
                description: None,
                parameters: Some(schema.clone()),
            },
        }]);
        let out = transform_request(&request);
        assert_eq!(out.tools.unwrap()[0].input_schema, schema);
    }
}

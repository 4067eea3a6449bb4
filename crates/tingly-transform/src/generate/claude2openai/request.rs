use tingly_protocol::claude::messages::{
    ContentBlockParam, ImageSource, MessageContent as ClaudeContent, MessageRole, MessagesRequest,
    ToolChoice as ClaudeToolChoice,
};
use tingly_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, ContentPart, FunctionDef, ImageUrl, MessageContent,
    NamedFunction, StopSequences, StreamOptions, ToolCall, ToolCallFunction, ToolChoice,
    ToolChoiceMode, ToolDefinition,
};

/// Convert an Anthropic messages request into an OpenAI chat-completions
/// request. `max_tokens` is carried across unchanged; streaming requests ask
/// the upstream to include usage in the final chunk.
pub fn transform_request(request: &MessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.flat_text();
        if !text.is_empty() {
            messages.push(ChatMessage::System {
                content: MessageContent::Text(text),
            });
        }
    }

    for message in &request.messages {
        match message.role {
            MessageRole::User => messages.extend(map_user_message(&message.content)),
            MessageRole::Assistant => messages.push(map_assistant_message(&message.content)),
        }
    }

    let stream = request.stream;
    let stream_options = match stream {
        Some(true) => Some(StreamOptions {
            include_usage: Some(true),
        }),
        _ => None,
    };

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        max_completion_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: map_stop(request.stop_sequences.as_deref()),
        stream,
        stream_options,
        tools: map_tools(request),
        tool_choice: map_tool_choice(request.tool_choice.as_ref()),
        user: None,
    }
}

/// User turns may interleave plain content with tool results; tool results
/// split out into their own `tool`-role messages, in block order.
fn map_user_message(content: &ClaudeContent) -> Vec<ChatMessage> {
    let blocks = match content {
        ClaudeContent::Text(text) => {
            return vec![ChatMessage::User {
                content: MessageContent::Text(text.clone()),
            }];
        }
        ClaudeContent::Blocks(blocks) => blocks,
    };

    let mut out = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlockParam::Text { text } => {
                if !text.is_empty() {
                    parts.push(ContentPart::Text { text: text.clone() });
                }
            }
            ContentBlockParam::Image { source } => {
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_source_url(source),
                    },
                });
            }
            ContentBlockParam::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                flush_user_parts(&mut out, &mut parts);
                out.push(ChatMessage::Tool {
                    content: MessageContent::Text(
                        content
                            .as_ref()
                            .map(|content| content.flat_text())
                            .unwrap_or_default(),
                    ),
                    tool_call_id: tool_use_id.clone(),
                });
            }
            // tool_use and thinking never appear in user turns.
            _ => {}
        }
    }
    flush_user_parts(&mut out, &mut parts);
    out
}

fn flush_user_parts(out: &mut Vec<ChatMessage>, parts: &mut Vec<ContentPart>) {
    if parts.is_empty() {
        return;
    }
    let drained = std::mem::take(parts);
    let content = if drained.len() == 1 {
        match &drained[0] {
            ContentPart::Text { text } => MessageContent::Text(text.clone()),
            _ => MessageContent::Parts(drained),
        }
    } else {
        MessageContent::Parts(drained)
    };
    out.push(ChatMessage::User { content });
}

fn map_assistant_message(content: &ClaudeContent) -> ChatMessage {
    let blocks = match content {
        ClaudeContent::Text(text) => {
            return ChatMessage::Assistant {
                content: Some(MessageContent::Text(text.clone())),
                tool_calls: None,
            };
        }
        ClaudeContent::Blocks(blocks) => blocks,
    };

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlockParam::Text { text } => texts.push(text.clone()),
            ContentBlockParam::ToolUse { id, name, input } => {
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
            // Thinking blocks are an output artifact; they do not replay
            // into the OpenAI conversation.
            _ => {}
        }
    }

    ChatMessage::Assistant {
        content: if texts.is_empty() {
            None
        } else {
            Some(MessageContent::Text(texts.join("\n")))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    }
}

fn image_source_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Url { url } => url.clone(),
        ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
    }
}

fn map_stop(sequences: Option<&[String]>) -> Option<StopSequences> {
    let sequences = sequences?;
    match sequences.len() {
        0 => None,
        1 => Some(StopSequences::Single(sequences[0].clone())),
        _ => Some(StopSequences::Many(sequences.to_vec())),
    }
}

fn map_tools(request: &MessagesRequest) -> Option<Vec<ToolDefinition>> {
    let tools = request.tools.as_ref()?;
    let mapped: Vec<ToolDefinition> = tools
        .iter()
        .map(|tool| ToolDefinition::Function {
            function: FunctionDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(tool.input_schema.clone()),
            },
        })
        .collect();
    if mapped.is_empty() {
        None
    } else {
        Some(mapped)
    }
}

fn map_tool_choice(choice: Option<&ClaudeToolChoice>) -> Option<ToolChoice> {
    match choice? {
        ClaudeToolChoice::Auto => Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
        ClaudeToolChoice::Any => Some(ToolChoice::Mode(ToolChoiceMode::Required)),
        ClaudeToolChoice::None => Some(ToolChoice::Mode(ToolChoiceMode::None)),
        ClaudeToolChoice::Tool { name } => Some(ToolChoice::Named {
            r#type: "function".to_string(),
            function: NamedFunction { name: name.clone() },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::claude::messages::{
        MessageParam, SystemParam, ToolParam, ToolResultContent,
    };

    fn base_request(messages: Vec<MessageParam>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-proxy".to_string(),
            messages,
            max_tokens: Some(100),
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: None,
        }
    }

    #[test]
    fn system_becomes_leading_system_message() {
        let mut request = base_request(vec![MessageParam {
            role: MessageRole::User,
            content: ClaudeContent::Text("hi".to_string()),
        }]);
        request.system = Some(SystemParam::Text("be brief".to_string()));
        let out = transform_request(&request);
        assert!(matches!(out.messages[0], ChatMessage::System { .. }));
        assert_eq!(out.max_tokens, Some(100));
    }

    #[test]
    fn tool_use_and_result_round_trip() {
        let request = base_request(vec![
            MessageParam {
                role: MessageRole::Assistant,
                content: ClaudeContent::Blocks(vec![ContentBlockParam::ToolUse {
                    id: "t1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"loc": "NYC"}),
                }]),
            },
            MessageParam {
                role: MessageRole::User,
                content: ClaudeContent::Blocks(vec![ContentBlockParam::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: Some(ToolResultContent::Text("sunny".to_string())),
                    is_error: None,
                }]),
            },
        ]);
        let out = transform_request(&request);
        match &out.messages[0] {
            ChatMessage::Assistant { tool_calls, .. } => {
                let call = &tool_calls.as_ref().unwrap()[0];
                assert_eq!(call.id, "t1");
                let parsed: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap();
                assert_eq!(parsed["loc"], "NYC");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        match &out.messages[1] {
            ChatMessage::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "t1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn streaming_requests_ask_for_usage() {
        let mut request = base_request(Vec::new());
        request.stream = Some(true);
        let out = transform_request(&request);
        assert_eq!(out.stream, Some(true));
        assert_eq!(out.stream_options.unwrap().include_usage, Some(true));
    }

    #[test]
    fn tool_schema_is_preserved() {
        let schema = serde_json::json!({"type": "object", "properties": {"q": {}}});
        let mut request = base_request(Vec::new());
        request.tools = Some(vec![ToolParam {
            name: "search".to_string(),
            description: Some("find things".to_string()),
            input_schema: schema.clone(),
        }]);
        let out = transform_request(&request);
        match &out.tools.unwrap()[0] {
            ToolDefinition::Function { function } => {
                assert_eq!(function.parameters.as_ref().unwrap(), &schema)
            }
        }
    }
}

use std::collections::HashMap;

use tingly_protocol::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerationConfig, Part, Tool,
};
use tingly_protocol::openai::chat::{
    ChatCompletionRequest, ChatMessage, StopSequences, ToolDefinition,
};

use crate::proto::parse_tool_arguments;

/// Convert an OpenAI chat-completions request into a Google generate-content
/// request. Assistant turns become `model` contents; tool-role messages turn
/// into `functionResponse` parts keyed back to the calling function's name.
pub fn transform_request(request: &ChatCompletionRequest) -> GenerateContentRequest {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    // Gemini addresses tool results by function name, not call id.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        match message {
            ChatMessage::System { content } | ChatMessage::Developer { content } => {
                system_texts.push(content.flat_text());
            }
            ChatMessage::User { content } => {
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::text(content.flat_text())],
                });
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::new();
                if let Some(content) = content {
                    let text = content.flat_text();
                    if !text.is_empty() {
                        parts.push(Part::text(text));
                    }
                }
                if let Some(tool_calls) = tool_calls {
                    for call in tool_calls {
                        call_names.insert(call.id.clone(), call.function.name.clone());
                        parts.push(Part {
                            function_call: Some(FunctionCall {
                                name: call.function.name.clone(),
                                args: parse_tool_arguments(&call.function.arguments),
                            }),
                            ..Part::default()
                        });
                    }
                }
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                let name = call_names
                    .get(tool_call_id)
                    .cloned()
                    .unwrap_or_else(|| tool_call_id.clone());
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        function_response: Some(FunctionResponse {
                            name,
                            response: serde_json::json!({ "result": content.flat_text() }),
                        }),
                        ..Part::default()
                    }],
                });
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: vec![Part::text(system_texts.join("\n"))],
        })
    };

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(GenerationConfig {
            max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: map_stop(request.stop.as_ref()),
        }),
        tools: map_tools(request.tools.as_deref()),
    }
}

fn map_stop(stop: Option<&StopSequences>) -> Option<Vec<String>> {
    match stop {
        Some(StopSequences::Single(value)) => Some(vec![value.clone()]),
        Some(StopSequences::Many(values)) => Some(values.clone()),
        None => None,
    }
}

fn map_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<Tool>> {
    let tools = tools?;
    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .map(|tool| {
            let ToolDefinition::Function { function } = tool;
            FunctionDeclaration {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: function.parameters.clone(),
            }
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(vec![Tool {
            function_declarations: declarations,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::openai::chat::{MessageContent, ToolCall, ToolCallFunction};

    #[test]
    fn roles_and_tool_results_map_by_name() {
        let request = ChatCompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![
                ChatMessage::System {
                    content: MessageContent::Text("helpful".to_string()),
                },
                ChatMessage::User {
                    content: MessageContent::Text("weather?".to_string()),
                },
                ChatMessage::Assistant {
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: "t1".to_string(),
                        r#type: "function".to_string(),
                        function: ToolCallFunction {
                            name: "get_weather".to_string(),
                            arguments: "{\"loc\":\"NYC\"}".to_string(),
                        },
                    }]),
                },
                ChatMessage::Tool {
                    content: MessageContent::Text("sunny".to_string()),
                    tool_call_id: "t1".to_string(),
                },
            ],
            max_tokens: Some(100),
            max_completion_tokens: None,
            temperature: Some(0.7),
            top_p: None,
            stop: None,
            stream: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
            user: None,
        };

        let out = transform_request(&request);
        assert_eq!(
            out.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("helpful")
        );
        assert_eq!(out.contents.len(), 3);
        assert_eq!(out.contents[1].role.as_deref(), Some("model"));
        assert_eq!(
            out.contents[1].parts[0]
                .function_call
                .as_ref()
                .unwrap()
                .name,
            "get_weather"
        );
        assert_eq!(
            out.contents[2].parts[0]
                .function_response
                .as_ref()
                .unwrap()
                .name,
            "get_weather"
        );
        let config = out.generation_config.unwrap();
        assert_eq!(config.max_output_tokens, Some(100));
        assert_eq!(config.temperature, Some(0.7));
    }
}

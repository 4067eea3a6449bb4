use std::collections::HashMap;

use tingly_protocol::claude::messages::{
    ContentBlockParam, MessageContent, MessageRole, MessagesRequest,
};
use tingly_protocol::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerationConfig, Part, Tool,
};

/// Convert an Anthropic messages request into a Google generate-content
/// request.
pub fn transform_request(request: &MessagesRequest) -> GenerateContentRequest {
    let mut contents = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in &request.messages {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
        };
        let parts = match &message.content {
            MessageContent::Text(text) => vec![Part::text(text.clone())],
            MessageContent::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlockParam::Text { text } => {
                            if !text.is_empty() {
                                parts.push(Part::text(text.clone()));
                            }
                        }
                        ContentBlockParam::ToolUse { id, name, input } => {
                            call_names.insert(id.clone(), name.clone());
                            parts.push(Part {
                                function_call: Some(FunctionCall {
                                    name: name.clone(),
                                    args: input.clone(),
                                }),
                                ..Part::default()
                            });
                        }
                        ContentBlockParam::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            let name = call_names
                                .get(tool_use_id)
                                .cloned()
                                .unwrap_or_else(|| tool_use_id.clone());
                            let text = content
                                .as_ref()
                                .map(|content| content.flat_text())
                                .unwrap_or_default();
                            parts.push(Part {
                                function_response: Some(FunctionResponse {
                                    name,
                                    response: serde_json::json!({ "result": text }),
                                }),
                                ..Part::default()
                            });
                        }
                        // Images and thinking have no generate-content
                        // counterpart in this gateway.
                        _ => {}
                    }
                }
                parts
            }
        };
        if !parts.is_empty() {
            contents.push(Content {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    let system_instruction = request.system.as_ref().and_then(|system| {
        let text = system.flat_text();
        if text.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part::text(text)],
            })
        }
    });

    let tools = request.tools.as_ref().map(|tools| {
        vec![Tool {
            function_declarations: tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                })
                .collect(),
        }]
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop_sequences.clone(),
        }),
        tools,
    }
}

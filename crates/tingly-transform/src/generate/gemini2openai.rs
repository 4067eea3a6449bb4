use tingly_protocol::gemini::GenerateContentResponse;
use tingly_protocol::openai::chat::{
    AssistantMessage, ChatChoice, ChatCompletion, ToolCall, ToolCallFunction, Usage,
};

use crate::proto::finish_gemini_to_openai;

/// Convert a Google generate-content response into an OpenAI chat completion.
pub fn transform_response(
    response: &GenerateContentResponse,
    id: &str,
    created: i64,
) -> ChatCompletion {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    if let Some(candidate) = response.candidates.first() {
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    texts.push(text.clone());
                }
                if let Some(call) = &part.function_call {
                    let index = tool_calls.len();
                    tool_calls.push(ToolCall {
                        id: format!("call_{index}"),
                        r#type: "function".to_string(),
                        function: ToolCallFunction {
                            name: call.name.clone(),
                            arguments: serde_json::to_string(&call.args)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                }
            }
        }
        finish_reason = candidate.finish_reason.map(finish_gemini_to_openai);
    }

    let usage = response.usage_metadata.map(|metadata| {
        let prompt = metadata.prompt_token_count.unwrap_or(0);
        let completion = metadata.candidates_token_count.unwrap_or(0);
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: metadata.total_token_count.unwrap_or(prompt + completion),
        }
    });

    ChatCompletion {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: response.model_version.clone().unwrap_or_default(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: if texts.is_empty() {
                    None
                } else {
                    Some(texts.join(""))
                },
                reasoning_content: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason,
        }],
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::gemini::{
        Candidate, Content, FinishReason as GeminiFinishReason, Part, UsageMetadata,
    };
    use tingly_protocol::openai::chat::FinishReason;

    #[test]
    fn candidate_maps_to_choice_with_usage() {
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts: vec![Part::text("bonjour")],
                }),
                finish_reason: Some(GeminiFinishReason::Stop),
                index: Some(0),
            }],
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: Some(8),
                candidates_token_count: Some(2),
                total_token_count: Some(10),
            }),
            model_version: None,
        };
        let completion = transform_response(&response, "chatcmpl-g", 5);
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some("bonjour")
        );
        assert_eq!(completion.usage.unwrap().prompt_tokens, 8);
    }
}

use tingly_protocol::claude::messages::{ContentBlock, Message, Usage};
use tingly_protocol::gemini::GenerateContentResponse;

use crate::proto::finish_gemini_to_claude;

/// Convert a Google generate-content response into an Anthropic `Message`.
pub fn transform_response(response: &GenerateContentResponse, id: &str) -> Message {
    let mut content = Vec::new();
    let mut stop_reason = None;

    if let Some(candidate) = response.candidates.first() {
        if let Some(candidate_content) = &candidate.content {
            for (index, part) in candidate_content.parts.iter().enumerate() {
                if let Some(text) = &part.text {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text: text.clone() });
                    }
                }
                if let Some(call) = &part.function_call {
                    content.push(ContentBlock::ToolUse {
                        id: format!("toolu_{index}"),
                        name: call.name.clone(),
                        input: call.args.clone(),
                    });
                }
            }
        }
        stop_reason = candidate.finish_reason.map(finish_gemini_to_claude);
    }

    let usage = response
        .usage_metadata
        .map(|metadata| Usage {
            input_tokens: metadata.prompt_token_count.unwrap_or(0),
            output_tokens: metadata.candidates_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    Message {
        id: id.to_string(),
        r#type: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model_version.clone().unwrap_or_default(),
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

use tiktoken_rs::{get_bpe_from_model, o200k_base, CoreBPE};

use tingly_protocol::claude::messages::{CountTokensRequest, MessageContent};

use crate::error::GatewayError;

/// Local token estimate for providers that have no count endpoint of their
/// own. Uses the OpenAI tokenizer family; unknown model names fall back to
/// the o200k encoding.
pub fn count_input_tokens(model: &str, request: &CountTokensRequest) -> Result<u64, GatewayError> {
    let bpe = encoder_for(model)?;
    let mut total = 0u64;

    if let Some(system) = &request.system {
        total += count_text(&bpe, &system.flat_text());
    }

    for message in &request.messages {
        let text = match &message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => serde_json::to_string(blocks)
                .map_err(|err| GatewayError::Internal(err.to_string()))?,
        };
        total += count_text(&bpe, &text);
    }

    if let Some(tools) = &request.tools {
        let encoded = serde_json::to_string(tools)
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        total += count_text(&bpe, &encoded);
    }

    Ok(total)
}

fn encoder_for(model: &str) -> Result<CoreBPE, GatewayError> {
    match get_bpe_from_model(model) {
        Ok(bpe) => Ok(bpe),
        Err(_) => o200k_base().map_err(|err| GatewayError::Internal(err.to_string())),
    }
}

fn count_text(bpe: &CoreBPE, text: &str) -> u64 {
    bpe.encode_with_special_tokens(text).len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::claude::messages::{MessageParam, MessageRole, SystemParam};

    #[test]
    fn counts_grow_with_content() {
        let short = CountTokensRequest {
            model: "unknown-model".to_string(),
            messages: vec![MessageParam {
                role: MessageRole::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            system: None,
            tools: None,
        };
        let mut long = short.clone();
        long.system = Some(SystemParam::Text(
            "You are an unusually thorough assistant.".to_string(),
        ));

        let short_count = count_input_tokens("unknown-model", &short).unwrap();
        let long_count = count_input_tokens("unknown-model", &long).unwrap();
        assert!(short_count > 0);
        assert!(long_count > short_count);
    }
}

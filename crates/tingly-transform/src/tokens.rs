use std::collections::HashMap;

use tingly_protocol::claude::messages::MessagesRequest;
use tingly_protocol::gemini::GenerateContentRequest;
use tingly_protocol::openai::chat::ChatCompletionRequest;

/// Default and per-(provider, model) `max_tokens` limits.
///
/// Anthropic-style requests require `max_tokens`, so absent values are filled
/// with the default before the cap is applied. A request with an explicit
/// thinking budget keeps whatever it asked for.
#[derive(Debug, Clone, Default)]
pub struct TokenBudget {
    pub default_max_tokens: u32,
    caps: HashMap<(String, String), u32>,
}

impl TokenBudget {
    pub fn new(default_max_tokens: u32) -> Self {
        Self {
            default_max_tokens,
            caps: HashMap::new(),
        }
    }

    pub fn set_cap(&mut self, provider: impl Into<String>, model: impl Into<String>, cap: u32) {
        self.caps.insert((provider.into(), model.into()), cap);
    }

    pub fn cap_for(&self, provider: &str, model: &str) -> Option<u32> {
        self.caps
            .get(&(provider.to_string(), model.to_string()))
            .copied()
    }

    pub fn apply_claude(&self, request: &mut MessagesRequest, provider: &str, model: &str) {
        if request.thinking_budget().is_some() {
            return;
        }
        let mut value = match request.max_tokens {
            Some(value) if value > 0 => value,
            _ => self.default_max_tokens,
        };
        if let Some(cap) = self.cap_for(provider, model) {
            value = value.min(cap);
        }
        request.max_tokens = Some(value);
    }

    pub fn apply_openai(&self, request: &mut ChatCompletionRequest, provider: &str, model: &str) {
        let Some(cap) = self.cap_for(provider, model) else {
            return;
        };
        if let Some(value) = request.max_tokens.as_mut() {
            *value = (*value).min(cap);
        }
        if let Some(value) = request.max_completion_tokens.as_mut() {
            *value = (*value).min(cap);
        }
    }

    pub fn apply_gemini(&self, request: &mut GenerateContentRequest, provider: &str, model: &str) {
        let config = request.generation_config.get_or_insert_with(Default::default);
        let mut value = match config.max_output_tokens {
            Some(value) if value > 0 => value,
            _ => self.default_max_tokens,
        };
        if let Some(cap) = self.cap_for(provider, model) {
            value = value.min(cap);
        }
        config.max_output_tokens = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tingly_protocol::claude::messages::ThinkingConfig;

    fn claude_request(max_tokens: Option<u32>) -> MessagesRequest {
        MessagesRequest {
            model: "m".to_string(),
            messages: Vec::new(),
            max_tokens,
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
    fn fills_default_then_caps() {
        let mut budget = TokenBudget::new(4096);
        budget.set_cap("prov", "m", 1000);

        let mut request = claude_request(None);
        budget.apply_claude(&mut request, "prov", "m");
        assert_eq!(request.max_tokens, Some(1000));

        let mut request = claude_request(Some(500));
        budget.apply_claude(&mut request, "prov", "m");
        assert_eq!(request.max_tokens, Some(500));
    }

    #[test]
    fn thinking_budget_suppresses_cap() {
        let mut budget = TokenBudget::new(4096);
        budget.set_cap("prov", "m", 100);

        let mut request = claude_request(Some(32000));
        request.thinking = Some(ThinkingConfig::Enabled {
            budget_tokens: 16000,
        });
        budget.apply_claude(&mut request, "prov", "m");
        assert_eq!(request.max_tokens, Some(32000));
    }

    #[test]
    fn openai_caps_only_when_present() {
        let mut budget = TokenBudget::new(4096);
        budget.set_cap("prov", "m", 256);

        let mut request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: Vec::new(),
            max_tokens: Some(999),
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            stream: None,
            stream_options: None,
            tools: None,
            tool_choice: None,
            user: None,
        };
        budget.apply_openai(&mut request, "prov", "m");
        assert_eq!(request.max_tokens, Some(256));

        request.max_tokens = None;
        budget.apply_openai(&mut request, "prov", "m");
        assert_eq!(request.max_tokens, None);
    }
}

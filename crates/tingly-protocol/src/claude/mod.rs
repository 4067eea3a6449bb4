pub mod messages;
pub mod stream;

use serde::{Deserialize, Serialize};

pub use messages::{
    ContentBlock, ContentBlockParam, CountTokensRequest, CountTokensResponse, ImageSource,
    Message, MessageContent, MessageParam, MessageRole, MessagesRequest, StopReason, SystemBlock,
    SystemParam, ThinkingConfig, ToolChoice, ToolParam, ToolResultContent, Usage,
};
pub use stream::{
    AnyStreamEvent, ContentBlockDelta, MessageDelta, StreamEvent, StreamMessage, StreamUsage,
};

/// Anthropic-style error envelope; mirrors the OpenAI shape with a top-level
/// `type: "error"` discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub r#type: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, r#type: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            error: ErrorDetail {
                message: message.into(),
                r#type: r#type.into(),
                code: None,
            },
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error.code = Some(code.into());
        self
    }
}

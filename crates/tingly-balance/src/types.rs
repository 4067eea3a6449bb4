use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Window length applied when a service declares none.
pub const DEFAULT_TIME_WINDOW: u32 = 300;

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    300
}

/// A configured upstream. Created and edited by the admin surface; the
/// pipeline treats providers as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub uuid: String,
    pub name: String,
    pub api_base: String,
    #[serde(default)]
    pub api_style: AuthStyle,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Request timeout in seconds for non-streaming calls.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub starred_models: Vec<String>,
}

/// Which wire contract the upstream speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStyle {
    #[default]
    OpenAI,
    Anthropic,
}

/// The atomic routing target: a (provider, upstream model) pair inside a
/// rule. `weight` doubles as the per-window request budget; weight 0 marks a
/// fallback-only service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub time_window: u32,
}

impl Service {
    pub fn effective_time_window(&self) -> u32 {
        if self.time_window == 0 {
            DEFAULT_TIME_WINDOW
        } else {
            self.time_window
        }
    }
}

/// Maps a client-facing model name to an ordered list of candidate services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub uuid: String,
    pub request_model: String,
    /// Forced model string echoed in responses; empty means "echo the
    /// request model".
    #[serde(default)]
    pub response_model: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Rule {
    pub fn response_model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.response_model.is_empty() {
            fallback
        } else {
            &self.response_model
        }
    }
}

/// Usage counters for one (rule, provider, model) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub request_count: i64,
    pub last_used: OffsetDateTime,
    pub window_start: OffsetDateTime,
    pub window_request_count: i64,
    pub window_tokens_consumed: i64,
    pub window_input_tokens: i64,
    pub window_output_tokens: i64,
    pub time_window: i32,
}

impl ServiceStats {
    pub fn fresh(time_window: u32, now: OffsetDateTime) -> Self {
        Self {
            request_count: 0,
            last_used: now,
            window_start: now,
            window_request_count: 0,
            window_tokens_consumed: 0,
            window_input_tokens: 0,
            window_output_tokens: 0,
            time_window: time_window as i32,
        }
    }

    /// Whether the current window has elapsed at `now`.
    pub fn window_expired(&self, now: OffsetDateTime) -> bool {
        (now - self.window_start).whole_seconds() >= self.time_window as i64
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::HeaderMap;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

/// One captured request/response pair, annotated with its scenario tag.
#[derive(Debug, Serialize)]
pub struct ScenarioRecord {
    pub scenario: String,
    pub model: String,
    pub at: i64,
    pub duration_ms: u128,
    pub method: String,
    pub url: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: serde_json::Value,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Best-effort scenario capture. Disabled sinks hand out no recorders, and
/// write failures are logged and swallowed so recording never costs a
/// request more than the IO itself.
pub struct ScenarioSink {
    dir: PathBuf,
    enabled: bool,
}

impl ScenarioSink {
    pub fn new(data_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: data_dir.into().join("records"),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn begin(
        self: &Arc<Self>,
        scenario: &str,
        method: &str,
        url: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Option<ScenarioRecorder> {
        if !self.enabled {
            return None;
        }

        // First value per header name, like the original capture format.
        let mut request_headers = BTreeMap::new();
        for (name, value) in headers {
            if !request_headers.contains_key(name.as_str()) {
                if let Ok(value) = value.to_str() {
                    request_headers.insert(name.as_str().to_string(), value.to_string());
                }
            }
        }

        let request_body = match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => value,
            Err(_) => serde_json::json!({ "raw": String::from_utf8_lossy(body) }),
        };
        let model = request_body
            .get("model")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string();

        Some(ScenarioRecorder {
            sink: self.clone(),
            scenario: scenario.to_string(),
            model,
            method: method.to_string(),
            url: url.to_string(),
            request_headers,
            request_body,
            started: Instant::now(),
            response_body: None,
        })
    }

    fn write(&self, record: &ScenarioRecord) {
        if let Err(err) = self.try_write(record) {
            debug!(event = "scenario_record_failed", error = %err);
        }
    }

    fn try_write(&self, record: &ScenarioRecord) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{}_{}.json",
            sanitize(&record.scenario),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        let payload = serde_json::to_vec_pretty(record)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        std::fs::write(self.dir.join(name), payload)
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}

/// Tracks one in-flight request for the sink. Response bodies appear in the
/// record only when the handler stashed them explicitly.
pub struct ScenarioRecorder {
    sink: Arc<ScenarioSink>,
    scenario: String,
    model: String,
    method: String,
    url: String,
    request_headers: BTreeMap<String, String>,
    request_body: serde_json::Value,
    started: Instant,
    response_body: Option<serde_json::Value>,
}

impl ScenarioRecorder {
    pub fn stash_response(&mut self, body: &Bytes) {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => self.response_body = Some(value),
            Err(_) => {
                self.response_body =
                    Some(serde_json::json!({ "raw": String::from_utf8_lossy(body) }));
            }
        }
    }

    pub fn finish(self, status: u16) {
        self.write(status, None);
    }

    pub fn finish_error(self, status: u16, error: &str) {
        let error = error.to_string();
        self.write(status, Some(error));
    }

    fn write(self, status: u16, error: Option<String>) {
        let record = ScenarioRecord {
            scenario: self.scenario,
            model: self.model,
            at: OffsetDateTime::now_utc().unix_timestamp(),
            duration_ms: self.started.elapsed().as_millis(),
            method: self.method,
            url: self.url,
            request_headers: self.request_headers,
            request_body: self.request_body,
            status,
            response_body: self.response_body,
            error,
        };
        self.sink.write(&record);
    }
}

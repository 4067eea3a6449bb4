use bytes::Bytes;

/// One decoded server-sent event: an optional `event:` name plus the joined
/// `data:` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder.
///
/// Feed raw body chunks as they arrive; complete frames are returned as soon
/// as their terminating blank line has been seen. Call [`SseDecoder::flush`]
/// once the body ends to drain a trailing frame that was never terminated.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &Bytes) -> Vec<SseFrame> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.feed_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.close_frame(&mut frames);
            } else {
                self.consume_line(&line);
            }
        }

        frames
    }

    pub fn flush(&mut self) -> Vec<SseFrame> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.consume_line(&line);
        }
        let mut frames = Vec::new();
        self.close_frame(&mut frames);
        frames
    }

    fn consume_line(&mut self, line: &str) {
        // Comment lines start with a colon.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
    }

    fn close_frame(&mut self, frames: &mut Vec<SseFrame>) {
        if self.event.is_none() && self.data.is_empty() {
            return;
        }
        frames.push(SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}

/// Encode one SSE frame. Multi-line payloads get one `data:` line each.
pub fn encode_frame(event: Option<&str>, data: &str) -> Bytes {
    let mut out = String::new();
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// The terminal sentinel for OpenAI-style streams.
pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_events_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed_str("event: message_start\nda").is_empty());
        let frames = decoder.feed_str("ta: {\"a\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message_start"));
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed_str(": keepalive\ndata: one\ndata: two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn flush_drains_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed_str("data: [DONE]").is_empty());
        let frames = decoder.flush();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "[DONE]");
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed_str("event: ping\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("ping"));
    }

    #[test]
    fn encode_round_trips_through_decode() {
        let bytes = encode_frame(Some("content_block_delta"), "{\"x\":2}");
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(frames[0].data, "{\"x\":2}");
    }
}

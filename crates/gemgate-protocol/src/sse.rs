use bytes::Bytes;

/// Incremental parser for `data:`-framed server-sent events.
///
/// Both upstream stream shapes the gateway consumes (Gemini `alt=sse` and the
/// OpenAI chunk stream) carry one JSON payload per `data:` line, so events are
/// surfaced as the joined data payload only. Comment lines and field names
/// other than `data` are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.flush_event(&mut events);
            } else {
                self.consume_line(&line);
            }
        }

        events
    }

    /// Drain any unterminated trailing event once the byte stream ends.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.consume_line(&line);
        }
        let mut events = Vec::new();
        self.flush_event(&mut events);
        events
    }

    fn consume_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
        } else if line == "data" {
            self.data_lines.push(String::new());
        }
    }

    fn flush_event(&mut self, events: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        events.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

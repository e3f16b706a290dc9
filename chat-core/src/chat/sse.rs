use crate::error::ChatError;

/// Incremental server-sent-events decoder.
///
/// Bytes are pushed as they arrive from the network; complete events are
/// returned as their joined `data` payloads. Only the `data` field is used,
/// other fields and comments are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ChatError> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = std::str::from_utf8(&line)
                .map_err(|_| ChatError::Stream("event stream is not valid UTF-8".into()))?;
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(event) = self.feed_line(line) {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Flush an event left without its terminating blank line.
    pub fn finish(&mut self) -> Result<Option<String>, ChatError> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8(rest)
                .map_err(|_| ChatError::Stream("event stream is not valid UTF-8".into()))?;
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.feed_line(line) {
                return Ok(Some(event));
            }
        }

        Ok(self.dispatch())
    }

    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let event = self.data.join("\n");
        self.data.clear();
        Some(event)
    }
}

//! Incremental decoder for `text/event-stream` framing.
//!
//! The transport hands us arbitrary byte chunks; events are only complete at
//! a blank line. Field handling follows the SSE wire format: `event:` names
//! the event, `data:` lines accumulate joined by `\n`, `id:` updates the
//! cursor echoed back as `Last-Event-ID` on reconnect, and `:` lines are
//! server heartbeats to be ignored.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub(crate) event: String,
    pub(crate) data: String,
    pub(crate) id: Option<String>,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: String,
    event_name: String,
    data: String,
    event_id: Option<String>,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every event completed by it.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut completed = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            if let Some(event) = self.take_line(&line) {
                completed.push(event);
            }
        }
        completed
    }

    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let event = SseEvent {
                event: std::mem::take(&mut self.event_name),
                data: std::mem::take(&mut self.data),
                id: self.event_id.clone(),
            };
            return Some(event);
        }

        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event_name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.event_id = Some(rest.trim().to_string());
        }
        None
    }
}

use crate::events::{ContentDelta, SseEvent};

/// Prefix of SSE payload lines, space included. Lines without it
/// (`event:` lines, blank keep-alives, comments) carry no payload.
const DATA_PREFIX: &str = "data: ";

/// Telemetry extracted from one upstream response.
///
/// For streams this is the fold of all `data:` events in arrival order;
/// `text` is a lossy summary built from text deltas only.
#[derive(Debug, Default, PartialEq)]
pub struct StreamTelemetry {
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub text: String,
}

impl StreamTelemetry {
    /// Extract telemetry from the accumulated text of an SSE stream.
    ///
    /// Unparseable lines are skipped; unknown event and delta types
    /// contribute nothing. This never fails, a stream with no valid events
    /// yields an empty default.
    pub fn from_sse(raw: &str) -> Self {
        let mut telemetry = Self::default();

        for line in raw.split('\n') {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<SseEvent>(payload) else {
                continue;
            };
            telemetry.apply(event);
        }

        telemetry
    }

    fn apply(&mut self, event: SseEvent) {
        match event {
            SseEvent::MessageStart {
                message: Some(message),
            } => {
                if let Some(usage) = message.usage
                    && let Some(input_tokens) = usage.input_tokens
                {
                    self.input_tokens = Some(input_tokens);
                }
                // First message_start wins; a later one must not override.
                if self.model.is_none() {
                    self.model = message.model;
                }
            }
            SseEvent::ContentBlockDelta {
                delta: Some(ContentDelta::Text { text }),
            } => {
                self.text.push_str(&text);
            }
            SseEvent::MessageDelta { usage: Some(usage) } => {
                // May arrive multiple times with updated counts; last wins.
                if let Some(output_tokens) = usage.output_tokens {
                    self.output_tokens = Some(output_tokens);
                }
            }
            _ => {}
        }
    }
}

/// Pull `usage.input_tokens` / `usage.output_tokens` out of a complete
/// (non-stream) JSON response. Absence of the field is a missing-data
/// outcome, not an error.
pub fn extract_json_usage(value: &serde_json::Value) -> (Option<u64>, Option<u64>) {
    let usage = value.get("usage");
    let input = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(|v| v.as_u64());
    let output = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(|v| v.as_u64());
    (input, output)
}

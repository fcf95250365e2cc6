use serde::Deserialize;

/// Claude SSE event, tagged by the `type` field.
///
/// Only `message_start`, `content_block_delta` and `message_delta` carry
/// telemetry-relevant payloads; the rest drive the client's rendering state
/// machine and are ignored here. Unknown tags deserialize into [`SseEvent::Unknown`]
/// so new event types added upstream never break extraction.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum SseEvent {
    #[serde(rename = "message_start")]
    MessageStart {
        #[serde(default)]
        message: Option<StartedMessage>,
    },

    #[serde(rename = "content_block_start")]
    ContentBlockStart,

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        #[serde(default)]
        delta: Option<ContentDelta>,
    },

    #[serde(rename = "content_block_stop")]
    ContentBlockStop,

    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },

    #[serde(rename = "message_stop")]
    MessageStop,

    #[serde(rename = "ping")]
    Ping,

    #[serde(other)]
    Unknown,
}

/// Message metadata carried by `message_start`.
#[derive(Debug, Deserialize)]
pub struct StartedMessage {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub usage: Option<StartUsage>,
}

#[derive(Debug, Deserialize)]
pub struct StartUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaUsage {
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

/// Delta payload of a `content_block_delta` event, tagged by its nested `type`.
///
/// Only `text_delta` feeds the reconstructed text; tool input and thinking
/// deltas are not part of the exchange's summary view.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    #[serde(rename = "text_delta")]
    Text { text: String },

    #[serde(rename = "input_json_delta")]
    InputJson { partial_json: String },

    #[serde(rename = "thinking_delta")]
    Thinking,

    #[serde(rename = "signature_delta")]
    Signature,

    #[serde(other)]
    Unknown,
}

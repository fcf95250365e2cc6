use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One logged request/response pair.
///
/// Fields other than the identity fields are append-only: they go from
/// `None` to `Some` exactly once and are never reset within the life of an
/// exchange. `model` is first-write-wins across the request body and any
/// `message_start` event seen later in the stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
    pub id: u64,
    /// Creation instant, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub raw_request_body: Option<String>,
    pub response_status: Option<u16>,
    pub response_text: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub elapsed_ms: Option<u64>,
    pub streaming: bool,
}

/// In-memory store of captured exchanges.
///
/// Appends and id assignment are concurrency-safe; each exchange is only
/// ever mutated by the task that created it (via its [`ExchangeHandle`]),
/// so no locking beyond the map's own sharding is needed.
pub struct CaptureStore {
    entries: DashMap<u64, CapturedExchange>,
    counter: AtomicU64,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// Create a new exchange for a qualifying request and return the handle
    /// used to fill it in as the response arrives.
    ///
    /// `model` and `session_id` are best-effort parsed from the request
    /// body; a malformed body leaves both unset and is never an error.
    pub fn begin(
        self: &Arc<Self>,
        method: &str,
        path: &str,
        raw_body: Option<String>,
    ) -> ExchangeHandle {
        let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        let (model, session_id) = raw_body
            .as_deref()
            .and_then(|body| serde_json::from_str::<serde_json::Value>(body).ok())
            .map(|json| {
                let model = json
                    .get("model")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                let session_id = json
                    .get("metadata")
                    .and_then(|m| m.get("user_id"))
                    .and_then(|v| v.as_str())
                    .map(String::from);
                (model, session_id)
            })
            .unwrap_or((None, None));

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        debug!(id, method, path, "Capturing exchange");

        self.entries.insert(
            id,
            CapturedExchange {
                id,
                timestamp,
                method: method.to_string(),
                path: path.to_string(),
                model,
                session_id,
                raw_request_body: raw_body,
                response_status: None,
                response_text: None,
                input_tokens: None,
                output_tokens: None,
                elapsed_ms: None,
                streaming: false,
            },
        );

        ExchangeHandle {
            id,
            store: self.clone(),
        }
    }

    /// Exchanges in creation order, optionally filtered by session and model.
    pub fn snapshot(&self, session_id: Option<&str>, model: Option<&str>) -> Vec<CapturedExchange> {
        let mut entries: Vec<CapturedExchange> = self
            .entries
            .iter()
            .filter(|entry| {
                let e = entry.value();
                if let Some(session_id) = session_id
                    && e.session_id.as_deref() != Some(session_id)
                {
                    return false;
                }
                if let Some(model) = model
                    && e.model.as_deref() != Some(model)
                {
                    return false;
                }
                true
            })
            .map(|entry| entry.value().clone())
            .collect();

        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Distinct session ids seen so far.
    pub fn sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().session_id.clone())
            .collect();
        sessions.sort();
        sessions.dedup();
        sessions
    }

    /// Distinct model names seen so far.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.value().model.clone())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for in-place updates to one exchange.
///
/// Cloned into the stream tee's completion path; there is never more than
/// one task writing through handles for the same exchange.
#[derive(Clone)]
pub struct ExchangeHandle {
    id: u64,
    store: Arc<CaptureStore>,
}

impl ExchangeHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_response_status(&self, status: u16) {
        if let Some(mut e) = self.store.entries.get_mut(&self.id)
            && e.response_status.is_none()
        {
            e.response_status = Some(status);
        }
    }

    pub fn set_elapsed(&self, elapsed: Duration) {
        if let Some(mut e) = self.store.entries.get_mut(&self.id)
            && e.elapsed_ms.is_none()
        {
            e.elapsed_ms = Some(elapsed.as_millis() as u64);
        }
    }

    pub fn set_response_text(&self, text: String) {
        if let Some(mut e) = self.store.entries.get_mut(&self.id)
            && e.response_text.is_none()
        {
            e.response_text = Some(text);
        }
    }

    pub fn set_tokens(&self, input: Option<u64>, output: Option<u64>) {
        if let Some(mut e) = self.store.entries.get_mut(&self.id) {
            if input.is_some() && e.input_tokens.is_none() {
                e.input_tokens = input;
            }
            if output.is_some() && e.output_tokens.is_none() {
                e.output_tokens = output;
            }
        }
    }

    pub fn set_streaming(&self) {
        if let Some(mut e) = self.store.entries.get_mut(&self.id) {
            e.streaming = true;
        }
    }

    pub fn set_model_if_unset(&self, model: Option<&str>) {
        if let Some(model) = model
            && let Some(mut e) = self.store.entries.get_mut(&self.id)
            && e.model.is_none()
        {
            e.model = Some(model.to_string());
        }
    }
}

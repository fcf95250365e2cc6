use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::debug;

use crate::capture::ExchangeHandle;
use crate::telemetry::StreamTelemetry;

/// Type alias for the upstream response body
pub type UpstreamBody = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Incremental UTF-8 decoder for byte streams.
///
/// A multi-byte sequence split at a chunk boundary is held back (at most
/// three bytes) and completed by the next chunk; decoding each chunk
/// independently would corrupt it. Invalid sequences decode to the
/// replacement character and never fail.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    text: String,
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.pending.is_empty() {
            self.decode(chunk);
        } else {
            let mut carried = std::mem::take(&mut self.pending);
            carried.extend_from_slice(chunk);
            self.decode(&carried);
        }
    }

    fn decode(&mut self, mut bytes: &[u8]) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&bytes[..valid_up_to]) {
                        self.text.push_str(valid);
                    }
                    match e.error_len() {
                        Some(invalid_len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            bytes = &bytes[valid_up_to + invalid_len..];
                        }
                        None => {
                            // Sequence truncated at the chunk boundary.
                            self.pending = bytes[valid_up_to..].to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush the accumulator. A dangling partial sequence at end of stream
    /// decodes to the replacement character.
    pub fn finish(&mut self) -> String {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        std::mem::take(&mut self.text)
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.pending.is_empty()
    }
}

/// Relay that forwards every upstream chunk unchanged while accumulating
/// decoded text for telemetry extraction.
///
/// Forwarding is the priority: capture never alters bytes, ordering or
/// status, and extraction runs exactly once, when the producer is
/// exhausted or errors. Dropping the tee before exhaustion (caller
/// disconnect) still finalizes, committing whatever was accumulated.
pub struct TeeStream {
    upstream: UpstreamBody,
    decoder: Utf8Accumulator,
    exchange: ExchangeHandle,
    started: Instant,
    finished: bool,
}

impl TeeStream {
    pub fn new(upstream: UpstreamBody, exchange: ExchangeHandle, started: Instant) -> Self {
        Self {
            upstream,
            decoder: Utf8Accumulator::new(),
            exchange,
            started,
            finished: false,
        }
    }

    fn finalize(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let accumulated = self.decoder.finish();
        let telemetry = StreamTelemetry::from_sse(&accumulated);

        debug!(
            exchange_id = self.exchange.id(),
            bytes = accumulated.len(),
            input_tokens = ?telemetry.input_tokens,
            output_tokens = ?telemetry.output_tokens,
            "Stream drained, committing telemetry"
        );

        self.exchange.set_elapsed(self.started.elapsed());
        self.exchange.set_model_if_unset(telemetry.model.as_deref());
        self.exchange
            .set_tokens(telemetry.input_tokens, telemetry.output_tokens);
        self.exchange.set_response_text(telemetry.text);
    }
}

impl Stream for TeeStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.upstream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.decoder.push(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                // Partial capture: commit what arrived before the error.
                this.finalize();
                Poll::Ready(Some(Err(io::Error::other(e))))
            }
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TeeStream {
    fn drop(&mut self) {
        self.finalize();
    }
}

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;
use tracing::trace;

use crate::error::ChatError;
use crate::http::{HttpBodyStream, HttpStreamResponse};
use crate::provider::error::status_error;

const DONE_SENTINEL: &str = "[DONE]";

/// Decodes an event-stream body into parsed JSON payloads.
///
/// Bytes are buffered until a blank-line boundary is seen; everything before the last
/// boundary is flushed as complete frames and the tail waits for the next read, so the
/// output does not depend on how the body is chunked. `[DONE]` ends decoding at once,
/// discarding anything buffered after it. Frames without `data:` lines or with payloads
/// that are not JSON are skipped.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    pending: VecDeque<Value>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

enum Frame {
    Data(Value),
    Done,
    Skip,
}

impl SseDecoder {
    /// Wraps a raw HTTP body stream.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    /// Returns `true` once the `[DONE]` sentinel was decoded.
    pub fn done_received(&self) -> bool {
        self.done_received
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        // CRLF framing is folded to LF; JSON payloads never carry raw carriage returns
        self.buffer
            .extend(bytes.iter().copied().filter(|byte| *byte != b'\r'));
    }

    fn flush_complete_frames(&mut self) {
        let Some(boundary) = self.buffer.windows(2).rposition(|pair| pair == b"\n\n") else {
            return;
        };
        let block: Vec<u8> = self.buffer.drain(..boundary + 2).collect();
        self.flush_block(&block[..boundary]);
    }

    fn flush_block(&mut self, block: &[u8]) {
        let text = String::from_utf8_lossy(block);
        for event in text.split("\n\n") {
            match parse_frame(event) {
                Frame::Data(value) => self.pending.push_back(value),
                Frame::Done => {
                    self.done_received = true;
                    self.buffer.clear();
                    return;
                }
                Frame::Skip => {
                    if !event.trim().is_empty() {
                        trace!(provider = self.provider, "skipping undecodable stream frame");
                    }
                }
            }
        }
    }
}

fn parse_frame(event: &str) -> Frame {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if data.is_empty() {
        return Frame::Skip;
    }
    let payload = data.join("\n");
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }
    serde_json::from_str(&payload)
        .map(Frame::Data)
        .unwrap_or(Frame::Skip)
}

impl Stream for SseDecoder {
    type Item = Result<Value, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(value) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if this.done_received || this.stream_closed {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.push_bytes(&bytes);
                    this.flush_complete_frames();
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.stream_closed = true;
                    if !this.buffer.is_empty() {
                        let rest = std::mem::take(&mut this.buffer);
                        this.flush_block(&rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Turns a streaming response into an [`SseDecoder`], or into an error for failed statuses.
///
/// # Errors
///
/// For non-2xx responses the body is drained and the provider's `error.message` is
/// surfaced, falling back to the raw body text.
pub async fn open_event_stream(
    response: HttpStreamResponse,
    provider: &'static str,
) -> Result<SseDecoder, ChatError> {
    if !response.is_success() {
        let status = response.status;
        let headers = response.headers.clone();
        let text = response.collect_text().await?;
        return Err(status_error(provider, status, &headers, &text));
    }
    Ok(SseDecoder::new(response.body, provider))
}

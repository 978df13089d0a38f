//! Streaming chat response decoder with result accumulation.

use crate::error::Error;
use crate::sse::SseParser;
use crate::types::{decode_payload, ChatResponse, ChatResult, FunctionCall, Usage};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tracing::{debug, trace};

/// Byte stream of a live HTTP response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pin_project! {
    /// A streaming chat response.
    ///
    /// Yields one [`ChatResponse`] per SSE event, in server order, and ends on the
    /// `[DONE]` sentinel or after a chunk flagged `is_end`. An embedded error
    /// payload is yielded as [`Error::Api`]; a body that closes before either end
    /// marker is yielded as [`Error::Transport`]. Nothing is yielded after an error.
    ///
    /// The underlying body is dropped as soon as the stream ends, fails, or is
    /// closed; dropping the `ChatStream` itself releases it as well.
    pub struct ChatStream<S> {
        #[pin]
        inner: Option<S>,
        parser: SseParser,
        acc: Accumulator,
        // Last chunk had `is_end`; finish on the next pull without reading further.
        ended: bool,
        done: bool,
    }
}

impl<S> ChatStream<S> {
    /// Wrap a raw SSE byte stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            parser: SseParser::new(),
            acc: Accumulator::default(),
            ended: false,
            done: false,
        }
    }

    /// Get current accumulated content without finalizing.
    pub fn current_content(&self) -> &str {
        &self.acc.content
    }

    /// Check if stream is done. A done stream holds no connection.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume the stream handle and return everything accumulated so far.
    pub fn finalize(self) -> ChatResult {
        self.acc.into_result()
    }
}

impl<S> fmt::Debug for ChatStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("content_len", &self.acc.content.len())
            .field("ended", &self.ended)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<S: Unpin> ChatStream<S> {
    /// Stop consuming and release the underlying body. Further pulls yield `None`.
    pub fn close(&mut self) {
        if !self.done {
            debug!("chat stream closed by caller");
        }
        let mut this = Pin::new(self).project();
        *this.done = true;
        this.inner.set(None);
    }
}

impl<S, E> ChatStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<Error>,
{
    /// Get the next chunk from the stream.
    pub async fn next(&mut self) -> Option<Result<ChatResponse, Error>> {
        futures::StreamExt::next(self).await
    }
}

impl<S, E> Stream for ChatStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Error>,
{
    type Item = Result<ChatResponse, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }
        if *this.ended {
            debug!("chat stream finished on is_end chunk");
            *this.done = true;
            this.inner.set(None);
            return Poll::Ready(None);
        }

        loop {
            // First, try to get an event from buffered data
            if let Some(event) = this.parser.next_event() {
                if SseParser::is_done(&event.data) {
                    debug!("chat stream finished on sentinel");
                    *this.done = true;
                    this.inner.set(None);
                    return Poll::Ready(None);
                }

                return match decode_payload::<ChatResponse>(event.data.as_bytes()) {
                    Ok(chunk) => {
                        trace!(sentence_id = ?chunk.sentence_id, "chat stream chunk");
                        this.acc.apply(&chunk);
                        if chunk.is_end == Some(true) {
                            *this.ended = true;
                        }
                        Poll::Ready(Some(Ok(chunk)))
                    }
                    Err(e) => {
                        debug!(error = %e, "chat stream terminated by payload");
                        *this.done = true;
                        this.inner.set(None);
                        Poll::Ready(Some(Err(e)))
                    }
                };
            }

            // Need more data from the body
            let Some(inner) = this.inner.as_mut().as_pin_mut() else {
                *this.done = true;
                return Poll::Ready(None);
            };

            match ready!(inner.poll_next(cx)) {
                Some(Ok(bytes)) => {
                    this.parser.feed(&bytes);
                }
                Some(Err(e)) => {
                    let err: Error = e.into();
                    debug!(error = %err, "chat stream body failed");
                    *this.done = true;
                    this.inner.set(None);
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    *this.done = true;
                    this.inner.set(None);
                    // An unterminated final `data: [DONE]` still counts as the sentinel.
                    if let Some(event) = this.parser.finish() {
                        if SseParser::is_done(&event.data) {
                            debug!("chat stream finished on sentinel");
                            return Poll::Ready(None);
                        }
                    }
                    debug!("chat stream closed before end of response");
                    return Poll::Ready(Some(Err(Error::transport(
                        "stream closed before end of response",
                    ))));
                }
            }
        }
    }
}

/// Running totals across chunks.
#[derive(Debug, Default)]
struct Accumulator {
    id: Option<String>,
    content: String,
    usage: Usage,
    function_call: Option<FunctionCall>,
    finish_reason: Option<String>,
}

impl Accumulator {
    fn apply(&mut self, chunk: &ChatResponse) {
        if chunk.id.is_some() {
            self.id.clone_from(&chunk.id);
        }
        self.content.push_str(chunk.text());
        // Usage is cumulative per chunk; keep the latest.
        if let Some(usage) = &chunk.usage {
            self.usage = usage.clone();
        }
        if chunk.function_call.is_some() {
            self.function_call.clone_from(&chunk.function_call);
        }
        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
    }

    fn into_result(self) -> ChatResult {
        ChatResult {
            id: self.id,
            content: self.content,
            usage: self.usage,
            function_call: self.function_call,
            finish_reason: self.finish_reason,
        }
    }
}

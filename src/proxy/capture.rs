//! Tee for streamed response bodies.
//!
//! [`CaptureStream`] forwards every upstream chunk unchanged while copying it
//! into a buffer and noting when the first chunk arrived. The completion
//! callback fires exactly once: when the upstream stream ends, or when the
//! stream is dropped early because the client disconnected.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CapturedBody {
    pub body: Bytes,
    /// `None` if no chunk was ever received.
    pub time_to_first_byte: Option<Duration>,
    /// Time from request start until the stream finished or was dropped.
    pub elapsed: Duration,
}

type OnFinish = Box<dyn FnOnce(CapturedBody) + Send>;

pub struct CaptureStream<S> {
    inner: S,
    started: Instant,
    buffer: BytesMut,
    first_byte: Option<Duration>,
    on_finish: Option<OnFinish>,
}

impl<S> CaptureStream<S> {
    pub fn new<F>(inner: S, started: Instant, on_finish: F) -> Self
    where
        F: FnOnce(CapturedBody) + Send + 'static,
    {
        Self {
            inner,
            started,
            buffer: BytesMut::new(),
            first_byte: None,
            on_finish: Some(Box::new(on_finish)),
        }
    }

    fn finish(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(CapturedBody {
                body: std::mem::take(&mut self.buffer).freeze(),
                time_to_first_byte: self.first_byte,
                elapsed: self.started.elapsed(),
            });
        }
    }
}

impl<S, E> Stream for CaptureStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_next(cx);
        match &poll {
            Poll::Ready(Some(Ok(chunk))) => {
                if this.first_byte.is_none() {
                    this.first_byte = Some(this.started.elapsed());
                }
                this.buffer.extend_from_slice(chunk);
            }
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }
        poll
    }
}

impl<S> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        self.finish();
    }
}

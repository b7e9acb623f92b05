//! Timeout wrapper for relayed upstream response bodies.
//!
//! Streaming responses are relayed frame by frame. A stalled or endless
//! upstream would otherwise pin the client connection forever, so the body
//! is cut off when it goes quiet for too long or lives too long overall.

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, Sleep, sleep};

/// Deadlines applied to one streamed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimeouts {
    /// Maximum gap between two frames.
    pub idle: Duration,
    /// Maximum time from the first poll to end of stream.
    pub total: Duration,
}

impl StreamTimeouts {
    /// Create a new timeout pair.
    pub fn new(idle: Duration, total: Duration) -> Self {
        Self { idle, total }
    }
}

/// A streamed body exceeded one of its deadlines.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTimeoutError {
    #[error("no data from upstream for {0:?}")]
    Idle(Duration),
    #[error("upstream stream exceeded {0:?}")]
    Total(Duration),
}

/// Body wrapper enforcing [`StreamTimeouts`].
///
/// The idle deadline is re-armed each time a frame arrives. The total
/// deadline starts on the first poll, not on construction, so time spent
/// before the client starts reading does not count.
pub struct TimeoutBody<B> {
    inner: B,
    timeouts: StreamTimeouts,
    idle_deadline: Pin<Box<Sleep>>,
    total_deadline: Pin<Box<Sleep>>,
    started: bool,
    finished: bool,
}

impl<B> TimeoutBody<B> {
    /// Wrap `inner` with the given deadlines.
    pub fn new(inner: B, timeouts: StreamTimeouts) -> Self {
        Self {
            inner,
            timeouts,
            idle_deadline: Box::pin(sleep(timeouts.idle)),
            total_deadline: Box::pin(sleep(timeouts.total)),
            started: false,
            finished: false,
        }
    }

    /// The deadlines this body enforces.
    pub fn timeouts(&self) -> StreamTimeouts {
        self.timeouts
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if this.finished {
            return Poll::Ready(None);
        }

        if !this.started {
            this.started = true;
            let now = Instant::now();
            this.total_deadline.as_mut().reset(now + this.timeouts.total);
            this.idle_deadline.as_mut().reset(now + this.timeouts.idle);
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                let next = Instant::now() + this.timeouts.idle;
                this.idle_deadline.as_mut().reset(next);
                return Poll::Ready(Some(Ok(frame)));
            }
            Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => {
                this.finished = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if this.total_deadline.as_mut().poll(cx).is_ready() {
            this.finished = true;
            return Poll::Ready(Some(Err(
                StreamTimeoutError::Total(this.timeouts.total).into()
            )));
        }

        if this.idle_deadline.as_mut().poll(cx).is_ready() {
            this.finished = true;
            return Poll::Ready(Some(Err(
                StreamTimeoutError::Idle(this.timeouts.idle).into()
            )));
        }

        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        self.finished || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

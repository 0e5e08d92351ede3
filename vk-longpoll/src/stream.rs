//! Continuous event stream over a long-poll session.
//!
//! Each batch returned by the session is drained in order before the next
//! poll is started, so at most one request is ever in flight.

use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, VkError};
use crate::longpoll::{Event, LongpollSession};

type PollCycle = BoxFuture<'static, (LongpollSession, Result<Vec<Event>>)>;

/// Endless stream of long-poll events.
///
/// The stream owns its session. It ends only on a fatal error (yielded once
/// as `Err`) or on cancellation (plain end of stream), and cannot be
/// restarted afterwards; build a new session instead.
///
/// # Example
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use vk_longpoll::{SessionConfig, VkClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = VkClient::new(SessionConfig::new("token").with_group_id(1))?;
/// let mut events = client.listen();
///
/// while let Some(event) = events.next().await {
///     println!("{}", event?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct EventStream {
    session: Option<LongpollSession>,
    buffered: VecDeque<Event>,
    in_flight: Option<PollCycle>,
    cancel: CancellationToken,
    terminated: bool,
}

impl EventStream {
    /// Create a stream over a session.
    pub fn new(session: LongpollSession) -> Self {
        Self::with_cancellation(session, CancellationToken::new())
    }

    /// Create a stream that ends once `cancel` is cancelled.
    pub fn with_cancellation(session: LongpollSession, cancel: CancellationToken) -> Self {
        let session = session.with_cancellation(cancel.clone());
        Self {
            session: Some(session),
            buffered: VecDeque::new(),
            in_flight: None,
            cancel,
            terminated: false,
        }
    }

    /// Token that stops this stream.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the stream has ended.
    pub fn is_terminated(&self) -> bool {
        self.terminated && self.buffered.is_empty()
    }

    fn start_cycle(&mut self) -> Option<PollCycle> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut session = self.session.take()?;
        let cancel = self.cancel.clone();

        Some(
            async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(VkError::Cancelled),
                    result = session.poll() => result,
                };
                (session, result)
            }
            .boxed(),
        )
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.session = None;
        self.in_flight = None;
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.terminated {
                return Poll::Ready(None);
            }

            let mut cycle = match this.in_flight.take().or_else(|| this.start_cycle()) {
                Some(cycle) => cycle,
                None => {
                    debug!("Event stream stopped");
                    this.terminate();
                    return Poll::Ready(None);
                }
            };

            let (session, result) = match cycle.poll_unpin(cx) {
                Poll::Pending => {
                    this.in_flight = Some(cycle);
                    return Poll::Pending;
                }
                Poll::Ready(output) => output,
            };

            match result {
                Ok(events) => {
                    this.session = Some(session);
                    this.buffered.extend(events);
                }
                Err(VkError::Cancelled) => {
                    debug!("Event stream cancelled");
                    this.terminate();
                    return Poll::Ready(None);
                }
                Err(e) => {
                    this.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.terminated {
            (self.buffered.len(), Some(self.buffered.len()))
        } else {
            (self.buffered.len(), None)
        }
    }
}

impl futures::stream::FusedStream for EventStream {
    fn is_terminated(&self) -> bool {
        EventStream::is_terminated(self)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("buffered", &self.buffered.len())
            .field("in_flight", &self.in_flight.is_some())
            .field("terminated", &self.terminated)
            .finish()
    }
}

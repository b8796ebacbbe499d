//! Asynchronous payload loading.
//!
//! The host supplies a [`PayloadLoader`] that turns a payload reference into a
//! boxed future. The engine never blocks on it: every future is wrapped in
//! [`Abortable`], tagged with the source id and its load generation, and
//! collected in a [`FuturesUnordered`] that is polled with a no-op waker once
//! per tick. Completions whose generation no longer matches the source are
//! stale and get discarded by the engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ahash::AHashMap;
use cosmos_common::SourceId;
use futures::channel::oneshot;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, trace};

use crate::error::{AudioError, AudioResult, LoadError};

/// Decoded mono sample data for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioPayload {
    /// Creates a mono payload.
    #[must_use]
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples: samples.into(),
        }
    }

    /// Creates a payload by averaging interleaved channels down to mono.
    #[must_use]
    pub fn from_interleaved(sample_rate: u32, channels: u16, data: &[f32]) -> Self {
        let channels = usize::from(channels.max(1));
        let scale = 1.0 / channels as f32;
        let samples = data
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect::<Vec<_>>();
        Self::mono(sample_rate, samples)
    }

    /// Sample rate of the stored data.
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the payload holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Raw samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Linearly interpolated sample at a fractional frame position.
    ///
    /// Positions past the end read as silence unless `looping`, in which case
    /// the read wraps to the start.
    #[must_use]
    pub fn sample_at(&self, position: f64, looping: bool) -> f32 {
        let len = self.samples.len();
        if len == 0 || position < 0.0 {
            return 0.0;
        }
        let index = position.floor() as usize;
        let frac = (position - position.floor()) as f32;
        let fetch = |i: usize| -> f32 {
            if i < len {
                self.samples[i]
            } else if looping {
                self.samples[i % len]
            } else {
                0.0
            }
        };
        let a = fetch(index);
        let b = fetch(index + 1);
        a + (b - a) * frac
    }
}

/// What the engine asks a loader to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Source waiting for the payload
    pub source: SourceId,
    /// Opaque payload reference (path, URL, procedural descriptor)
    pub payload: String,
}

/// Host-provided payload fetcher.
///
/// Implementations return a future that resolves once the payload has been
/// fetched and decoded. The engine may drop the future at any time.
pub trait PayloadLoader: Send {
    /// Starts loading `request.payload`.
    fn load(&self, request: &LoadRequest) -> BoxFuture<'static, Result<AudioPayload, LoadError>>;
}

impl<F> PayloadLoader for F
where
    F: Fn(&LoadRequest) -> BoxFuture<'static, Result<AudioPayload, LoadError>> + Send,
{
    fn load(&self, request: &LoadRequest) -> BoxFuture<'static, Result<AudioPayload, LoadError>> {
        self(request)
    }
}

/// A finished load, tagged with the generation it was issued under.
#[derive(Debug)]
pub struct LoadOutcome {
    /// Source the load belongs to
    pub source: SourceId,
    /// Load generation at submission time
    pub generation: u64,
    /// Loader result
    pub result: Result<AudioPayload, LoadError>,
}

type TaggedLoad = BoxFuture<'static, Option<LoadOutcome>>;

/// In-flight loads, at most one per source.
#[derive(Default)]
pub struct LoadQueue {
    in_flight: FuturesUnordered<TaggedLoad>,
    handles: AHashMap<SourceId, AbortHandle>,
}

impl std::fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadQueue")
            .field("pending", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl LoadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `future` for `source`, aborting any earlier load for it.
    pub fn submit(
        &mut self,
        source: SourceId,
        generation: u64,
        future: BoxFuture<'static, Result<AudioPayload, LoadError>>,
    ) {
        self.cancel(source);
        let (handle, registration) = AbortHandle::new_pair();
        let tagged = Abortable::new(future, registration).map(move |result| {
            result.ok().map(|result| LoadOutcome {
                source,
                generation,
                result,
            })
        });
        self.in_flight.push(tagged.boxed());
        self.handles.insert(source, handle);
        debug!(%source, generation, "payload load submitted");
    }

    /// Aborts the in-flight load for `source`, if any.
    pub fn cancel(&mut self, source: SourceId) -> bool {
        match self.handles.remove(&source) {
            Some(handle) => {
                handle.abort();
                debug!(%source, "payload load aborted");
                true
            }
            None => false,
        }
    }

    /// Returns true if `source` has a load in flight.
    #[must_use]
    pub fn is_pending(&self, source: SourceId) -> bool {
        self.handles.contains_key(&source)
    }

    /// Number of loads in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.handles.len()
    }

    /// Collects every load that has finished, without blocking.
    pub fn poll_ready(&mut self) -> Vec<LoadOutcome> {
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        let mut ready = Vec::new();
        while let Poll::Ready(Some(outcome)) = self.in_flight.poll_next_unpin(&mut cx) {
            // Aborted loads resolve to None and have already released their handle.
            let Some(outcome) = outcome else {
                continue;
            };
            self.handles.remove(&outcome.source);
            ready.push(outcome);
        }
        trace!(ready = ready.len(), pending = self.handles.len(), "polled loads");
        ready
    }
}

/// Completion handle returned by `play`.
///
/// Resolves with `Ok(())` once playback actually starts, or with the error
/// that prevented it. It can be awaited or checked with [`PlayTicket::try_result`].
#[derive(Debug)]
#[must_use = "a ticket reports whether playback started"]
pub struct PlayTicket {
    source: SourceId,
    state: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Ready(Option<AudioResult<()>>),
    Waiting(oneshot::Receiver<AudioResult<()>>),
}

impl PlayTicket {
    /// A ticket that is already resolved.
    pub fn resolved(source: SourceId, result: AudioResult<()>) -> Self {
        Self {
            source,
            state: TicketState::Ready(Some(result)),
        }
    }

    /// A pending ticket plus the sender that resolves it.
    pub fn pending(source: SourceId) -> (Self, oneshot::Sender<AudioResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                source,
                state: TicketState::Waiting(rx),
            },
            tx,
        )
    }

    /// Source this ticket belongs to.
    #[must_use]
    pub const fn source(&self) -> SourceId {
        self.source
    }

    /// Returns the result if the ticket has resolved.
    ///
    /// A dropped sender counts as cancellation. The result is handed out once.
    pub fn try_result(&mut self) -> Option<AudioResult<()>> {
        match &mut self.state {
            TicketState::Ready(result) => result.take(),
            TicketState::Waiting(rx) => match rx.try_recv() {
                Ok(Some(result)) => {
                    self.state = TicketState::Ready(None);
                    Some(result)
                }
                Ok(None) => None,
                Err(oneshot::Canceled) => {
                    self.state = TicketState::Ready(None);
                    Some(Err(AudioError::PlaybackCancelled(self.source)))
                }
            },
        }
    }
}

impl Future for PlayTicket {
    type Output = AudioResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let source = this.source;
        match &mut this.state {
            TicketState::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or(Err(AudioError::PlaybackCancelled(source))),
            ),
            TicketState::Waiting(rx) => match rx.poll_unpin(cx) {
                Poll::Ready(result) => {
                    this.state = TicketState::Ready(None);
                    Poll::Ready(result.unwrap_or(Err(AudioError::PlaybackCancelled(source))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn sid(raw: u64) -> SourceId {
        SourceId::from_raw(raw)
    }

    #[test]
    fn test_payload_interpolation() {
        let payload = AudioPayload::mono(10, vec![0.0, 1.0, 0.0]);
        assert!((payload.sample_at(0.5, false) - 0.5).abs() < 1e-6);
        assert!((payload.sample_at(2.5, false)).abs() < 1e-6);
        assert!((payload.sample_at(2.5, true)).abs() < 1e-6);
        assert!((payload.sample_at(3.0, true)).abs() < 1e-6);
        assert!((payload.duration() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_interleaved_downmix() {
        let payload = AudioPayload::from_interleaved(8, 2, &[1.0, 0.0, 0.5, 0.5]);
        assert_eq!(payload.samples(), &[0.5, 0.5]);
    }

    #[test]
    fn test_queue_delivers_when_ready() {
        let mut queue = LoadQueue::new();
        let (tx, rx) = oneshot::channel::<Result<AudioPayload, LoadError>>();
        queue.submit(
            sid(1),
            3,
            async move { rx.await.unwrap_or_else(|_| Err(LoadError::new("dropped"))) }.boxed(),
        );
        assert!(queue.poll_ready().is_empty());
        assert_eq!(queue.pending(), 1);

        tx.send(Ok(AudioPayload::mono(8, vec![0.0; 8]))).unwrap();
        let ready = queue.poll_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].generation, 3);
        assert!(ready[0].result.is_ok());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_cancelled_load_never_delivers() {
        let mut queue = LoadQueue::new();
        let (tx, rx) = oneshot::channel::<Result<AudioPayload, LoadError>>();
        queue.submit(
            sid(2),
            1,
            async move { rx.await.unwrap_or_else(|_| Err(LoadError::new("dropped"))) }.boxed(),
        );
        assert!(queue.cancel(sid(2)));
        let _ = tx.send(Ok(AudioPayload::mono(8, vec![])));
        assert!(queue.poll_ready().is_empty());
        assert!(!queue.is_pending(sid(2)));
    }

    #[test]
    fn test_ticket_resolution() {
        let (mut ticket, tx) = PlayTicket::pending(sid(4));
        assert!(ticket.try_result().is_none());
        tx.send(Ok(())).unwrap();
        assert_eq!(ticket.try_result(), Some(Ok(())));
        assert!(ticket.try_result().is_none());

        let (ticket, tx) = PlayTicket::pending(sid(5));
        drop(tx);
        assert_eq!(
            block_on(ticket),
            Err(AudioError::PlaybackCancelled(sid(5)))
        );

        let ready = PlayTicket::resolved(sid(6), Ok(()));
        assert_eq!(block_on(ready), Ok(()));
    }
}

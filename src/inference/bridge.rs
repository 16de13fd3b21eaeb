//! Stream bridge
//!
//! Runs a blocking streaming generation on a `spawn_blocking` worker and
//! exposes its output as an async [`Stream`]. Each stream owns its own channel
//! and its own stop flag, so a worker that outlives its consumer can only write
//! into a channel nobody reads.

use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::inference::engine::EngineError;
use crate::inference::resource::{Delta, GenerationError, GenerationRequest, ModelResource};
use crate::inference::streaming::StreamToken;
use crate::inference::ticket::Ticket;
use crate::types::CompletionChunk;

/// Async view over one streamed generation
///
/// Holds the single-flight ticket until the worker reports the end of
/// generation or the stream is dropped, whichever comes first. Only chunks
/// with text are yielded; the last one has `done` set.
pub struct CompletionStream {
    id: String,
    receiver: UnboundedReceiver<StreamToken>,
    ticket: Option<Ticket>,
    stop_signal: Arc<AtomicBool>,
    /// Last text seen, held back until we know whether it is the final chunk
    pending: Option<String>,
    failure: Option<EngineError>,
    finished: bool,
}

impl CompletionStream {
    /// Response id shared by every chunk of this stream
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true while this stream still holds the single-flight ticket
    pub fn holds_ticket(&self) -> bool {
        self.ticket.is_some()
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(ticket) = self.ticket.take() {
            tracing::debug!(id = %self.id, "Stream finished after {:?}", ticket.held_for());
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionChunk, EngineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(err) = this.failure.take() {
            return Poll::Ready(Some(Err(err)));
        }
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.receiver.poll_recv(cx)) {
                Some(StreamToken::Delta(delta)) => {
                    // Role-only and empty deltas never reach the client
                    let Some(text) = delta.into_text() else {
                        continue;
                    };
                    if let Some(previous) = this.pending.replace(text) {
                        return Poll::Ready(Some(Ok(CompletionChunk::partial(previous))));
                    }
                }
                Some(StreamToken::Done) => {
                    this.finish();
                    return Poll::Ready(this.pending.take().map(|text| Ok(CompletionChunk::terminal(text))));
                }
                Some(StreamToken::Error(err)) => {
                    tracing::warn!(id = %this.id, "Stream failed: {}", err);
                    this.finish();
                    return this.fail(EngineError::Generation(err));
                }
                None => {
                    this.finish();
                    let err = GenerationError::new("generation worker exited without finishing");
                    tracing::error!(id = %this.id, "{}", err);
                    return this.fail(EngineError::Generation(err));
                }
            }
        }
    }
}

impl CompletionStream {
    /// Flushes held text before surfacing the error
    fn fail(&mut self, err: EngineError) -> Poll<Option<Result<CompletionChunk, EngineError>>> {
        match self.pending.take() {
            Some(text) => {
                self.failure = Some(err);
                Poll::Ready(Some(Ok(CompletionChunk::partial(text))))
            }
            None => Poll::Ready(Some(Err(err))),
        }
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        if !self.finished {
            self.stop_signal.store(true, Ordering::Relaxed);
            tracing::info!(id = %self.id, "{}", EngineError::StreamAbandoned);
        }
    }
}

/// Starts a streaming generation on a blocking worker
///
/// The returned stream takes ownership of `ticket`.
pub(crate) fn spawn_stream(
    resource: Arc<dyn ModelResource>,
    request: GenerationRequest,
    ticket: Ticket,
    id: String,
) -> CompletionStream {
    let (token_tx, receiver) = mpsc::unbounded_channel();
    let stop_signal = Arc::new(AtomicBool::new(false));
    let worker_stop = stop_signal.clone();
    let worker_id = id.clone();

    tokio::task::spawn_blocking(move || {
        let mut sink = |delta: Delta| {
            if worker_stop.load(Ordering::Relaxed) {
                return ControlFlow::Break(());
            }
            match token_tx.send(StreamToken::Delta(delta)) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        };
        let result = resource.stream(&request, &mut sink);

        let terminal = match result {
            Ok(()) => StreamToken::Done,
            Err(err) => StreamToken::Error(err),
        };
        if token_tx.send(terminal).is_err() {
            tracing::debug!(id = %worker_id, "Orphaned generation worker finished");
        }
    });

    CompletionStream {
        id,
        receiver,
        ticket: Some(ticket),
        stop_signal,
        pending: None,
        failure: None,
        finished: false,
    }
}

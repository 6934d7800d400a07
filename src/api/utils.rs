use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use uuid::Uuid;

/// Wraps a response body stream to notice when the client goes away
/// before the stream completes.
///
/// Axum drops the body when the connection closes. Dropping this
/// wrapper drops the inner stream and with it the upstream completion
/// request, so the model call is aborted rather than left running.
pub struct DetectDisconnect<S> {
    inner: S,
    request_id: Uuid,
    finished: bool,
}

impl<S> DetectDisconnect<S> {
    pub fn new(inner: S, request_id: Uuid) -> Self {
        Self {
            inner,
            request_id,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<S, T, E> Stream for DetectDisconnect<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        // An error also ends the response so it counts as finished
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.finished = true;
        }
        poll
    }
}

impl<S> Drop for DetectDisconnect<S> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                request_id = %self.request_id,
                "Client disconnected before the response finished, aborting upstream"
            );
        }
    }
}

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::Instant;

use super::cancel::CancelSignal;
use super::dispatch::{StreamHandler, dispatch};
use super::error::{ClientError, ClientResult, ErrorKind, RemoteSnafu, TimeoutSnafu};
use super::event::StreamEvent;
use super::frame::{Frame, decode_line};
use super::lines::LineSplitter;

/// How one stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `[DONE]` arrived or the body ended cleanly.
    Completed,
    /// The user cancelled. Nothing was reported through `on_error`.
    Cancelled,
    Failed { kind: ErrorKind, message: String },
}

impl StreamOutcome {
    fn failed(error: &ClientError) -> Self {
        Self::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Ceiling shared by the header wait and the body read of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    after: Duration,
}

impl Deadline {
    pub fn after(after: Duration) -> Self {
        Self {
            at: Instant::now() + after,
            after,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub(crate) fn expired_error(&self, stage: &'static str) -> ClientError {
        TimeoutSnafu {
            stage,
            after: self.after,
        }
        .build()
    }
}

async fn wait_for(deadline: Option<Deadline>) -> Deadline {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(deadline.at).await;
            deadline
        }
        None => std::future::pending().await,
    }
}

/// Drives one response body through splitter, decoder and dispatcher.
///
/// Events reach `handler` strictly in wire order. Exactly one of `on_complete`
/// or `on_error` fires unless the stream is cancelled, in which case neither
/// does and no callback runs after the cancel was observed.
pub async fn consume<S, H>(
    mut bytes: S,
    handler: &mut H,
    signal: &mut CancelSignal,
    deadline: Option<Deadline>,
) -> StreamOutcome
where
    S: Stream<Item = ClientResult<Bytes>> + Unpin,
    H: StreamHandler + ?Sized,
{
    let mut splitter = LineSplitter::new();
    let expiry = wait_for(deadline);
    tokio::pin!(expiry);

    loop {
        let next = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                tracing::debug!(pending_bytes = splitter.pending(), "chat stream cancelled");
                return StreamOutcome::Cancelled;
            }
            deadline = &mut expiry => {
                let error = deadline.expired_error("read-stream");
                tracing::warn!(error = %error, "chat stream exceeded its deadline");
                handler.on_error(&error);
                return StreamOutcome::failed(&error);
            }
            next = bytes.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => {
                tracing::warn!(error = %error, "chat stream failed while reading");
                handler.on_error(&error);
                return StreamOutcome::failed(&error);
            }
            None => {
                let discarded = splitter.finish();
                if discarded > 0 {
                    tracing::debug!(discarded, "dropping unterminated trailing line");
                }
                tracing::debug!("chat stream ended without sentinel");
                handler.on_complete();
                return StreamOutcome::Completed;
            }
        };

        for line in splitter.push(&chunk) {
            if signal.is_cancelled() {
                tracing::debug!("chat stream cancelled mid-chunk");
                return StreamOutcome::Cancelled;
            }

            match decode_line(&line) {
                Frame::Ignored => {}
                Frame::End => {
                    handler.on_complete();
                    return StreamOutcome::Completed;
                }
                Frame::Malformed { payload, error } => {
                    tracing::warn!(
                        error = %error,
                        payload_len = payload.len(),
                        "skipping malformed stream frame"
                    );
                }
                Frame::Event(StreamEvent::Error { message }) => {
                    let error = RemoteSnafu {
                        stage: "stream-error-event",
                        message,
                    }
                    .build();
                    tracing::warn!(error = %error, "chat service aborted the stream");
                    handler.on_error(&error);
                    return StreamOutcome::failed(&error);
                }
                Frame::Event(event) => {
                    dispatch(&event, handler);
                }
            }
        }
    }
}

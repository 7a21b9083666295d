//! Dedicated writer task: the single logical writer for a client.
//!
//! All outbound frames from concurrent callers funnel through one mpsc
//! channel into a task that owns the sink half of the connection. This
//! serializes writes without a shared mutex and gives the read loop a way to
//! swap in a fresh sink after a reconnect without disturbing in-flight
//! senders.
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► WebSocket
//! ReadLoop ─┘      (frames / sink swap)
//! ```
//!
//! Each frame carries a oneshot ack so write failures surface to the caller
//! that issued them.

use futures_util::{Sink, SinkExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{DevlinkError, Result};

/// Default capacity of the writer's frame queue.
pub(crate) const DEFAULT_WRITER_CAPACITY: usize = 64;

pub(crate) enum WriterCommand<S> {
    /// Write one text frame; `done` resolves with the write outcome.
    Frame {
        text: String,
        done: oneshot::Sender<Result<()>>,
    },
    /// Replace the sink after a reconnect, closing the old one.
    Swap(S),
    /// Close the sink and stop.
    Shutdown,
}

/// Handle for sending frames to the writer task. Cheaply cloneable.
pub(crate) struct WriterHandle<S> {
    tx: mpsc::Sender<WriterCommand<S>>,
}

impl<S> Clone for WriterHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> WriterHandle<S> {
    /// Write a single text frame, waiting for the write to complete.
    pub async fn write(&self, text: String) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.tx
            .send(WriterCommand::Frame { text, done })
            .await
            .map_err(|_| DevlinkError::ConnectionClosed)?;
        ack.await.map_err(|_| DevlinkError::ConnectionClosed)?
    }

    /// Install a new sink, closing the previous one.
    pub async fn swap(&self, sink: S) {
        let _ = self.tx.send(WriterCommand::Swap(sink)).await;
    }

    /// Close the sink and terminate the writer task.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriterCommand::Shutdown).await;
    }
}

/// Spawn the writer task owning `sink`; returns the handle feeding it.
pub(crate) fn spawn_writer_task<S>(sink: S, capacity: usize) -> (WriterHandle<S>, JoinHandle<()>)
where
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, sink));
    (WriterHandle { tx }, task)
}

async fn writer_loop<S>(mut rx: mpsc::Receiver<WriterCommand<S>>, mut sink: S)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Frame { text, done } => {
                let outcome = sink
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(DevlinkError::from);
                if let Err(ref e) = outcome {
                    tracing::debug!(error = %e, "frame write failed");
                }
                let _ = done.send(outcome);
            }
            WriterCommand::Swap(new_sink) => {
                let _ = sink.close().await;
                sink = new_sink;
            }
            WriterCommand::Shutdown => break,
        }
    }
    let _ = sink.close().await;
}

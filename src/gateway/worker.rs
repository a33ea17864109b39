//! Per-session outbound workers.
//!
//! Each IRC session gets one worker that runs its [`RemoteOp`]s in the
//! order they were issued, so a client's messages reach the remote in the
//! order it sent them. A slow call only ever delays its own session.
//!
//! A worker outlives its session: once the [`Worker`] is dropped it finishes
//! what was already queued and exits. Only cancelling its token, which
//! happens when the gateway stops, abandons work.

use crate::backend::BackendHandle;
use crate::config::UploadConfig;
use crate::irc::SessionId;
use crate::translate::{Completion, RemoteOp};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

/// Requests a session may have queued behind the one in flight.
const WORKER_QUEUE: usize = 64;

pub(super) struct Worker {
    tx: mpsc::Sender<RemoteOp>,
}

impl Worker {
    pub fn spawn(
        session: SessionId,
        backend: BackendHandle,
        uploads: Arc<UploadConfig>,
        done: mpsc::Sender<Completion>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        let span = info_span!("worker", session);
        tokio::spawn(run(rx, backend, uploads, done, cancel).instrument(span));
        Self { tx }
    }

    /// Queue `op`. Hands it back when the session has too much in flight.
    pub fn submit(&self, op: RemoteOp) -> Result<(), RemoteOp> {
        self.tx.try_send(op).map_err(|e| match e {
            TrySendError::Full(op) | TrySendError::Closed(op) => op,
        })
    }
}

async fn run(
    mut rx: mpsc::Receiver<RemoteOp>,
    backend: BackendHandle,
    uploads: Arc<UploadConfig>,
    done: mpsc::Sender<Completion>,
    cancel: CancellationToken,
) {
    loop {
        let op = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            op = rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };
        let command = op.command;
        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(command, "gateway stopping, remote call abandoned");
                break;
            }
            completion = op.execute(&backend, &uploads) => completion,
        };
        if done.send(completion).await.is_err() {
            break;
        }
    }
    debug!("worker stopped");
}

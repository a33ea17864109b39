//! The single task that owns the engine and every session.
//!
//! Backend events, client commands and remote completions all arrive here
//! and are applied one at a time. Nothing in this loop awaits on the
//! network; slow work lives in the session workers.

use super::worker::Worker;
use crate::backend::{BackendHandle, SessionEvent};
use crate::config::UploadConfig;
use crate::error::CommandError;
use crate::irc::{ClientEvent, IrcSession, SessionId, SessionRegistry};
use crate::translate::{Completion, TranslationEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// How long closing sessions get to flush their last lines.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub(super) struct Coordinator {
    pub engine: TranslationEngine,
    pub sessions: SessionRegistry,
    pub workers: HashMap<SessionId, Worker>,
    pub backend: BackendHandle,
    pub uploads: Arc<UploadConfig>,
    pub done_tx: mpsc::Sender<Completion>,
    /// Parent of every worker's token. Cancelled only when the gateway stops.
    pub workers_cancel: CancellationToken,
}

impl Coordinator {
    #[instrument(skip_all, name = "coordinator")]
    pub async fn run(
        mut self,
        mut backend_rx: mpsc::Receiver<SessionEvent>,
        mut client_rx: mpsc::Receiver<ClientEvent>,
        mut done_rx: mpsc::Receiver<Completion>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(sessions = self.sessions.len(), "shutting down");
                    self.close_all("Gateway shutting down", &mut client_rx).await;
                    return Ok(());
                }
                event = backend_rx.recv() => match event {
                    Some(SessionEvent::Fatal(e)) => {
                        error!(error = %e, "backend connection lost for good");
                        self.close_all(&format!("Backend connection lost: {e}"), &mut client_rx)
                            .await;
                        return Err(e.into());
                    }
                    Some(event) => self.backend_event(event),
                    None => {
                        self.close_all("Backend connection lost", &mut client_rx).await;
                        anyhow::bail!("backend session ended unexpectedly");
                    }
                },
                Some(event) = client_rx.recv() => self.client_event(event),
                Some(completion) = done_rx.recv() => {
                    self.engine.complete(completion, &mut self.sessions);
                }
            }
        }
    }

    fn backend_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ready {
                login,
                channels,
                users,
            } => self
                .engine
                .handle_ready(login, channels, users, &mut self.sessions),
            SessionEvent::Event(event) => self.engine.handle_event(event, &mut self.sessions),
            SessionEvent::Reconnecting { attempt, delay } => {
                self.engine
                    .handle_reconnecting(attempt, delay, &self.sessions)
            }
            SessionEvent::Fatal(_) => {}
        }
    }

    fn client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Attached { id, addr, handle } => {
                let worker = Worker::spawn(
                    id,
                    self.backend.clone(),
                    Arc::clone(&self.uploads),
                    self.done_tx.clone(),
                    self.workers_cancel.child_token(),
                );
                self.workers.insert(id, worker);
                self.sessions.insert(IrcSession::new(handle, addr));
            }
            ClientEvent::Command { id, command } => {
                let name = command.name().to_string();
                let ops = self.engine.handle_command(id, command, &mut self.sessions);
                for op in ops {
                    let Some(worker) = self.workers.get(&id) else {
                        break;
                    };
                    if let Err(op) = worker.submit(op) {
                        warn!(session = id, command = op.command, "worker queue full, request dropped");
                        self.refuse(id, &name);
                    }
                }
            }
            ClientEvent::Detached { id } => self.detach(id),
        }
    }

    fn refuse(&self, id: SessionId, command: &str) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let error = CommandError::Usage(format!("{command}: too many requests in flight, try again"));
        if let Some(reply) = error.to_irc_reply(self.engine.server_name(), session.reply_nick(), command) {
            session.send(reply);
        }
    }

    fn detach(&mut self, id: SessionId) {
        // The worker drains what the session already asked for.
        self.workers.remove(&id);
        self.engine.session_closed(id);
        if self.sessions.remove(id).is_some() {
            debug!(session = id, remaining = self.sessions.len(), "session removed");
        }
    }

    /// Close every session with `reason` and wait (briefly) for them to detach.
    async fn close_all(&mut self, reason: &str, client_rx: &mut mpsc::Receiver<ClientEvent>) {
        self.sessions.close_all(reason);
        let deadline = tokio::time::sleep(CLOSE_GRACE);
        tokio::pin!(deadline);
        while !self.sessions.is_empty() {
            tokio::select! {
                _ = &mut deadline => break,
                event = client_rx.recv() => match event {
                    Some(ClientEvent::Detached { id }) => self.detach(id),
                    Some(ClientEvent::Attached { handle, .. }) => handle.close(reason),
                    Some(ClientEvent::Command { .. }) => {}
                    None => break,
                },
            }
        }
        self.workers_cancel.cancel();
    }
}

//! Gateway Supervisor - wires the two legs together and runs them.
//!
//! ```text
//!  IRC clients ──► listener ──► Connection tasks ─┐
//!                                                 ├─► coordinator ─► TranslationEngine
//!  remote ──► BackendSession ─────────────────────┘        │
//!                                                          └─► per-session workers ─► remote
//! ```
//!
//! [`Gateway::run`] returns `Ok` on a requested shutdown and `Err` when the
//! backend session gives up; the binary maps that to its exit status.

mod coordinator;
mod listener;
mod worker;

use crate::backend::{Backend, BackendSession};
use crate::config::{Config, Credentials};
use crate::translate::TranslationEngine;
use coordinator::Coordinator;
use listener::Listener;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Queue depth between the producers and the coordinator.
const EVENT_QUEUE: usize = 1024;

pub struct Gateway {
    listener: TcpListener,
    config: Config,
    credentials: Credentials,
    backend: Arc<dyn Backend>,
}

impl Gateway {
    /// Bind the local listener. Nothing talks to the remote yet.
    pub async fn bind(
        config: Config,
        credentials: Credentials,
        backend: Arc<dyn Backend>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.listen.address).await?;
        info!(address = %listener.local_addr()?, "IRC listener bound");
        Ok(Self {
            listener,
            config,
            credentials,
            backend,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until `shutdown` fires or the backend is lost for good.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let Self {
            listener,
            config,
            credentials,
            backend,
        } = self;

        let (session, backend_rx) = BackendSession::new(
            Arc::clone(&backend),
            credentials,
            config.reconnect.clone(),
            config.gateway.user_list,
            EVENT_QUEUE,
        );
        let backend_handle = session.handle();
        let backend_task = tokio::spawn(session.run());

        let (client_tx, client_rx) = mpsc::channel(EVENT_QUEUE);
        let (done_tx, done_rx) = mpsc::channel(EVENT_QUEUE);

        let stop_accepting = shutdown.child_token();
        let listener = Listener {
            listener,
            server_name: config.gateway.server_name.clone(),
            sendq: config.gateway.sendq,
            events: client_tx,
        };
        tokio::spawn(listener.run(stop_accepting.clone()));

        let engine = TranslationEngine::new(config.gateway.clone(), backend.dialect())
            .with_uploads(&config.uploads);
        let coordinator = Coordinator {
            engine,
            sessions: Default::default(),
            workers: HashMap::new(),
            backend: backend_handle,
            uploads: Arc::new(config.uploads.clone()),
            done_tx,
            workers_cancel: shutdown.child_token(),
        };
        let result = coordinator
            .run(backend_rx, client_rx, done_rx, shutdown)
            .await;

        stop_accepting.cancel();
        backend_task.abort();
        info!(ok = result.is_ok(), "gateway stopped");
        result
    }
}

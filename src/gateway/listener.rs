//! Accept loop for local IRC clients.

use crate::irc::{ClientEvent, Connection, SessionHandle, SessionId};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub(super) struct Listener {
    pub listener: TcpListener,
    pub server_name: String,
    pub sendq: usize,
    pub events: mpsc::Sender<ClientEvent>,
}

impl Listener {
    /// Accept until `shutdown` fires or the coordinator goes away.
    ///
    /// `Attached` is queued before the connection task starts, so the
    /// coordinator knows the session before its first command.
    #[instrument(skip_all, name = "listener")]
    pub async fn run(self, shutdown: CancellationToken) {
        let mut next_id: SessionId = 1;
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // Usually EMFILE; back off instead of spinning.
                    warn!(error = %e, "failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let id = next_id;
            next_id += 1;
            let (handle, outgoing) = SessionHandle::new(id, self.sendq);
            if self
                .events
                .send(ClientEvent::Attached {
                    id,
                    addr,
                    handle: handle.clone(),
                })
                .await
                .is_err()
            {
                break;
            }
            info!(session = id, %addr, "client connected");

            let connection = Connection::new(
                id,
                stream,
                addr,
                self.server_name.clone(),
                &handle,
                outgoing,
                self.events.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = connection.run().await {
                    debug!(session = id, error = %e, "connection error");
                }
            });
        }
        debug!("listener stopped");
    }
}

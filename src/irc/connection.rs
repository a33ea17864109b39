//! Connection - one accepted IRC client socket.
//!
//! Reads lines, turns them into [`ParsedCommand`]s for the coordinator and
//! writes whatever the coordinator queues on the session handle. `PING` and
//! `QUIT` are handled here; nothing else is interpreted.
//!
//! Every write yields to a close, so a client that stopped reading is hung
//! up on instead of holding the task.

use super::{ClientEvent, ParsedCommand, SessionId};
use futures_util::{Sink, SinkExt, StreamExt};
use slackirc_proto::{Command, IrcCodec, LineCodec, Message, Prefix, ProtocolError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Most lines flushed in one go before the loop looks at the socket again.
const WRITE_BATCH: usize = 64;

/// How long a departing client gets to take its last lines.
const GOODBYE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Connection {
    id: SessionId,
    stream: TcpStream,
    addr: SocketAddr,
    server_name: String,
    outgoing: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    close_reason: Box<dyn Fn() -> Option<String> + Send>,
    events: mpsc::Sender<ClientEvent>,
}

impl Connection {
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        addr: SocketAddr,
        server_name: String,
        handle: &super::SessionHandle,
        outgoing: mpsc::Receiver<Message>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        let reason_handle = handle.clone();
        Self {
            id,
            stream,
            addr,
            server_name,
            outgoing,
            cancel: handle.token(),
            close_reason: Box::new(move || reason_handle.close_reason()),
            events,
        }
    }

    /// Drive the socket until the client leaves or the session is closed.
    /// The coordinator always hears `Detached`, whatever the outcome.
    #[instrument(skip(self), fields(session = self.id, addr = %self.addr), name = "connection")]
    pub async fn run(mut self) -> Result<(), ProtocolError> {
        let result = self.event_loop().await;
        if let Err(e) = &result {
            debug!(error = %e, "connection ended with error");
        }
        let _ = self.events.send(ClientEvent::Detached { id: self.id }).await;
        info!("client disconnected");
        result
    }

    async fn event_loop(&mut self) -> Result<(), ProtocolError> {
        let (read_half, write_half) = self.stream.split();
        let mut lines = FramedRead::new(read_half, LineCodec::new());
        let mut writer = FramedWrite::new(write_half, IrcCodec::new());
        let server = Prefix::ServerName(self.server_name.clone());

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    let reason = (self.close_reason)().unwrap_or_else(|| "Closing link".to_string());
                    let outgoing = &mut self.outgoing;
                    // Whatever was queued before the close still goes out.
                    return bounded(async {
                        while let Ok(msg) = outgoing.try_recv() {
                            writer.feed(msg).await?;
                        }
                        writer.send(Message::from(Command::ERROR(reason))).await
                    })
                    .await;
                }

                line = lines.next() => {
                    let line = match line {
                        Some(Ok(line)) => line,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(()),
                    };
                    let msg = match line.parse::<Message>() {
                        Ok(msg) => msg,
                        Err(e) => {
                            debug!(error = %e, "ignoring malformed line");
                            continue;
                        }
                    };
                    let Some(command) = ParsedCommand::from_message(msg) else {
                        continue;
                    };
                    match command {
                        ParsedCommand::Ping(token) => {
                            let pong = Message::from(Command::PONG(
                                self.server_name.clone(),
                                Some(token),
                            ))
                            .with_prefix(server.clone());
                            unless_cancelled(&self.cancel, writer.send(pong)).await?;
                        }
                        ParsedCommand::Pong => {}
                        ParsedCommand::Quit(reason) => {
                            debug!(reason = reason.as_deref().unwrap_or(""), "client quit");
                            let bye = format!("Closing link ({})", reason.unwrap_or_else(|| "Client Quit".into()));
                            return bounded(writer.send(Message::from(Command::ERROR(bye)))).await;
                        }
                        command => {
                            let event = ClientEvent::Command { id: self.id, command };
                            if self.events.send(event).await.is_err() {
                                warn!("coordinator gone");
                                return Ok(());
                            }
                        }
                    }
                }

                msg = self.outgoing.recv() => {
                    let Some(msg) = msg else {
                        return Ok(());
                    };
                    // A close while the client is not reading lands in the
                    // cancelled arm on the next turn.
                    let batch = write_batch(&mut writer, msg, &mut self.outgoing);
                    unless_cancelled(&self.cancel, batch).await?;
                }
            }
        }
    }
}

/// Feed `first` and up to [`WRITE_BATCH`] queued lines, then flush once.
async fn write_batch<W>(
    writer: &mut W,
    first: Message,
    queue: &mut mpsc::Receiver<Message>,
) -> Result<(), ProtocolError>
where
    W: Sink<Message, Error = ProtocolError> + Unpin,
{
    writer.feed(first).await?;
    let mut batched = 1;
    while batched < WRITE_BATCH {
        let Ok(msg) = queue.try_recv() else {
            break;
        };
        writer.feed(msg).await?;
        batched += 1;
    }
    writer.flush().await
}

/// Run `write` unless the session is closed first. `None` means it was.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    write: impl Future<Output = Result<T, ProtocolError>>,
) -> Result<Option<T>, ProtocolError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        done = write => done.map(Some),
    }
}

/// Last writes before hanging up. A client that stopped reading is cut off.
async fn bounded(write: impl Future<Output = Result<(), ProtocolError>>) -> Result<(), ProtocolError> {
    match tokio::time::timeout(GOODBYE_TIMEOUT, write).await {
        Ok(result) => result,
        Err(_) => {
            debug!("client not reading, dropping the socket");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::SessionHandle;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn a_client_that_stops_reading_is_cut_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, addr) = listener.accept().await.unwrap();

        let (handle, outgoing) = SessionHandle::new(1, 16);
        let (events, mut rx) = mpsc::channel(4);
        let connection = Connection::new(1, stream, addr, "localhost".into(), &handle, outgoing, events);
        let task = tokio::spawn(connection.run());

        // Nobody reads `client`, so the socket fills and then the queue.
        let text = "x".repeat(400);
        let mut sent = 0;
        while handle.send(Message::notice("me", &text)) {
            sent += 1;
            assert!(sent < 1_000_000, "socket never filled up");
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.close_reason().as_deref(), Some("SendQ exceeded"));

        let detached = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("connection stuck on a full socket");
        assert!(matches!(detached, Some(ClientEvent::Detached { id: 1 })));
        assert!(task.await.unwrap().is_ok());
        drop(client);
    }

    #[tokio::test]
    async fn writes_give_way_to_a_close() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stuck = std::future::pending::<Result<(), ProtocolError>>();
        assert!(unless_cancelled(&cancel, stuck).await.unwrap().is_none());

        let live = CancellationToken::new();
        let done = unless_cancelled(&live, async { Ok::<_, ProtocolError>(7) }).await;
        assert_eq!(done.unwrap(), Some(7));
    }
}

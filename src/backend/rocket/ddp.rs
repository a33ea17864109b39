//! Minimal DDP client over a websocket.
//!
//! Two tasks per connection: a writer draining an outgoing queue, and a
//! reader that answers server pings, completes pending method calls and
//! subscriptions, and forwards everything else as raw collection frames.

use crate::error::BackendError;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const FRAME_BUFFER: usize = 256;
const CONNECT_KEY: &str = "__connect";

type Pending = Arc<DashMap<String, oneshot::Sender<Result<Value, BackendError>>>>;

pub struct DdpClient {
    out: mpsc::UnboundedSender<Value>,
    pending: Pending,
    next_id: AtomicU64,
}

impl DdpClient {
    /// Open the websocket and complete the DDP `connect` handshake.
    ///
    /// Returns the client and the stream of frames nobody was waiting for.
    pub async fn connect(url: &str) -> Result<(Arc<Self>, mpsc::Receiver<Value>), BackendError> {
        let (socket, _) = connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let pending: Pending = Arc::new(DashMap::new());

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(frame.to_string())).await {
                    debug!(error = %e, "ddp writer stopped");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = Arc::clone(&pending);
        let pong = out_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "ddp reader stopped");
                        break;
                    }
                };
                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "undecodable ddp frame");
                        continue;
                    }
                };
                if let Some(unclaimed) = route(&value, &reader_pending, &pong)
                    && frames_tx.send(unclaimed).await.is_err()
                {
                    break;
                }
            }
            // Dropping the senders fails every outstanding call.
            reader_pending.clear();
        });

        let client = Arc::new(Self {
            out: out_tx,
            pending,
            next_id: AtomicU64::new(1),
        });
        let (tx, rx) = oneshot::channel();
        client.pending.insert(CONNECT_KEY.to_string(), tx);
        client.send(json!({"msg": "connect", "version": "1", "support": ["1"]}))?;
        client.wait(rx).await?;
        Ok((client, frames_rx))
    }

    fn send(&self, frame: Value) -> Result<(), BackendError> {
        self.out
            .send(frame)
            .map_err(|_| BackendError::Network("ddp connection closed".into()))
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Allocate an id and park a reply slot for it.
    fn register(&self) -> (String, oneshot::Receiver<Result<Value, BackendError>>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        (id, rx)
    }

    async fn wait(
        &self,
        rx: oneshot::Receiver<Result<Value, BackendError>>,
    ) -> Result<Value, BackendError> {
        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BackendError::Network("ddp connection closed".into())),
            Err(_) => Err(BackendError::Network("ddp call timed out".into())),
        }
    }

    /// Invoke a server method and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        let (id, rx) = self.register();
        let _claim = Claim::new(&self.pending, &id);
        self.send(json!({"msg": "method", "method": method, "params": params, "id": &id}))?;
        self.wait(rx).await
    }

    /// Subscribe and wait for `ready`.
    pub async fn subscribe(&self, name: &str, params: Value) -> Result<(), BackendError> {
        let (id, rx) = self.register();
        let _claim = Claim::new(&self.pending, &id);
        self.send(json!({"msg": "sub", "id": &id, "name": name, "params": params}))?;
        self.wait(rx).await.map(|_| ())
    }
}

/// Drops a reply slot once its caller stops waiting, whether it got an
/// answer, failed to send, timed out or was cancelled.
struct Claim<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl<'a> Claim<'a> {
    fn new(pending: &'a Pending, id: &'a str) -> Self {
        Self { pending, id }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Handle protocol frames; return the ones meant for the event stream.
fn route(value: &Value, pending: &Pending, out: &mpsc::UnboundedSender<Value>) -> Option<Value> {
    let complete = |id: &str, result: Result<Value, BackendError>| {
        if let Some((_, tx)) = pending.remove(id) {
            let _ = tx.send(result);
        }
    };
    match value.get("msg").and_then(Value::as_str) {
        Some("ping") => {
            let _ = out.send(json!({"msg": "pong"}));
            None
        }
        Some("connected") => {
            complete(CONNECT_KEY, Ok(Value::Null));
            None
        }
        Some("failed") => {
            complete(
                CONNECT_KEY,
                Err(BackendError::Remote("ddp version refused".into())),
            );
            None
        }
        Some("result") => {
            let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
            let result = match value.get("error") {
                Some(error) => Err(call_error(error)),
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            complete(id, result);
            None
        }
        Some("ready") => {
            for id in value
                .get("subs")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                complete(id, Ok(Value::Null));
            }
            None
        }
        Some("nosub") => {
            let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
            let error = value.get("error").map(call_error);
            complete(
                id,
                Err(error.unwrap_or_else(|| BackendError::Remote("subscription refused".into()))),
            );
            None
        }
        Some("updated") | Some("pong") => None,
        _ => Some(value.clone()),
    }
}

fn call_error(error: &Value) -> BackendError {
    let reason = error
        .get("reason")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    match error.get("error") {
        Some(code) if *code == 403 || *code == "403" => BackendError::Auth(reason),
        Some(code) if *code == "too-many-requests" => BackendError::RateLimited {
            retry_after: error
                .get("details")
                .and_then(|d| d.get("timeToReset"))
                .and_then(Value::as_u64)
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(1)),
        },
        _ => BackendError::Remote(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (Pending, mpsc::UnboundedSender<Value>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(DashMap::new()), tx, rx)
    }

    #[test]
    fn ping_is_answered_locally() {
        let (pending, tx, mut rx) = harness();
        assert!(route(&json!({"msg": "ping"}), &pending, &tx).is_none());
        assert_eq!(rx.try_recv().unwrap(), json!({"msg": "pong"}));
    }

    #[tokio::test]
    async fn results_complete_pending_calls() {
        let (pending, tx, _rx) = harness();
        let (done_tx, done_rx) = oneshot::channel();
        pending.insert("7".into(), done_tx);
        route(&json!({"msg": "result", "id": "7", "result": {"rid": "R1"}}), &pending, &tx);
        assert_eq!(done_rx.await.unwrap().unwrap(), json!({"rid": "R1"}));
    }

    #[tokio::test]
    async fn login_errors_are_auth() {
        let (pending, tx, _rx) = harness();
        let (done_tx, done_rx) = oneshot::channel();
        pending.insert("1".into(), done_tx);
        route(
            &json!({"msg": "result", "id": "1", "error": {"error": 403, "reason": "User not found"}}),
            &pending,
            &tx,
        );
        assert!(matches!(done_rx.await.unwrap(), Err(BackendError::Auth(_))));
    }

    fn client() -> (DdpClient, mpsc::UnboundedReceiver<Value>) {
        let (out, rx) = mpsc::unbounded_channel();
        let client = DdpClient {
            out,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        };
        (client, rx)
    }

    #[tokio::test]
    async fn failed_sends_release_their_slot() {
        let (client, rx) = client();
        drop(rx);
        assert!(matches!(
            client.call("sendMessage", json!([])).await,
            Err(BackendError::Network(_))
        ));
        assert!(client.subscribe("stream-room-messages", json!([])).await.is_err());
        assert!(client.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_calls_release_their_slot() {
        let (client, mut rx) = client();
        let result = client.call("rooms/get", json!([])).await;
        assert!(matches!(result, Err(BackendError::Network(ref m)) if m.contains("timed out")));
        assert_eq!(rx.try_recv().unwrap()["method"], "rooms/get");
        assert!(client.pending.is_empty());
    }

    #[tokio::test]
    async fn abandoned_calls_release_their_slot() {
        let (client, _rx) = client();
        {
            let call = client.call("getUsersOfRoom", json!([]));
            tokio::pin!(call);
            assert!(futures_util::poll!(call.as_mut()).is_pending());
            assert_eq!(client.pending.len(), 1);
        }
        assert!(client.pending.is_empty());
    }

    #[test]
    fn collection_frames_pass_through() {
        let (pending, tx, _rx) = harness();
        let frame = json!({"msg": "changed", "collection": "stream-room-messages"});
        assert_eq!(route(&frame, &pending, &tx), Some(frame.clone()));
    }
}

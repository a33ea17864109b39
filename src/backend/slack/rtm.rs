//! Slack RTM websocket: event decoding and the reader task.

use super::api::SlackApi;
use super::types::{FileInfo, SlackChannel, SlackUser};
use crate::backend::{EventStream, MessageKind, NormalizedEvent, PostedMessage};
use crate::error::BackendError;
use crate::identity::{Presence, RemoteChannel};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const STREAM_BUFFER: usize = 256;

/// How long a posted message's timestamp is remembered for echo suppression.
pub const ECHO_WINDOW: Duration = Duration::from_secs(10);

/// Timestamps of messages this gateway posted, so their echoes can be skipped.
pub struct SentLog {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl SentLog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn record(&self, ts: &str) {
        self.entries.insert(ts.to_string(), Instant::now());
    }

    /// Whether `ts` is one of ours. Each timestamp is claimed at most once.
    pub fn claim(&self, ts: &str) -> bool {
        self.prune();
        self.entries.remove(ts).is_some()
    }

    fn prune(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, at| now.duration_since(*at) < self.ttl);
    }
}

/// One decoded RTM frame.
#[derive(Debug, PartialEq, Eq)]
pub enum RtmItem {
    Event(NormalizedEvent),
    /// Needs a `files.info` lookup before it can be announced.
    FileShared {
        file_id: String,
        channel: Option<String>,
        user: Option<String>,
    },
    Goodbye,
}

fn field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

/// Decode one RTM event object. Noise decodes to nothing.
pub fn decode(event: &Value) -> Vec<RtmItem> {
    let Some(kind) = field(event, "type") else {
        return Vec::new();
    };
    let item = match kind {
        "message" => decode_message(event),
        "member_joined_channel" => Some(NormalizedEvent::UserJoinedChannel {
            channel: field(event, "channel").unwrap_or_default().into(),
            user: field(event, "user").unwrap_or_default().into(),
        })
        .map(RtmItem::Event),
        "member_left_channel" => Some(NormalizedEvent::UserLeftChannel {
            channel: field(event, "channel").unwrap_or_default().into(),
            user: field(event, "user").unwrap_or_default().into(),
        })
        .map(RtmItem::Event),
        "channel_created" | "channel_joined" | "group_joined" => event
            .get("channel")
            .and_then(|c| serde_json::from_value::<SlackChannel>(c.clone()).ok())
            .map(|c| {
                let mut channel = c.into_remote();
                channel.is_member = kind != "channel_created";
                RtmItem::Event(NormalizedEvent::ChannelCreated(channel))
            }),
        "im_created" => {
            let id = event.get("channel").and_then(|c| field(c, "id"));
            match (id, field(event, "user")) {
                (Some(id), Some(user)) => Some(RtmItem::Event(NormalizedEvent::ChannelCreated(
                    RemoteChannel::direct(id, user),
                ))),
                _ => None,
            }
        }
        "user_change" | "team_join" => event
            .get("user")
            .and_then(|u| serde_json::from_value::<SlackUser>(u.clone()).ok())
            .map(|u| {
                let user = u.into_remote();
                RtmItem::Event(if kind == "user_change" {
                    NormalizedEvent::UserRenamed(user)
                } else {
                    NormalizedEvent::UserDiscovered(user)
                })
            }),
        "presence_change" => {
            let presence = Presence::from_remote(field(event, "presence").unwrap_or_default());
            let mut users: Vec<&str> = event
                .get("users")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            users.extend(field(event, "user"));
            return users
                .into_iter()
                .map(|u| {
                    RtmItem::Event(NormalizedEvent::PresenceChanged {
                        user: u.into(),
                        presence,
                    })
                })
                .collect();
        }
        "file_shared" => field(event, "file_id").map(|file_id| RtmItem::FileShared {
            file_id: file_id.to_string(),
            channel: field(event, "channel_id").map(str::to_string),
            user: field(event, "user_id").map(str::to_string),
        }),
        "goodbye" => Some(RtmItem::Goodbye),
        _ => None,
    };
    item.into_iter().collect()
}

fn decode_message(event: &Value) -> Option<RtmItem> {
    let channel = field(event, "channel")?;
    let subtype = field(event, "subtype");
    let normalized = match subtype {
        None | Some("me_message" | "slackbot_response" | "thread_broadcast" | "file_share") => {
            let text = field(event, "text").unwrap_or_default();
            if subtype == Some("file_share") && text.is_empty() {
                return None;
            }
            let ts = field(event, "ts").unwrap_or_default();
            NormalizedEvent::MessagePosted(PostedMessage {
                channel: channel.into(),
                author: Some(field(event, "user")?.into()),
                text: text.to_string(),
                ts: ts.to_string(),
                thread: field(event, "thread_ts")
                    .filter(|t| *t != ts)
                    .map(str::to_string),
                kind: if subtype == Some("me_message") {
                    MessageKind::Action
                } else {
                    MessageKind::Plain
                },
                files: Vec::new(),
            })
        }
        Some("bot_message") => {
            let mut text = field(event, "text").unwrap_or_default().to_string();
            if text.is_empty()
                && let Some(attachments) = event.get("attachments").and_then(Value::as_array)
            {
                text = attachments
                    .iter()
                    .filter_map(|a| field(a, "fallback"))
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            NormalizedEvent::MessagePosted(PostedMessage {
                channel: channel.into(),
                author: None,
                text,
                ts: field(event, "ts").unwrap_or_default().to_string(),
                thread: None,
                kind: MessageKind::Bot {
                    username: field(event, "username").unwrap_or("bot").to_string(),
                },
                files: Vec::new(),
            })
        }
        Some("message_changed") => {
            let current = event.get("message")?;
            let previous = event.get("previous_message")?;
            let (before, after) = (field(previous, "text")?, field(current, "text")?);
            if before == after {
                return None;
            }
            NormalizedEvent::MessageEdited {
                channel: channel.into(),
                author: field(current, "user")?.into(),
                previous: before.to_string(),
                current: after.to_string(),
            }
        }
        Some("message_deleted") => {
            let previous = event.get("previous_message")?;
            NormalizedEvent::MessageDeleted {
                channel: channel.into(),
                author: field(previous, "user")?.into(),
                text: field(previous, "text").unwrap_or_default().to_string(),
            }
        }
        Some("channel_topic" | "group_topic") => NormalizedEvent::TopicChanged {
            channel: channel.into(),
            author: field(event, "user").map(Into::into),
            topic: field(event, "topic").unwrap_or_default().to_string(),
        },
        Some(_) => return None,
    };
    Some(RtmItem::Event(normalized))
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = mpsc::Sender<Result<NormalizedEvent, BackendError>>;

/// Connect the websocket and start the reader task.
pub async fn open(url: &str, api: Arc<SlackApi>, sent: Arc<SentLog>) -> Result<EventStream, BackendError> {
    let mut request = url.into_client_request()?;
    if let Some(cookie) = api.credentials().and_then(|c| c.cookie).filter(|c| !c.is_empty()) {
        let raw = cookie.expose();
        let value = if raw.starts_with("d=") {
            raw.to_string()
        } else {
            format!("d={raw}")
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            request.headers_mut().insert("Cookie", value);
        }
    }
    let (socket, _) = connect_async(request).await?;
    info!("rtm websocket connected");

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(pump(socket, api, sent, tx));
    Ok(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed())
}

async fn pump(mut socket: Socket, api: Arc<SlackApi>, sent: Arc<SentLog>, tx: Sink) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;
    let mut ping_id: u64 = 0;

    loop {
        tokio::select! {
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    for event in handle_text(&text, &api, &sent).await {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(?frame, "rtm websocket closed by peer");
                    let _ = tx.send(Err(BackendError::ReconnectRequired)).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
                None => {
                    let _ = tx.send(Err(BackendError::ReconnectRequired)).await;
                    return;
                }
            },
            _ = ping.tick() => {
                ping_id += 1;
                let frame = json!({"id": ping_id, "type": "ping"}).to_string();
                if let Err(e) = socket.send(WsMessage::Text(frame)).await {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
            _ = tx.closed() => {
                let _ = socket.close(None).await;
                return;
            }
        }
    }
}

async fn handle_text(text: &str, api: &SlackApi, sent: &SentLog) -> Vec<NormalizedEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "undecodable rtm frame");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for item in decode(&value) {
        match item {
            RtmItem::Event(NormalizedEvent::MessagePosted(m)) if sent.claim(&m.ts) => {
                debug!(ts = %m.ts, "skipping own message");
            }
            RtmItem::Event(event) => out.push(event),
            RtmItem::FileShared {
                file_id,
                channel,
                user,
            } => match api.call::<FileInfo>("files.info", &[("file", file_id.clone())]).await {
                Ok(info) => {
                    let file = info.file;
                    let Some(channel) = file.shared_in().map(str::to_string).or(channel) else {
                        continue;
                    };
                    let author = file.user.clone().or(user);
                    out.push(NormalizedEvent::MessagePosted(PostedMessage {
                        channel: channel.into(),
                        author: author.map(Into::into),
                        text: String::new(),
                        ts: String::new(),
                        thread: None,
                        kind: MessageKind::Plain,
                        files: vec![file.to_shared()],
                    }));
                }
                Err(e) => warn!(file = %file_id, error = %e, "cannot look up shared file"),
            },
            RtmItem::Goodbye => out.push(NormalizedEvent::ReconnectRequired),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ChannelKind;

    fn one(event: Value) -> NormalizedEvent {
        match decode(&event).pop() {
            Some(RtmItem::Event(e)) => e,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_and_action_messages() {
        let ev = one(json!({
            "type": "message", "channel": "C1", "user": "U1",
            "text": "hello", "ts": "1.5", "thread_ts": "1.0"
        }));
        let NormalizedEvent::MessagePosted(m) = ev else { panic!() };
        assert_eq!(m.text, "hello");
        assert_eq!(m.thread.as_deref(), Some("1.0"));
        assert_eq!(m.kind, MessageKind::Plain);

        let ev = one(json!({
            "type": "message", "subtype": "me_message", "channel": "C1",
            "user": "U1", "text": "waves", "ts": "2.0"
        }));
        assert!(matches!(ev, NormalizedEvent::MessagePosted(ref m) if m.kind == MessageKind::Action));
    }

    #[test]
    fn edits_skip_unchanged_text() {
        let unchanged = json!({
            "type": "message", "subtype": "message_changed", "channel": "C1",
            "message": {"user": "U1", "text": "same"},
            "previous_message": {"user": "U1", "text": "same"}
        });
        assert!(decode(&unchanged).is_empty());

        let ev = one(json!({
            "type": "message", "subtype": "message_changed", "channel": "C1",
            "message": {"user": "U1", "text": "new"},
            "previous_message": {"user": "U1", "text": "old"}
        }));
        assert!(matches!(ev, NormalizedEvent::MessageEdited { ref previous, ref current, .. }
            if previous == "old" && current == "new"));
    }

    #[test]
    fn bot_messages_have_no_author() {
        let ev = one(json!({
            "type": "message", "subtype": "bot_message", "channel": "C1",
            "text": "", "attachments": [{"fallback": "build passed"}]
        }));
        let NormalizedEvent::MessagePosted(m) = ev else { panic!() };
        assert!(m.author.is_none());
        assert_eq!(m.text, "build passed");
        assert_eq!(m.kind, MessageKind::Bot { username: "bot".into() });
    }

    #[test]
    fn channel_events() {
        let ev = one(json!({"type": "channel_created", "channel": {"id": "C9", "name": "fresh"}}));
        assert!(matches!(ev, NormalizedEvent::ChannelCreated(ref c)
            if c.name == "fresh" && !c.is_member && c.kind == ChannelKind::Public));

        let ev = one(json!({"type": "im_created", "user": "U2", "channel": {"id": "D2"}}));
        assert!(matches!(ev, NormalizedEvent::ChannelCreated(ref c) if c.is_direct()));
    }

    #[test]
    fn presence_batches_expand() {
        let items = decode(&json!({"type": "presence_change", "users": ["U1", "U2"], "presence": "away"}));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn noise_and_control() {
        assert!(decode(&json!({"type": "user_typing", "channel": "C1"})).is_empty());
        assert!(decode(&json!({"ok": true, "reply_to": 1})).is_empty());
        assert_eq!(decode(&json!({"type": "goodbye"})), vec![RtmItem::Goodbye]);
    }

    #[tokio::test(start_paused = true)]
    async fn sent_log_expires() {
        let log = SentLog::new(ECHO_WINDOW);
        log.record("1.0");
        log.record("2.0");
        assert!(log.claim("1.0"));
        assert!(!log.claim("1.0"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!log.claim("2.0"));
    }
}
